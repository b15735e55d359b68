//! The recursive-descent expression parser.
//!
//! Precedence, loosest first: `||`, `&&`, `==`/`!=`, `<`/`<=`/`>`/`>=`,
//! unary `!`, then primaries. All binary operators associate left.

use std::borrow::Cow;

use crate::context::Context;
use crate::lexer::{Token, TokenKind};
use crate::{BinOp, Expr, Function, Identifier, Literal, ParseError, Span, SpannedExpr, UnOp};

pub(crate) struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    pub(crate) fn new(tokens: Vec<Token<'src>>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub(crate) fn parse(mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let expr = self.or_expr()?;
        match self.peek().kind {
            TokenKind::Eof => Ok(expr),
            _ => Err(self.error("expected end of expression")),
        }
    }

    fn peek(&self) -> &Token<'src> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token<'src> {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind<'src>) -> bool {
        if &self.peek().kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind<'src>, what: &str) -> Result<Token<'src>, ParseError> {
        if &self.peek().kind == &kind {
            Ok(self.bump())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.peek().span.start, message)
    }

    fn or_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and_expr()?;
            lhs = binop(lhs, BinOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let mut lhs = self.eq_expr()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.eq_expr()?;
            lhs = binop(lhs, BinOp::And, rhs);
        }
        Ok(lhs)
    }

    fn eq_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let mut lhs = self.comp_expr()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Neq => BinOp::Neq,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.comp_expr()?;
            lhs = binop(lhs, op, rhs);
        }
    }

    fn comp_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary_expr()?;
            lhs = binop(lhs, op, rhs);
        }
    }

    fn unary_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        if self.peek().kind == TokenKind::Not {
            let not = self.bump();
            let expr = self.unary_expr()?;
            let span = not.span.to(expr.span);
            return Ok(SpannedExpr::new(
                Expr::UnOp {
                    op: UnOp::Not,
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.bump();
                Ok(SpannedExpr::new(
                    Expr::Literal(Literal::Number(value)),
                    token.span,
                ))
            }
            TokenKind::String(ref value) => {
                self.bump();
                Ok(SpannedExpr::new(
                    Expr::Literal(Literal::String(value.clone())),
                    token.span,
                ))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.or_expr()?;
                let close = self.expect(TokenKind::RParen, "closing ')'")?;
                // Parentheses group; the span widens but the tree does not.
                Ok(SpannedExpr::new(inner.inner, token.span.to(close.span)))
            }
            TokenKind::Ident(name) => {
                if name.eq_ignore_ascii_case("true") {
                    self.bump();
                    return Ok(SpannedExpr::new(
                        Expr::Literal(Literal::Boolean(true)),
                        token.span,
                    ));
                }
                if name.eq_ignore_ascii_case("false") {
                    self.bump();
                    return Ok(SpannedExpr::new(
                        Expr::Literal(Literal::Boolean(false)),
                        token.span,
                    ));
                }
                if name.eq_ignore_ascii_case("null") {
                    self.bump();
                    return Ok(SpannedExpr::new(Expr::Literal(Literal::Null), token.span));
                }
                self.context_expr()
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    /// Parses an identifier or call head followed by any number of `.part`,
    /// `.*` and `[index]` components.
    fn context_expr(&mut self) -> Result<SpannedExpr<'src>, ParseError> {
        let head_token = self.bump();
        let TokenKind::Ident(name) = head_token.kind else {
            return Err(self.error("expected an identifier"));
        };

        let head = if self.peek().kind == TokenKind::LParen {
            self.call(name, head_token.span)?
        } else {
            SpannedExpr::new(Expr::Identifier(Identifier(name)), head_token.span)
        };

        let mut parts = vec![head];
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.bump();
                    let part = self.bump();
                    match part.kind {
                        TokenKind::Ident(name) => {
                            parts.push(SpannedExpr::new(
                                Expr::Identifier(Identifier(name)),
                                part.span,
                            ));
                        }
                        TokenKind::Star => {
                            parts.push(SpannedExpr::new(Expr::Star, part.span));
                        }
                        _ => return Err(ParseError::new(part.span.start, "expected a property name or '*' after '.'")),
                    }
                }
                TokenKind::LBracket => {
                    let open = self.bump();
                    let index = if self.peek().kind == TokenKind::Star {
                        let star = self.bump();
                        SpannedExpr::new(Expr::Star, star.span)
                    } else {
                        self.or_expr()?
                    };
                    let close = self.expect(TokenKind::RBracket, "closing ']'")?;
                    parts.push(SpannedExpr::new(
                        Expr::Index(Box::new(index)),
                        open.span.to(close.span),
                    ));
                }
                _ => break,
            }
        }

        let span = parts[0].span.to(parts.last().map(|p| p.span).unwrap_or_default());
        if parts.len() == 1 && matches!(parts[0].inner, Expr::Call { .. }) {
            let call = parts.remove(0);
            return Ok(call);
        }
        Ok(SpannedExpr::new(Expr::Context(Context::new(parts)), span))
    }

    fn call(&mut self, name: &'src str, name_span: Span) -> Result<SpannedExpr<'src>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.or_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RParen, "closing ')'")?;
        Ok(SpannedExpr::new(
            Expr::Call {
                func: Function(name),
                args,
            },
            name_span.to(close.span),
        ))
    }
}

fn binop<'src>(lhs: SpannedExpr<'src>, op: BinOp, rhs: SpannedExpr<'src>) -> SpannedExpr<'src> {
    let span = lhs.span.to(rhs.span);
    SpannedExpr::new(
        Expr::BinOp {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        },
        span,
    )
}
