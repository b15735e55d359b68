//! Built-in function signatures.

use std::sync::LazyLock;

use indexmap::IndexMap;

use crate::types::ExprType;

/// The signature of a built-in function.
///
/// `params` lists the expected argument types; when `variadic` is set the
/// final parameter type repeats for any further arguments.
#[derive(Debug, Clone)]
pub struct FuncSignature {
    pub name: &'static str,
    pub params: Vec<ExprType>,
    pub required: usize,
    pub variadic: bool,
    pub ret: ExprType,
}

/// Functions only legal at workflow keys that allow them (checked against
/// the availability table).
pub const SPECIAL_FUNCTIONS: &[&str] = &[
    "always",
    "success",
    "failure",
    "cancelled",
    "canceled",
    "hashfiles",
];

/// All built-in functions, keyed by lowercased name.
pub static FUNCTIONS: LazyLock<IndexMap<&'static str, FuncSignature>> = LazyLock::new(|| {
    let status = |name| FuncSignature {
        name,
        params: vec![],
        required: 0,
        variadic: false,
        ret: ExprType::Bool,
    };

    IndexMap::from([
        (
            "contains",
            FuncSignature {
                name: "contains",
                params: vec![ExprType::Unknown, ExprType::Unknown],
                required: 2,
                variadic: false,
                ret: ExprType::Bool,
            },
        ),
        (
            "startswith",
            FuncSignature {
                name: "startsWith",
                params: vec![ExprType::String, ExprType::String],
                required: 2,
                variadic: false,
                ret: ExprType::Bool,
            },
        ),
        (
            "endswith",
            FuncSignature {
                name: "endsWith",
                params: vec![ExprType::String, ExprType::String],
                required: 2,
                variadic: false,
                ret: ExprType::Bool,
            },
        ),
        (
            "format",
            FuncSignature {
                name: "format",
                params: vec![ExprType::String, ExprType::Unknown],
                required: 1,
                variadic: true,
                ret: ExprType::String,
            },
        ),
        (
            "join",
            FuncSignature {
                name: "join",
                params: vec![ExprType::Unknown, ExprType::String],
                required: 1,
                variadic: false,
                ret: ExprType::String,
            },
        ),
        (
            "tojson",
            FuncSignature {
                name: "toJSON",
                params: vec![ExprType::Unknown],
                required: 1,
                variadic: false,
                ret: ExprType::String,
            },
        ),
        (
            "fromjson",
            FuncSignature {
                name: "fromJSON",
                params: vec![ExprType::String],
                required: 1,
                variadic: false,
                ret: ExprType::Unknown,
            },
        ),
        (
            "hashfiles",
            FuncSignature {
                name: "hashFiles",
                params: vec![ExprType::String],
                required: 1,
                variadic: true,
                ret: ExprType::String,
            },
        ),
        ("always", status("always")),
        ("success", status("success")),
        ("failure", status("failure")),
        ("cancelled", status("cancelled")),
        ("canceled", status("canceled")),
    ])
});

impl FuncSignature {
    /// The expected type of the `index`th argument.
    pub fn param_at(&self, index: usize) -> Option<&ExprType> {
        match self.params.get(index) {
            Some(ty) => Some(ty),
            None if self.variadic => self.params.last(),
            None => None,
        }
    }

    /// The maximum number of arguments, or `None` when variadic.
    pub fn max_args(&self) -> Option<usize> {
        (!self.variadic).then_some(self.params.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_lowercased() {
        assert!(FUNCTIONS.contains_key("fromjson"));
        assert!(FUNCTIONS.contains_key("hashfiles"));
        assert!(!FUNCTIONS.contains_key("fromJSON"));
    }

    #[test]
    fn test_variadic_params() {
        let format = &FUNCTIONS["format"];
        assert_eq!(format.param_at(0), Some(&ExprType::String));
        assert_eq!(format.param_at(5), Some(&ExprType::Unknown));
        assert_eq!(format.max_args(), None);

        let join = &FUNCTIONS["join"];
        assert_eq!(join.max_args(), Some(2));
        assert_eq!(join.param_at(2), None);
    }
}
