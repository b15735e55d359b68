//! The expression value type model.
//!
//! Types form a small lattice with `Unknown` absorbing in both directions:
//! anything is assignable to `Unknown` and `Unknown` is assignable to
//! anything. Object types track known properties and may be `loose`
//! (accepting any property); array types carry an element type and a
//! `deref` flag marking the result of a `.*` filter.

use indexmap::IndexMap;

/// The type of an expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprType {
    Null,
    Bool,
    Number,
    String,
    /// A value about which nothing is known. Top and bottom of the order.
    Unknown,
    Object(ObjectType),
    Array(ArrayType),
}

/// An object type: known properties plus a looseness flag.
///
/// Property names are stored lowercased, matching the language's
/// case-insensitive property access.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectType {
    pub props: IndexMap<String, ExprType>,
    pub loose: bool,
}

/// An array type. `deref` marks `.*` results, whose property accesses
/// distribute over the elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub elem: Box<ExprType>,
    pub deref: bool,
}

impl ExprType {
    /// A strict object with the given properties.
    pub fn strict_object<'a>(props: impl IntoIterator<Item = (&'a str, ExprType)>) -> ExprType {
        ExprType::Object(ObjectType {
            props: props
                .into_iter()
                .map(|(name, ty)| (name.to_ascii_lowercase(), ty))
                .collect(),
            loose: false,
        })
    }

    /// A loose object with the given known properties.
    pub fn loose_object<'a>(props: impl IntoIterator<Item = (&'a str, ExprType)>) -> ExprType {
        ExprType::Object(ObjectType {
            props: props
                .into_iter()
                .map(|(name, ty)| (name.to_ascii_lowercase(), ty))
                .collect(),
            loose: true,
        })
    }

    /// An empty loose object.
    pub fn any_object() -> ExprType {
        ExprType::Object(ObjectType {
            props: IndexMap::new(),
            loose: true,
        })
    }

    /// An array of `elem`.
    pub fn array_of(elem: ExprType) -> ExprType {
        ExprType::Array(ArrayType {
            elem: Box::new(elem),
            deref: false,
        })
    }

    /// Looks up a property, honoring looseness. `None` means the property
    /// is statically known to be absent.
    pub fn prop(&self, name: &str) -> Option<ExprType> {
        match self {
            ExprType::Object(obj) => match obj.props.get(&name.to_ascii_lowercase()) {
                Some(ty) => Some(ty.clone()),
                None if obj.loose => Some(ExprType::Unknown),
                None => None,
            },
            ExprType::Unknown => Some(ExprType::Unknown),
            _ => None,
        }
    }

    /// Whether a value of this type is acceptable where `other` is expected.
    ///
    /// `Unknown` absorbs in both directions. Primitives coerce the way the
    /// evaluator does: numbers, booleans and null all render into strings.
    pub fn assignable_to(&self, other: &ExprType) -> bool {
        match (self, other) {
            (ExprType::Unknown, _) | (_, ExprType::Unknown) => true,
            (ExprType::Null, _) => true,
            (a, b) if a == b => true,
            (ExprType::Number | ExprType::Bool, ExprType::String) => true,
            (ExprType::String, ExprType::Number) => true,
            (ExprType::Object(a), ExprType::Object(b)) => {
                if a.loose || b.loose {
                    return true;
                }
                b.props.iter().all(|(name, expected)| {
                    a.props
                        .get(name)
                        .is_some_and(|actual| actual.assignable_to(expected))
                })
            }
            (ExprType::Array(a), ExprType::Array(b)) => a.elem.assignable_to(&b.elem),
            _ => false,
        }
    }

    /// The join of two types: their most specific common shape, degrading
    /// to `Unknown` where they disagree. Used to merge matrix rows and
    /// `&&`/`||` arms.
    pub fn join(a: &ExprType, b: &ExprType) -> ExprType {
        match (a, b) {
            (a, b) if a == b => a.clone(),
            (ExprType::Unknown, other) | (other, ExprType::Unknown) => other.clone(),
            (ExprType::Null, other) | (other, ExprType::Null) => other.clone(),
            (ExprType::Object(x), ExprType::Object(y)) => {
                let mut props: IndexMap<String, ExprType> = IndexMap::new();
                for (name, ty) in x.props.iter().chain(y.props.iter()) {
                    let merged = match props.get(name) {
                        Some(existing) => ExprType::join(existing, ty),
                        None => ty.clone(),
                    };
                    props.insert(name.clone(), merged);
                }
                ExprType::Object(ObjectType {
                    props,
                    loose: x.loose || y.loose,
                })
            }
            (ExprType::Array(x), ExprType::Array(y)) => ExprType::Array(ArrayType {
                elem: Box::new(ExprType::join(&x.elem, &y.elem)),
                deref: x.deref && y.deref,
            }),
            _ => ExprType::Unknown,
        }
    }
}

impl std::fmt::Display for ExprType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprType::Null => f.write_str("null"),
            ExprType::Bool => f.write_str("bool"),
            ExprType::Number => f.write_str("number"),
            ExprType::String => f.write_str("string"),
            ExprType::Unknown => f.write_str("any"),
            ExprType::Object(obj) => {
                if obj.props.is_empty() {
                    f.write_str("object")
                } else {
                    write!(f, "object {{")?;
                    for (i, (name, ty)) in obj.props.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{name}: {ty}")?;
                    }
                    f.write_str("}")
                }
            }
            ExprType::Array(arr) => write!(f, "array<{}>", arr.elem),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_assignable_unknown_absorbs() {
        for ty in [
            ExprType::Null,
            ExprType::Bool,
            ExprType::Number,
            ExprType::String,
            ExprType::any_object(),
            ExprType::array_of(ExprType::String),
        ] {
            assert!(ty.assignable_to(&ExprType::Unknown));
            assert!(ExprType::Unknown.assignable_to(&ty));
        }
    }

    #[test]
    fn test_assignable_primitives() {
        assert!(ExprType::Number.assignable_to(&ExprType::String));
        assert!(ExprType::Bool.assignable_to(&ExprType::String));
        assert!(ExprType::String.assignable_to(&ExprType::Number));
        assert!(!ExprType::String.assignable_to(&ExprType::Bool));
        assert!(!ExprType::any_object().assignable_to(&ExprType::String));
    }

    #[test]
    fn test_assignable_objects() {
        let wide = ExprType::strict_object([
            ("name", ExprType::String),
            ("count", ExprType::Number),
        ]);
        let narrow = ExprType::strict_object([("name", ExprType::String)]);
        assert!(wide.assignable_to(&narrow));
        assert!(!narrow.assignable_to(&wide));
        assert!(ExprType::any_object().assignable_to(&narrow));
    }

    #[test]
    fn test_prop_lookup() {
        let obj = ExprType::strict_object([("OS", ExprType::String)]);
        assert_eq!(obj.prop("os"), Some(ExprType::String));
        assert_eq!(obj.prop("OS"), Some(ExprType::String));
        assert_eq!(obj.prop("arch"), None);
        assert_eq!(ExprType::any_object().prop("arch"), Some(ExprType::Unknown));
    }

    #[test]
    fn test_join() {
        assert_eq!(
            ExprType::join(&ExprType::String, &ExprType::String),
            ExprType::String
        );
        assert_eq!(
            ExprType::join(&ExprType::String, &ExprType::Number),
            ExprType::Unknown
        );
        let joined = ExprType::join(
            &ExprType::strict_object([("a", ExprType::String)]),
            &ExprType::strict_object([("b", ExprType::Number)]),
        );
        assert_eq!(joined.prop("a"), Some(ExprType::String));
        assert_eq!(joined.prop("b"), Some(ExprType::Number));
    }
}
