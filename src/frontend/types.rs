//! Numeric type system for user snippets.
//!
//! Snippet code is C-flavoured; this module provides the lattice of numeric
//! types the scanner and lowering passes agree on, together with C's usual
//! arithmetic conversion rules and the typedef table (`TypeContext`) used to
//! resolve context-sensitive names like `scalar`.

use crate::utils::errors::{TypeError, TypeErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;

/// A numeric type in snippet code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    /// `bool`
    Bool,
    /// `int8_t` / `char`
    Int8,
    /// `int16_t` / `short`
    Int16,
    /// `int32_t` / `int`
    Int32,
    /// `uint8_t` / `unsigned char`
    Uint8,
    /// `uint16_t` / `unsigned short`
    Uint16,
    /// `uint32_t` / `unsigned int`
    Uint32,
    /// `float`
    Float,
    /// `double`
    Double,
}

impl NumericType {
    /// Integer conversion rank; floating types rank above all integers.
    pub fn rank(self) -> u32 {
        match self {
            NumericType::Bool => 0,
            NumericType::Int8 | NumericType::Uint8 => 10,
            NumericType::Int16 | NumericType::Uint16 => 20,
            NumericType::Int32 | NumericType::Uint32 => 30,
            NumericType::Float => 50,
            NumericType::Double => 60,
        }
    }

    /// Whether the type can represent negative values.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumericType::Int8 | NumericType::Int16 | NumericType::Int32
                | NumericType::Float
                | NumericType::Double
        )
    }

    /// Whether the type is an integer type (bool counts as integral).
    pub fn is_integral(self) -> bool {
        !self.is_floating()
    }

    /// Whether the type is `float` or `double`.
    pub fn is_floating(self) -> bool {
        matches!(self, NumericType::Float | NumericType::Double)
    }

    /// Lowest representable value.
    pub fn min_value(self) -> f64 {
        match self {
            NumericType::Bool => 0.0,
            NumericType::Int8 => i8::MIN as f64,
            NumericType::Int16 => i16::MIN as f64,
            NumericType::Int32 => i32::MIN as f64,
            NumericType::Uint8 | NumericType::Uint16 | NumericType::Uint32 => 0.0,
            NumericType::Float => f32::MIN as f64,
            NumericType::Double => f64::MIN,
        }
    }

    /// Highest representable value.
    pub fn max_value(self) -> f64 {
        match self {
            NumericType::Bool => 1.0,
            NumericType::Int8 => i8::MAX as f64,
            NumericType::Int16 => i16::MAX as f64,
            NumericType::Int32 => i32::MAX as f64,
            NumericType::Uint8 => u8::MAX as f64,
            NumericType::Uint16 => u16::MAX as f64,
            NumericType::Uint32 => u32::MAX as f64,
            NumericType::Float => f32::MAX as f64,
            NumericType::Double => f64::MAX,
        }
    }

    /// The unsigned type of the same rank, for signed integer types.
    pub fn unsigned_equivalent(self) -> NumericType {
        match self {
            NumericType::Int8 => NumericType::Uint8,
            NumericType::Int16 => NumericType::Uint16,
            NumericType::Int32 => NumericType::Uint32,
            other => other,
        }
    }

    /// Canonical C name, as emitted into generated source.
    pub fn name(self) -> &'static str {
        match self {
            NumericType::Bool => "bool",
            NumericType::Int8 => "int8_t",
            NumericType::Int16 => "int16_t",
            NumericType::Int32 => "int32_t",
            NumericType::Uint8 => "uint8_t",
            NumericType::Uint16 => "uint16_t",
            NumericType::Uint32 => "uint32_t",
            NumericType::Float => "float",
            NumericType::Double => "double",
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Integer promotion: any type below `int32` rank promotes to `int32`.
///
/// This is sound because every smaller type in the lattice, signed or
/// unsigned, is representable in `int32`.
pub fn promoted_type(ty: NumericType) -> NumericType {
    if ty.rank() < NumericType::Int32.rank() {
        NumericType::Int32
    } else {
        ty
    }
}

/// C's usual arithmetic conversions over the lattice.
pub fn common_type(a: NumericType, b: NumericType) -> NumericType {
    // Any double wins
    if a == NumericType::Double || b == NumericType::Double {
        return NumericType::Double;
    }
    // Otherwise any float wins
    if a == NumericType::Float || b == NumericType::Float {
        return NumericType::Float;
    }

    // Must be integer types; promote both first
    let a = promoted_type(a);
    let b = promoted_type(b);
    if a == b {
        a
    } else if a.is_signed() == b.is_signed() {
        if a.rank() > b.rank() { a } else { b }
    } else {
        let (signed_op, unsigned_op) = if a.is_signed() { (a, b) } else { (b, a) };
        if unsigned_op.rank() >= signed_op.rank() {
            unsigned_op
        } else if signed_op.min_value() <= unsigned_op.min_value()
            && signed_op.max_value() >= unsigned_op.max_value()
        {
            signed_op
        } else {
            signed_op.unsigned_equivalent()
        }
    }
}

/// Resolve a set of type-specifier lexemes to a numeric type.
///
/// Mirrors the C specifier grammar: `{"unsigned", "int"}` and
/// `{"unsigned"}` both name `uint32_t`, fixed-width names stand alone.
pub fn numeric_type_from_specifiers(specifiers: &BTreeSet<&str>) -> Option<NumericType> {
    let mut sorted: Vec<&str> = specifiers.iter().copied().collect();
    sorted.sort_unstable();
    let ty = match sorted.as_slice() {
        ["char"] | ["int8_t"] => NumericType::Int8,
        ["char", "unsigned"] | ["uint8_t"] => NumericType::Uint8,
        ["short"] | ["int", "short"] | ["short", "signed"] | ["int", "short", "signed"]
        | ["int16_t"] => NumericType::Int16,
        ["short", "unsigned"] | ["int", "short", "unsigned"] | ["uint16_t"] => NumericType::Uint16,
        ["int"] | ["signed"] | ["int", "signed"] | ["int32_t"] => NumericType::Int32,
        ["unsigned"] | ["int", "unsigned"] | ["uint32_t"] => NumericType::Uint32,
        ["float"] => NumericType::Float,
        ["double"] => NumericType::Double,
        ["bool"] => NumericType::Bool,
        _ => return None,
    };
    Some(ty)
}

/// Parse a numeric type string, e.g. `"unsigned int"` or `"int32_t"`.
///
/// Scans the string and resolves the resulting type-specifier set; the
/// round trip through [`NumericType::name`] is the identity.
pub fn parse_numeric(type_string: &str) -> Result<NumericType, TypeError> {
    let context = TypeContext::default();
    let tokens = crate::frontend::scanner::scan_source(type_string, &context).map_err(|_| {
        TypeError {
            message: format!("error scanning type '{}'", type_string),
            kind: TypeErrorKind::UnknownType,
        }
    })?;

    let mut specifiers = BTreeSet::new();
    for token in &tokens {
        match token.kind {
            crate::frontend::token::TokenKind::TypeSpecifier => {
                specifiers.insert(token.lexeme.as_str());
            }
            crate::frontend::token::TokenKind::TypeQualifier
            | crate::frontend::token::TokenKind::EndOfFile => {}
            _ => {
                return Err(TypeError {
                    message: format!("unable to parse type '{}'", type_string),
                    kind: TypeErrorKind::UnknownType,
                });
            }
        }
    }

    numeric_type_from_specifiers(&specifiers).ok_or_else(|| TypeError {
        message: format!("unable to parse type '{}'", type_string),
        kind: TypeErrorKind::UnknownType,
    })
}

/// Typedef table used while scanning snippets.
///
/// Binds context-sensitive type names — most importantly `scalar`, the
/// model's chosen floating type — so the scanner can classify identifiers
/// and un-suffixed floating literals.
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    types: HashMap<String, NumericType>,
}

impl TypeContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with `scalar` and `timepoint` bound to the given precisions.
    pub fn for_model(scalar: NumericType, timepoint: NumericType) -> Self {
        let mut context = Self::new();
        context.define("scalar", scalar).unwrap();
        context.define("timepoint", timepoint).unwrap();
        context
    }

    /// Bind `name` to `ty`; defining the same name twice is an error.
    pub fn define(&mut self, name: &str, ty: NumericType) -> Result<(), TypeError> {
        if self.types.insert(name.to_string(), ty).is_some() {
            Err(TypeError {
                message: format!("redefinition of type '{}'", name),
                kind: TypeErrorKind::DuplicateDefinition,
            })
        } else {
            Ok(())
        }
    }

    /// Look up a typedef name.
    pub fn get(&self, name: &str) -> Option<NumericType> {
        self.types.get(name).copied()
    }

    /// Whether `name` resolves as a typedef.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// The type bound to `scalar`; absence is a fatal error.
    pub fn scalar(&self) -> Result<NumericType, TypeError> {
        match self.get("scalar") {
            Some(ty) if ty.is_floating() => Ok(ty),
            Some(ty) => Err(TypeError {
                message: format!("unsupported scalar type '{}'", ty),
                kind: TypeErrorKind::MissingScalar,
            }),
            None => Err(TypeError {
                message: "cannot scan scalar literals without 'scalar' type being defined in type context"
                    .to_string(),
                kind: TypeErrorKind::MissingScalar,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for ty in [
            NumericType::Bool,
            NumericType::Int8,
            NumericType::Int16,
            NumericType::Int32,
            NumericType::Uint8,
            NumericType::Uint16,
            NumericType::Uint32,
            NumericType::Float,
            NumericType::Double,
        ] {
            assert_eq!(parse_numeric(ty.name()).unwrap(), ty);
        }
    }

    #[test]
    fn test_parse_multi_specifier() {
        assert_eq!(parse_numeric("unsigned int").unwrap(), NumericType::Uint32);
        assert_eq!(parse_numeric("signed short int").unwrap(), NumericType::Int16);
        assert_eq!(parse_numeric("unsigned char").unwrap(), NumericType::Uint8);
        assert_eq!(parse_numeric("const unsigned int").unwrap(), NumericType::Uint32);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_numeric("long double int").is_err());
        assert!(parse_numeric("floatish").is_err());
    }

    #[test]
    fn test_promotion() {
        assert_eq!(promoted_type(NumericType::Int8), NumericType::Int32);
        assert_eq!(promoted_type(NumericType::Uint16), NumericType::Int32);
        assert_eq!(promoted_type(NumericType::Bool), NumericType::Int32);
        assert_eq!(promoted_type(NumericType::Uint32), NumericType::Uint32);
        assert_eq!(promoted_type(NumericType::Double), NumericType::Double);
    }

    #[test]
    fn test_common_type_floating_wins() {
        assert_eq!(common_type(NumericType::Double, NumericType::Uint32), NumericType::Double);
        assert_eq!(common_type(NumericType::Int8, NumericType::Float), NumericType::Float);
        assert_eq!(common_type(NumericType::Float, NumericType::Double), NumericType::Double);
    }

    #[test]
    fn test_common_type_mixed_signedness() {
        // Equal rank, unsigned wins
        assert_eq!(common_type(NumericType::Uint32, NumericType::Int32), NumericType::Uint32);
        // Small unsigned promotes into signed int32
        assert_eq!(common_type(NumericType::Uint16, NumericType::Int32), NumericType::Int32);
    }

    #[test]
    fn test_common_type_commutative_idempotent() {
        let types = [
            NumericType::Bool,
            NumericType::Int8,
            NumericType::Int16,
            NumericType::Int32,
            NumericType::Uint8,
            NumericType::Uint16,
            NumericType::Uint32,
            NumericType::Float,
            NumericType::Double,
        ];
        for &a in &types {
            assert_eq!(common_type(a, a), promoted_type(a));
            for &b in &types {
                assert_eq!(common_type(a, b), common_type(b, a));
            }
        }
    }

    #[test]
    fn test_type_context_duplicate_definition() {
        let mut context = TypeContext::new();
        context.define("scalar", NumericType::Float).unwrap();
        let err = context.define("scalar", NumericType::Double).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::DuplicateDefinition);
    }

    #[test]
    fn test_scalar_lookup() {
        let context = TypeContext::for_model(NumericType::Float, NumericType::Double);
        assert_eq!(context.scalar().unwrap(), NumericType::Float);

        let empty = TypeContext::new();
        assert_eq!(empty.scalar().unwrap_err().kind, TypeErrorKind::MissingScalar);
    }
}
