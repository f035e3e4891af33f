//! The `PlasmType` lattice and the implicit-upcast relation (§4.4).

use std::fmt;

/// A resolved, elaborated type — the output of type analysis, keyed off
/// [`crate::ast::NodeId`] in the node-type side-table ([`crate::ast::TypeTable`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlasmType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    String,
    Void,
    /// The universal supertype: anything implicitly upcasts to `any`, and
    /// `any` accepts any value at runtime (checked at codegen boundaries).
    Any,
    Array(Box<PlasmType>),
    Class(String),
    Tuple(Vec<PlasmType>),
    Function { params: Vec<PlasmType>, ret: Box<PlasmType> },
}

impl fmt::Display for PlasmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlasmType::U8 => write!(f, "u8"),
            PlasmType::U16 => write!(f, "u16"),
            PlasmType::U32 => write!(f, "u32"),
            PlasmType::U64 => write!(f, "u64"),
            PlasmType::I8 => write!(f, "i8"),
            PlasmType::I16 => write!(f, "i16"),
            PlasmType::I32 => write!(f, "i32"),
            PlasmType::I64 => write!(f, "i64"),
            PlasmType::F32 => write!(f, "f32"),
            PlasmType::F64 => write!(f, "f64"),
            PlasmType::Bool => write!(f, "bool"),
            PlasmType::String => write!(f, "string"),
            PlasmType::Void => write!(f, "void"),
            PlasmType::Any => write!(f, "any"),
            PlasmType::Array(elem) => write!(f, "array<{elem}>"),
            PlasmType::Class(name) => write!(f, "{name}"),
            PlasmType::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            PlasmType::Function { params, ret } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") => {ret}")
            }
        }
    }
}

impl PlasmType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PlasmType::U8
                | PlasmType::U16
                | PlasmType::U32
                | PlasmType::U64
                | PlasmType::I8
                | PlasmType::I16
                | PlasmType::I32
                | PlasmType::I64
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, PlasmType::U8 | PlasmType::U16 | PlasmType::U32 | PlasmType::U64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, PlasmType::I8 | PlasmType::I16 | PlasmType::I32 | PlasmType::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PlasmType::F32 | PlasmType::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Bit width of a numeric primitive; used by the upcast lattice and by
    /// the IR lowering pass to pick the right wasm storage type.
    pub fn bit_width(&self) -> Option<u32> {
        Some(match self {
            PlasmType::U8 | PlasmType::I8 => 8,
            PlasmType::U16 | PlasmType::I16 => 16,
            PlasmType::U32 | PlasmType::I32 | PlasmType::F32 => 32,
            PlasmType::U64 | PlasmType::I64 | PlasmType::F64 => 64,
            _ => return None,
        })
    }
}

/// Can a value of type `from` be used where `to` is expected without an
/// explicit `as` cast? (§4.4)
///
/// Lattice, in order checked:
/// 1. identical types always upcast.
/// 2. anything upcasts to `any`.
/// 3. unsigned → wider-or-equal unsigned.
/// 4. unsigned → wider signed (u8 fits in i16, etc — strictly wider only,
///    since same-width unsigned→signed can overflow).
/// 5. signed → wider-or-equal signed.
/// 6. integer → float, when the float's width is at least the integer's.
/// 7. f32 → f64.
///
/// u64 → i64 and every signed → unsigned direction are explicitly excluded:
/// both can silently reinterpret bits across the sign boundary.
pub fn can_implicitly_upcast(from: &PlasmType, to: &PlasmType) -> bool {
    if from == to {
        return true;
    }
    if matches!(to, PlasmType::Any) || matches!(from, PlasmType::Any) {
        return true;
    }

    let (Some(from_w), Some(to_w)) = (from.bit_width(), to.bit_width()) else {
        return false;
    };

    if from.is_unsigned() && to.is_unsigned() {
        return from_w <= to_w;
    }
    if from.is_unsigned() && to.is_signed() {
        return from_w < to_w;
    }
    if from.is_signed() && to.is_signed() {
        return from_w <= to_w;
    }
    if from.is_integer() && to.is_float() {
        return from_w <= to_w;
    }
    if matches!(from, PlasmType::F32) && matches!(to, PlasmType::F64) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_types_upcast() {
        assert!(can_implicitly_upcast(&PlasmType::U32, &PlasmType::U32));
    }

    #[test]
    fn anything_upcasts_to_any() {
        assert!(can_implicitly_upcast(&PlasmType::Bool, &PlasmType::Any));
        assert!(can_implicitly_upcast(&PlasmType::Class("Foo".into()), &PlasmType::Any));
    }

    #[test]
    fn any_upcasts_to_anything() {
        assert!(can_implicitly_upcast(&PlasmType::Any, &PlasmType::U8));
        assert!(can_implicitly_upcast(&PlasmType::Any, &PlasmType::Class("Foo".into())));
    }

    #[test]
    fn unsigned_widens() {
        assert!(can_implicitly_upcast(&PlasmType::U8, &PlasmType::U32));
        assert!(!can_implicitly_upcast(&PlasmType::U32, &PlasmType::U8));
    }

    #[test]
    fn unsigned_to_strictly_wider_signed() {
        assert!(can_implicitly_upcast(&PlasmType::U8, &PlasmType::I16));
        assert!(!can_implicitly_upcast(&PlasmType::U8, &PlasmType::I8));
        assert!(!can_implicitly_upcast(&PlasmType::U64, &PlasmType::I64));
    }

    #[test]
    fn signed_to_unsigned_never_implicit() {
        assert!(!can_implicitly_upcast(&PlasmType::I8, &PlasmType::U32));
    }

    #[test]
    fn integer_to_float_when_wide_enough() {
        assert!(can_implicitly_upcast(&PlasmType::I32, &PlasmType::F64));
        assert!(!can_implicitly_upcast(&PlasmType::I64, &PlasmType::F32));
    }

    #[test]
    fn f32_widens_to_f64() {
        assert!(can_implicitly_upcast(&PlasmType::F32, &PlasmType::F64));
        assert!(!can_implicitly_upcast(&PlasmType::F64, &PlasmType::F32));
    }
}
