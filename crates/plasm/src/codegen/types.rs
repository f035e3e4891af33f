//! IR type → WAT text-format type mapping (§4.6 "Type mapping").

use crate::ir::types::*;

/// Symbol used for a `type_defs` entry in the emitted type section.
pub fn type_symbol(idx: TypeDefIdx) -> String {
    format!("$ty{}", idx.as_u32())
}

pub fn func_sig_symbol(idx: FuncSigIdx) -> String {
    format!("$sig{}", idx.as_u32())
}

/// Globals, unlike type-section/func-signature entries, carry a
/// source-level name worth keeping in the emitted text — `$x`, not an
/// index, so a reader matching WAT against source doesn't have to count.
pub fn global_symbol(idx: GlobalIdx, name: &str) -> String {
    let _ = idx;
    format!("${name}")
}

pub fn func_symbol(idx: FuncIdx, name: &str) -> String {
    let _ = idx;
    format!("${name}")
}

/// Symbol for a value-space local/parameter: `VarId`'s own `Display` gives
/// `v0`; WAT identifiers need the leading `$`.
pub fn var_symbol(var: VarId) -> String {
    format!("${var}")
}

/// Symbol for a struct field, addressed by name rather than position —
/// `struct.get $T $f`, not `struct.get $T 3`.
pub fn field_symbol(module: &IrModule, type_idx: TypeDefIdx, field: FieldIdx) -> String {
    match module.type_def(type_idx) {
        IrTypeDef::Struct { fields, .. } => format!("${}", fields[field.as_u32() as usize].name),
        IrTypeDef::Array { .. } => unreachable!("struct.get/set target must be a struct type"),
    }
}

/// The heap type named by `ref.null`/`ref.test`/`ref.cast`'s operand — the
/// bare GC abstract heap types for `funcref`/`anyref`/`i31ref`, or the
/// symbolic type-section entry for a user-defined struct/array/string.
pub fn heap_type(ty: &IrType) -> String {
    match ty {
        IrType::StructRef(idx) | IrType::ArrayRef(idx) | IrType::StringRef(idx) => type_symbol(*idx),
        IrType::FuncRef => "func".to_string(),
        IrType::AnyRef => "any".to_string(),
        IrType::I31Ref => "i31".to_string(),
        // Numeric types are never the target of a GC heap-type operand;
        // `any` is the safest fallback if one ever reaches here.
        IrType::I32 | IrType::I64 | IrType::F32 | IrType::F64 => "any".to_string(),
    }
}

/// Renders a value-position IR type. Struct/array/string references render
/// as `(ref null $N)` — GC references are nullable by default here, since
/// the language has no explicit non-null reference syntax.
pub fn ir_type_to_wat(ty: &IrType) -> String {
    match ty {
        IrType::I32 => "i32".to_string(),
        IrType::I64 => "i64".to_string(),
        IrType::F32 => "f32".to_string(),
        IrType::F64 => "f64".to_string(),
        IrType::I31Ref => "i31ref".to_string(),
        IrType::StructRef(idx) | IrType::ArrayRef(idx) | IrType::StringRef(idx) => {
            format!("(ref null {})", type_symbol(*idx))
        }
        IrType::FuncRef => "funcref".to_string(),
        IrType::AnyRef => "anyref".to_string(),
    }
}
