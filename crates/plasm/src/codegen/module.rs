//! Top-level module assembly (§4.6 "Module emission"): type section,
//! function-signature section, globals, and one `(func ...)` per function,
//! wrapped in a single `(module ...)` form.

use crate::codegen::function::emit_function;
use crate::codegen::types::{func_sig_symbol, global_symbol, ir_type_to_wat, type_symbol};
use crate::ir::types::*;

pub fn generate(module: &IrModule) -> String {
    let mut out = String::new();
    out.push_str("(module\n");

    for (i, def) in module.type_defs.iter().enumerate() {
        let idx = TypeDefIdx::new(i as u32);
        emit_type_def(&mut out, idx, def);
    }
    for (i, sig) in module.func_sigs.iter().enumerate() {
        emit_func_sig(&mut out, FuncSigIdx::new(i as u32), sig);
    }
    for (i, global) in module.globals.iter().enumerate() {
        emit_global(&mut out, GlobalIdx::new(i as u32), global);
    }
    if uses_linear_memory(module) {
        out.push_str("  (memory (export \"memory\") 1)\n");
    }

    for i in 0..module.functions.len() {
        out.push_str(&emit_function(module, FuncIdx::new(i as u32)));
    }

    out.push_str(")\n");
    out
}

fn emit_type_def(out: &mut String, idx: TypeDefIdx, def: &IrTypeDef) {
    let sym = type_symbol(idx);
    match def {
        IrTypeDef::Struct { name, fields } => {
            out.push_str(&format!("  (type {sym} (struct ;; {name}\n"));
            for field in fields {
                out.push_str(&format!("    (field ${} (mut {}))\n", field.name, ir_type_to_wat(&field.ty)));
            }
            out.push_str("  ))\n");
        }
        IrTypeDef::Array { name, element } => {
            out.push_str(&format!("  (type {sym} (array (mut {}))) ;; {name}\n", ir_type_to_wat(element)));
        }
    }
}

fn emit_func_sig(out: &mut String, idx: FuncSigIdx, sig: &IrFuncSig) {
    let sym = func_sig_symbol(idx);
    out.push_str(&format!("  (type {sym} (func"));
    for p in &sig.params {
        out.push_str(&format!(" (param {})", ir_type_to_wat(p)));
    }
    if let Some(ret) = &sig.ret {
        out.push_str(&format!(" (result {})", ir_type_to_wat(ret)));
    }
    out.push_str("))\n");
}

fn emit_global(out: &mut String, idx: GlobalIdx, global: &IrGlobal) {
    let sym = global_symbol(idx, &global.name);
    let ty = ir_type_to_wat(&global.ty);
    let ty = if global.mutable { format!("(mut {ty})") } else { ty };
    out.push_str(&format!("  (global {sym} {ty} ({}.const {}))\n", const_prefix(&global.ty), global.init));
}

fn const_prefix(ty: &IrType) -> &'static str {
    match ty {
        IrType::I32 => "i32",
        IrType::I64 => "i64",
        IrType::F32 => "f32",
        IrType::F64 => "f64",
        _ => "i32",
    }
}

/// Whether the module needs a `(memory ...)` section. The IR has no
/// load/store/alloca opcodes — all heap state goes through GC structs and
/// arrays instead — so this is always false today; kept as an explicit
/// predicate rather than a silent omission in case linear-memory
/// instructions are ever added.
fn uses_linear_memory(_module: &IrModule) -> bool {
    false
}
