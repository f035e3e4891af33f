//! Per-function WAT emission: signature, locals, and structured
//! control-flow reconstruction (§4.6 "Control flow").
//!
//! The IR never carries arbitrary control flow: every `BranchIf` either
//! belongs to the block that opened an if-statement (`then`/`else`/`merge`
//! shape) or to a `while_header` block (loop shape). `emit_flow` walks the
//! block graph in that shape directly, rather than reconstructing it from
//! a general CFG.

use std::collections::BTreeMap;

use crate::codegen::instruction::{emit_instruction, emit_return, Writer};
use crate::codegen::types::{func_symbol, ir_type_to_wat, var_symbol};
use crate::ir::types::*;

pub fn emit_function(module: &IrModule, idx: FuncIdx) -> String {
    let func = module.function(idx);
    let mut out = String::new();

    let name = func_symbol(idx, &func.name);
    out.push_str(&format!("  (func {name}"));
    if func.exported {
        out.push_str(" (export \"_start\")");
    }
    for (var, ty) in &func.params {
        out.push_str(&format!(" (param {} {})", var_symbol(*var), ir_type_to_wat(ty)));
    }
    if let Some(ret) = &func.return_type {
        out.push_str(&format!(" (result {})", ir_type_to_wat(ret)));
    }
    out.push('\n');

    // Every local declared at the builder level, plus any temporaries the
    // builder introduced that never got a declared name, all need a
    // `(local ...)` line — sorted by VarId so the output is deterministic.
    let var_types = infer_var_types(module, func);
    let param_ids: std::collections::HashSet<u32> = func.params.iter().map(|(v, _)| v.0).collect();
    let mut locals: Vec<(u32, &IrType)> = var_types.iter().filter(|(id, _)| !param_ids.contains(id)).map(|(id, ty)| (*id, ty)).collect();
    locals.sort_by_key(|(id, _)| *id);
    for (id, ty) in locals {
        out.push_str(&format!("    (local {} {})\n", var_symbol(VarId(id)), ir_type_to_wat(ty)));
    }

    let blocks: BTreeMap<u32, &IrBasicBlock> = func.blocks.iter().map(|b| (b.id.0, b)).collect();
    let mut w = Writer::new(2);
    emit_flow(&mut w, module, &blocks, func.entry_block, None, None);
    out.push_str(&w.finish());

    out.push_str("  )\n");
    out
}

/// Scans every instruction for its dest-producing variant to recover the
/// wasm local type each SSA temporary needs — the IR itself never stores
/// this per-variable, only per-instruction. Instructions are visited in
/// block order, which is always def-before-use, so operand types needed
/// by `Select` are already resolved by the time they're looked up.
fn infer_var_types(module: &IrModule, func: &IrFunction) -> BTreeMap<u32, IrType> {
    let mut types = BTreeMap::new();
    for (var, ty) in &func.params {
        types.insert(var.0, ty.clone());
    }
    for (var, ty) in &func.locals {
        types.insert(var.0, ty.clone());
    }
    for block in &func.blocks {
        for instr in &block.instructions {
            if let Some((var, ty)) = instr_dest_type(module, &types, instr) {
                types.insert(var.0, ty);
            }
        }
    }
    types
}

fn instr_dest_type(module: &IrModule, types: &BTreeMap<u32, IrType>, instr: &IrInstr) -> Option<(VarId, IrType)> {
    match instr {
        IrInstr::Const { dest, value } => Some((*dest, const_ty(value))),
        IrInstr::BinOp { dest, op, .. } => Some((*dest, binop_ty(*op))),
        IrInstr::UnOp { dest, op, .. } => Some((*dest, unop_ty(*op))),
        IrInstr::Assign { .. } => None,
        IrInstr::Convert { dest, to, .. } => Some((*dest, to.clone())),
        IrInstr::Call { dest: Some(dest), func: callee, .. } => {
            Some((*dest, module.function(*callee).return_type.clone().unwrap_or(IrType::I32)))
        }
        IrInstr::CallRef { dest: Some(dest), sig, .. } => {
            let sig = &module.func_sigs[sig.as_u32() as usize];
            Some((*dest, sig.ret.clone().unwrap_or(IrType::I32)))
        }
        IrInstr::GlobalGet { dest, index } => Some((*dest, module.globals[index.as_u32() as usize].ty.clone())),
        IrInstr::StructNew { dest, type_idx, .. } => Some((*dest, IrType::StructRef(*type_idx))),
        IrInstr::StructGet { dest, type_idx, field, .. } => match module.type_def(*type_idx) {
            IrTypeDef::Struct { fields, .. } => Some((*dest, fields[field.as_u32() as usize].ty.clone())),
            IrTypeDef::Array { .. } => Some((*dest, IrType::AnyRef)),
        },
        IrInstr::ArrayNew { dest, type_idx, .. } => Some((*dest, IrType::ArrayRef(*type_idx))),
        IrInstr::ArrayNewDefault { dest, type_idx, .. } => Some((*dest, IrType::ArrayRef(*type_idx))),
        IrInstr::ArrayGet { dest, type_idx, .. } => match module.type_def(*type_idx) {
            IrTypeDef::Array { element, .. } => Some((*dest, element.clone())),
            IrTypeDef::Struct { .. } => Some((*dest, IrType::AnyRef)),
        },
        IrInstr::ArrayLen { dest, .. } => Some((*dest, IrType::I32)),
        IrInstr::RefNull { dest, ty } => Some((*dest, ty.clone())),
        IrInstr::RefIsNull { dest, .. } => Some((*dest, IrType::I32)),
        IrInstr::RefEq { dest, .. } => Some((*dest, IrType::I32)),
        IrInstr::RefCast { dest, type_idx, .. } => match module.type_def(*type_idx) {
            IrTypeDef::Array { .. } => Some((*dest, IrType::ArrayRef(*type_idx))),
            IrTypeDef::Struct { .. } => Some((*dest, IrType::StructRef(*type_idx))),
        },
        IrInstr::RefTest { dest, .. } => Some((*dest, IrType::I32)),
        IrInstr::I31New { dest, .. } => Some((*dest, IrType::I31Ref)),
        IrInstr::I31GetS { dest, .. } => Some((*dest, IrType::I32)),
        IrInstr::FuncRef { dest, .. } => Some((*dest, IrType::FuncRef)),
        IrInstr::Select { dest, if_true, .. } => {
            Some((*dest, types.get(&if_true.0).cloned().unwrap_or(IrType::AnyRef)))
        }
        _ => None,
    }
}

fn const_ty(value: &IrConst) -> IrType {
    match value {
        IrConst::I32(_) => IrType::I32,
        IrConst::I64(_) => IrType::I64,
        IrConst::F32(_) => IrType::F32,
        IrConst::F64(_) => IrType::F64,
    }
}

fn binop_ty(op: BinOp) -> IrType {
    use BinOp::*;
    match op {
        I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or | I32Eq | I32Ne | I32LtS
        | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => IrType::I32,
        I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU => IrType::I64,
        I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => IrType::I32,
        F32Add | F32Sub | F32Mul | F32Div => IrType::F32,
        F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => IrType::I32,
        F64Add | F64Sub | F64Mul | F64Div => IrType::F64,
        F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => IrType::I32,
    }
}

fn unop_ty(op: UnOp) -> IrType {
    match op {
        UnOp::I32Neg => IrType::I32,
        UnOp::I64Neg => IrType::I64,
        UnOp::F32Neg => IrType::F32,
        UnOp::F64Neg => IrType::F64,
        UnOp::I32Eqz => IrType::I32,
    }
}

/// Walks the block graph starting at `start`, emitting instructions and
/// reconstructing `if`/`loop` nesting from each block's terminator shape.
///
/// `stop`, when reached, silently ends this straight-line run without
/// emitting anything further (the caller already opened the wrapper that
/// will continue past it — an if-statement's merge block). `back_edge`,
/// when reached, emits an explicit `(br $label)` instead of falling
/// through (a while loop's header, jumped back to from the body).
fn emit_flow(
    w: &mut Writer,
    module: &IrModule,
    blocks: &BTreeMap<u32, &IrBasicBlock>,
    mut current: BlockId,
    stop: Option<BlockId>,
    back_edge: Option<(BlockId, String)>,
) {
    loop {
        if Some(current) == stop {
            return;
        }
        if let Some((header, label)) = &back_edge {
            if current == *header {
                w.line(&format!("(br ${label})"));
                return;
            }
        }

        // A merge/exit block can be pruned by the dead-code pass when every
        // arm that would have jumped to it terminates first (e.g. an
        // if/else where both branches return) — nothing reaches it, so
        // there's nothing left to emit for this straight-line run.
        let Some(block) = blocks.get(&current.0) else {
            return;
        };
        for instr in &block.instructions {
            emit_instruction(w, module, instr);
        }

        match &block.terminator {
            IrTerminator::Return { value } => {
                emit_return(w, *value);
                return;
            }
            IrTerminator::Unreachable => {
                w.line("(unreachable)");
                return;
            }
            IrTerminator::Jump { target } => {
                current = *target;
            }
            IrTerminator::BranchIf { condition, if_true, if_false } => {
                if block.label == "while_header" {
                    emit_while(w, module, blocks, current, *condition, *if_true);
                    // Control continues after the loop wrapper at the
                    // exit block, exactly as if the header had jumped
                    // straight there.
                    current = *if_false;
                    continue;
                }
                emit_if(w, module, blocks, *condition, *if_true, *if_false, &back_edge);
                // The merge block always immediately follows the then-block
                // in id order, regardless of whether an else arm exists.
                current = BlockId(if_true.0 + 1);
            }
        }
    }
}

/// Emits `(if (then ...) (else ...))`, recursing into each arm with the
/// if-statement's merge block as the new local `stop`.
fn emit_if(
    w: &mut Writer,
    module: &IrModule,
    blocks: &BTreeMap<u32, &IrBasicBlock>,
    condition: VarId,
    then_blk: BlockId,
    else_blk: BlockId,
    back_edge: &Option<(BlockId, String)>,
) {
    let merge = BlockId(then_blk.0 + 1);
    let has_else = else_blk != merge;

    w.line(&format!("(if (local.get {})", var_symbol(condition)));
    w.indent();
    w.line("(then");
    w.indent();
    emit_flow(w, module, blocks, then_blk, Some(merge), back_edge.clone());
    w.dedent();
    w.line(")");
    if has_else {
        w.line("(else");
        w.indent();
        emit_flow(w, module, blocks, else_blk, Some(merge), back_edge.clone());
        w.dedent();
        w.line(")");
    }
    w.dedent();
    w.line(")");
}

/// Emits `(block $exit (loop $header ... (br_if $header ...)))`. The loop
/// header's own `BranchIf` drives the `br_if` back to the top; falling out
/// of the body, or branching back to the header, stays inside the loop —
/// the caller continues emission at the header's `if_false` target (the
/// code after the loop) once this returns.
fn emit_while(w: &mut Writer, module: &IrModule, blocks: &BTreeMap<u32, &IrBasicBlock>, header: BlockId, condition: VarId, body: BlockId) {
    let label = format!("loop_{}", header.0);
    let exit_label = format!("exit_{}", header.0);

    w.line(&format!("(block ${exit_label}"));
    w.indent();
    w.line(&format!("(loop ${label}"));
    w.indent();

    // Re-emit the header block's own straight-line instructions (the
    // condition computation), then branch out of the loop when false.
    let header_block = blocks[&header.0];
    for instr in &header_block.instructions {
        emit_instruction(w, module, instr);
    }
    w.line(&format!("(br_if ${exit_label} (i32.eqz (local.get {})))", var_symbol(condition)));

    emit_flow(w, module, blocks, body, None, Some((header, label.clone())));

    w.dedent();
    w.line(")");
    w.dedent();
    w.line(")");
}
