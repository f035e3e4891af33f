//! Instruction-level WAT text emission (§4.6 "Instruction emission").
//!
//! Every instruction is rendered in folded (nested S-expression) form:
//! operands are rendered first, as `local.get`/`global.get`/`<t>.const`
//! sub-forms, then wrapped by the opcode — post-order, exactly as the
//! stack machine would see them, just written as nesting instead of a
//! literal operand stack.

use crate::codegen::types::{field_symbol, func_symbol, global_symbol, heap_type, type_symbol, var_symbol};
use crate::ir::types::*;

/// Accumulates indented WAT text for one function body.
pub struct Writer {
    buf: String,
    indent: usize,
}

impl Writer {
    pub fn new(indent: usize) -> Self {
        Self { buf: String::new(), indent }
    }

    pub fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent -= 1;
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn get(var: VarId) -> String {
    format!("(local.get {})", var_symbol(var))
}

/// Renders one non-terminator instruction as a single line, either a bare
/// form (no result) or wrapped in `local.set` (result-producing).
pub fn emit_instruction(w: &mut Writer, module: &IrModule, instr: &IrInstr) {
    match instr {
        IrInstr::Const { dest, value } => set(w, *dest, const_text(value)),
        IrInstr::BinOp { dest, op, lhs, rhs } => set(w, *dest, format!("({} {} {})", binop_opcode(*op), get(*lhs), get(*rhs))),
        IrInstr::UnOp { dest, op, operand } => set(w, *dest, unop_text(*op, *operand)),
        IrInstr::Assign { dest, src } => set(w, *dest, get(*src)),
        IrInstr::Convert { dest, from, to, operand, signed } => {
            set(w, *dest, convert_text(from, to, *signed, *operand))
        }
        IrInstr::Call { dest, func, args } => {
            let name = func_symbol(*func, &module.function(*func).name);
            let text = format!("({name} {})", args.iter().map(|a| get(*a)).collect::<Vec<_>>().join(" "));
            match dest {
                Some(d) => set(w, *d, text),
                None => w.line(&text),
            }
        }
        IrInstr::CallRef { dest, sig, callee, args } => {
            let sig_sym = crate::codegen::types::func_sig_symbol(*sig);
            let mut operands: Vec<String> = args.iter().map(|a| get(*a)).collect();
            operands.push(get(*callee));
            let text = format!("(call_ref {sig_sym} {})", operands.join(" "));
            match dest {
                Some(d) => set(w, *d, text),
                None => w.line(&text),
            }
        }
        IrInstr::GlobalGet { dest, index } => {
            let sym = global_symbol(*index, &module.globals[index.as_u32() as usize].name);
            set(w, *dest, format!("(global.get {sym})"))
        }
        IrInstr::GlobalSet { index, value } => {
            let sym = global_symbol(*index, &module.globals[index.as_u32() as usize].name);
            w.line(&format!("(global.set {sym} {})", get(*value)))
        }
        IrInstr::StructNew { dest, type_idx, fields } => {
            let args = fields.iter().map(|f| get(*f)).collect::<Vec<_>>().join(" ");
            set(w, *dest, format!("(struct.new {} {args})", type_symbol(*type_idx)))
        }
        IrInstr::StructGet { dest, type_idx, field, object } => {
            let f = field_symbol(module, *type_idx, *field);
            set(w, *dest, format!("(struct.get {} {f} {})", type_symbol(*type_idx), get(*object)))
        }
        IrInstr::StructSet { type_idx, field, object, value } => {
            let f = field_symbol(module, *type_idx, *field);
            w.line(&format!("(struct.set {} {f} {} {})", type_symbol(*type_idx), get(*object), get(*value)))
        }
        IrInstr::ArrayNew { dest, type_idx, init, size } => {
            set(w, *dest, format!("(array.new {} {} {})", type_symbol(*type_idx), get(*init), get(*size)))
        }
        IrInstr::ArrayNewDefault { dest, type_idx, size } => {
            set(w, *dest, format!("(array.new_default {} {})", type_symbol(*type_idx), get(*size)))
        }
        IrInstr::ArrayGet { dest, type_idx, array, index } => {
            set(w, *dest, format!("(array.get {} {} {})", type_symbol(*type_idx), get(*array), get(*index)))
        }
        IrInstr::ArraySet { type_idx, array, index, value } => w.line(&format!(
            "(array.set {} {} {} {})",
            type_symbol(*type_idx),
            get(*array),
            get(*index),
            get(*value)
        )),
        IrInstr::ArrayLen { dest, array } => set(w, *dest, format!("(array.len {})", get(*array))),
        IrInstr::RefNull { dest, ty } => set(w, *dest, format!("(ref.null {})", heap_type(ty))),
        IrInstr::RefIsNull { dest, operand } => set(w, *dest, format!("(ref.is_null {})", get(*operand))),
        IrInstr::RefEq { dest, lhs, rhs } => set(w, *dest, format!("(ref.eq {} {})", get(*lhs), get(*rhs))),
        IrInstr::RefCast { dest, type_idx, operand } => {
            set(w, *dest, format!("(ref.cast {} {})", type_symbol(*type_idx), get(*operand)))
        }
        IrInstr::RefTest { dest, type_idx, operand } => {
            set(w, *dest, format!("(ref.test {} {})", type_symbol(*type_idx), get(*operand)))
        }
        IrInstr::I31New { dest, operand } => set(w, *dest, format!("(ref.i31 {})", get(*operand))),
        IrInstr::I31GetS { dest, operand } => set(w, *dest, format!("(i31.get_s {})", get(*operand))),
        IrInstr::FuncRef { dest, func } => {
            set(w, *dest, format!("(ref.func {})", func_symbol(*func, &module.function(*func).name)))
        }
        IrInstr::Select { dest, condition, if_true, if_false } => {
            set(w, *dest, format!("(select {} {} {})", get(*if_true), get(*if_false), get(*condition)))
        }
    }
}

fn set(w: &mut Writer, dest: VarId, value: String) {
    w.line(&format!("(local.set {} {value})", var_symbol(dest)));
}

fn const_text(value: &IrConst) -> String {
    match value {
        IrConst::I32(v) => format!("(i32.const {v})"),
        IrConst::I64(v) => format!("(i64.const {v})"),
        IrConst::F32(v) => format!("(f32.const {v})"),
        IrConst::F64(v) => format!("(f64.const {v})"),
    }
}

/// Wasm has no integer negation opcode; `i32.neg`/`i64.neg` are synthesised
/// as `0 - x`. Float negation and boolean `eqz` are native.
fn unop_text(op: UnOp, operand: VarId) -> String {
    let v = get(operand);
    match op {
        UnOp::I32Neg => format!("(i32.sub (i32.const 0) {v})"),
        UnOp::I64Neg => format!("(i64.sub (i64.const 0) {v})"),
        UnOp::F32Neg => format!("(f32.neg {v})"),
        UnOp::F64Neg => format!("(f64.neg {v})"),
        UnOp::I32Eqz => format!("(i32.eqz {v})"),
    }
}

fn binop_opcode(op: BinOp) -> &'static str {
    match op {
        BinOp::I32Add => "i32.add",
        BinOp::I32Sub => "i32.sub",
        BinOp::I32Mul => "i32.mul",
        BinOp::I32DivS => "i32.div_s",
        BinOp::I32DivU => "i32.div_u",
        BinOp::I32RemS => "i32.rem_s",
        BinOp::I32RemU => "i32.rem_u",
        BinOp::I32Eq => "i32.eq",
        BinOp::I32Ne => "i32.ne",
        BinOp::I32LtS => "i32.lt_s",
        BinOp::I32LtU => "i32.lt_u",
        BinOp::I32GtS => "i32.gt_s",
        BinOp::I32GtU => "i32.gt_u",
        BinOp::I32LeS => "i32.le_s",
        BinOp::I32LeU => "i32.le_u",
        BinOp::I32GeS => "i32.ge_s",
        BinOp::I32GeU => "i32.ge_u",
        BinOp::I32And => "i32.and",
        BinOp::I32Or => "i32.or",

        BinOp::I64Add => "i64.add",
        BinOp::I64Sub => "i64.sub",
        BinOp::I64Mul => "i64.mul",
        BinOp::I64DivS => "i64.div_s",
        BinOp::I64DivU => "i64.div_u",
        BinOp::I64RemS => "i64.rem_s",
        BinOp::I64RemU => "i64.rem_u",
        BinOp::I64Eq => "i64.eq",
        BinOp::I64Ne => "i64.ne",
        BinOp::I64LtS => "i64.lt_s",
        BinOp::I64LtU => "i64.lt_u",
        BinOp::I64GtS => "i64.gt_s",
        BinOp::I64GtU => "i64.gt_u",
        BinOp::I64LeS => "i64.le_s",
        BinOp::I64LeU => "i64.le_u",
        BinOp::I64GeS => "i64.ge_s",
        BinOp::I64GeU => "i64.ge_u",

        BinOp::F32Add => "f32.add",
        BinOp::F32Sub => "f32.sub",
        BinOp::F32Mul => "f32.mul",
        BinOp::F32Div => "f32.div",
        BinOp::F32Eq => "f32.eq",
        BinOp::F32Ne => "f32.ne",
        BinOp::F32Lt => "f32.lt",
        BinOp::F32Gt => "f32.gt",
        BinOp::F32Le => "f32.le",
        BinOp::F32Ge => "f32.ge",

        BinOp::F64Add => "f64.add",
        BinOp::F64Sub => "f64.sub",
        BinOp::F64Mul => "f64.mul",
        BinOp::F64Div => "f64.div",
        BinOp::F64Eq => "f64.eq",
        BinOp::F64Ne => "f64.ne",
        BinOp::F64Lt => "f64.lt",
        BinOp::F64Gt => "f64.gt",
        BinOp::F64Le => "f64.le",
        BinOp::F64Ge => "f64.ge",
    }
}

/// Picks the conversion opcode for a differing `(from, to)` `IrType` pair.
/// `signed` is the source int's signedness for int→int/int→float, or the
/// target int's signedness for float→int (see `ModuleBuilder::convert`).
fn convert_text(from: &IrType, to: &IrType, signed: bool, operand: VarId) -> String {
    let v = get(operand);
    let opcode = match (from, to) {
        (IrType::I32, IrType::I64) => if signed { "i64.extend_i32_s" } else { "i64.extend_i32_u" },
        (IrType::I64, IrType::I32) => "i32.wrap_i64",
        (IrType::I32, IrType::F32) => if signed { "f32.convert_i32_s" } else { "f32.convert_i32_u" },
        (IrType::I32, IrType::F64) => if signed { "f64.convert_i32_s" } else { "f64.convert_i32_u" },
        (IrType::I64, IrType::F32) => if signed { "f32.convert_i64_s" } else { "f32.convert_i64_u" },
        (IrType::I64, IrType::F64) => if signed { "f64.convert_i64_s" } else { "f64.convert_i64_u" },
        (IrType::F32, IrType::F64) => "f64.promote_f32",
        (IrType::F64, IrType::F32) => "f32.demote_f64",
        (IrType::F32, IrType::I32) => if signed { "i32.trunc_f32_s" } else { "i32.trunc_f32_u" },
        (IrType::F64, IrType::I32) => if signed { "i32.trunc_f64_s" } else { "i32.trunc_f64_u" },
        (IrType::F32, IrType::I64) => if signed { "i64.trunc_f32_s" } else { "i64.trunc_f32_u" },
        (IrType::F64, IrType::I64) => if signed { "i64.trunc_f64_s" } else { "i64.trunc_f64_u" },
        // Same IrType or a reference conversion: nothing to do, pass through.
        _ => return v,
    };
    format!("({opcode} {v})")
}

pub fn emit_return(w: &mut Writer, value: Option<VarId>) {
    match value {
        Some(v) => w.line(&format!("(return {})", get(v))),
        None => w.line("(return)"),
    }
}
