//! Statement and expression lowering, walking an already type-checked AST
//! against a [`ModuleBuilder`]/[`FunctionBuilder`] pair (§4.5).
//!
//! Every expression's `PlasmType` is read back out of the checker's
//! node-type side-table rather than re-inferred here — lowering trusts that
//! table completely, which is the point of keeping it as a side-table
//! instead of baking a type field into every `Expr` variant.

use super::core::{FunctionBuilder, ModuleBuilder};
use crate::ast::*;
use crate::ir::types::*;
use crate::sema::checker::type_from_spec;
use crate::sema::types::{can_implicitly_upcast, PlasmType};

fn node_ty(fb: &FunctionBuilder, id: NodeId) -> PlasmType {
    fb.node_types.get(&id).cloned().unwrap_or(PlasmType::Any)
}

pub fn lower_block(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, block: &Block) {
    fb.push_scope();
    for stmt in &block.statements {
        if fb.current_is_terminated() {
            break;
        }
        lower_stmt(mb, fb, stmt);
    }
    fb.pop_scope();
}

fn lower_stmt(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, stmt: &Stmt) {
    match stmt {
        Stmt::Block(b) => lower_block(mb, fb, b),
        Stmt::VarDecl { ty, bindings, .. } => {
            let declared = ty.as_ref().map(type_from_spec);
            for binding in bindings {
                match &binding.init {
                    Some(init) => {
                        let init_ty = node_ty(fb, init.id);
                        let var_ty = declared.clone().unwrap_or_else(|| init_ty.clone());
                        let value = lower_expr_value(mb, fb, init);
                        let value = mb.convert(fb, value, &init_ty, &var_ty);
                        let ir_ty = mb.to_ir_type(&var_ty);
                        fb.declare_local(&binding.name, value, ir_ty, var_ty);
                    }
                    None => {
                        let var_ty = declared.clone().unwrap_or(PlasmType::Any);
                        let value = mb.default_value(fb, &var_ty);
                        let ir_ty = mb.to_ir_type(&var_ty);
                        fb.declare_local(&binding.name, value, ir_ty, var_ty);
                    }
                }
            }
        }
        Stmt::If { condition, then_branch, else_branch, .. } => {
            let cond = lower_expr_value(mb, fb, condition);
            let then_blk = fb.new_block("then");
            let merge_blk = fb.new_block("merge");
            let else_blk = else_branch.as_ref().map(|_| fb.new_block("else"));
            fb.terminate(IrTerminator::BranchIf {
                condition: cond,
                if_true: then_blk,
                if_false: else_blk.unwrap_or(merge_blk),
            });

            fb.switch_to(then_blk);
            lower_stmt(mb, fb, then_branch);
            if !fb.current_is_terminated() {
                fb.terminate(IrTerminator::Jump { target: merge_blk });
            }

            if let (Some(else_blk), Some(else_branch)) = (else_blk, else_branch) {
                fb.switch_to(else_blk);
                lower_stmt(mb, fb, else_branch);
                if !fb.current_is_terminated() {
                    fb.terminate(IrTerminator::Jump { target: merge_blk });
                }
            }

            fb.switch_to(merge_blk);
        }
        Stmt::While { condition, body, .. } => {
            let header = fb.new_block("while_header");
            let body_blk = fb.new_block("while_body");
            let exit = fb.new_block("while_exit");

            fb.terminate(IrTerminator::Jump { target: header });

            fb.switch_to(header);
            let cond = lower_expr_value(mb, fb, condition);
            fb.terminate(IrTerminator::BranchIf { condition: cond, if_true: body_blk, if_false: exit });

            fb.switch_to(body_blk);
            lower_stmt(mb, fb, body);
            if !fb.current_is_terminated() {
                fb.terminate(IrTerminator::Jump { target: header });
            }

            fb.switch_to(exit);
        }
        Stmt::Return { value, .. } => {
            let target_ty = fb.return_type.clone();
            let converted = value.as_ref().map(|v| {
                let v_ty = node_ty(fb, v.id);
                let val = lower_expr_value(mb, fb, v);
                mb.convert(fb, val, &v_ty, &target_ty)
            });
            fb.terminate(IrTerminator::Return { value: converted });
        }
        Stmt::Expression { expr, .. } => {
            lower_expr(mb, fb, expr);
        }
    }
}

/// Lowers an expression, returning `None` for a `void`-typed one (a call to
/// a procedure/function that declares no return value).
pub fn lower_expr(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, expr: &Expr) -> Option<VarId> {
    match &expr.kind {
        ExprKind::Literal(lit) => Some(lower_literal(mb, fb, lit, expr)),
        ExprKind::Identifier(name) => Some(lower_identifier(mb, fb, name)),
        ExprKind::ProcIdentifier(name) => Some(lower_identifier(mb, fb, name)),
        ExprKind::SelfExpr => fb.lookup("self").map(|(v, _)| v),
        ExprKind::Binary { op, left, right } => Some(lower_binary(mb, fb, *op, left, right, expr)),
        ExprKind::Unary { op, operand } => Some(lower_unary(mb, fb, *op, operand)),
        ExprKind::Call { callee, args } => lower_call(mb, fb, callee, args),
        ExprKind::Member { target, name } => lower_member(mb, fb, target, name),
        ExprKind::Tuple(elems) => Some(lower_tuple(mb, fb, elems, expr)),
        ExprKind::ConstructorCall { class_name, args } => lower_constructor_call(mb, fb, class_name, args),
        ExprKind::Cast { expr: inner, .. } => Some(lower_cast(mb, fb, inner, expr)),
        ExprKind::TypeTest { expr: inner, target } => Some(lower_type_test(mb, fb, inner, target)),
        ExprKind::Assign { target, value } => Some(lower_assign(mb, fb, target, value)),
        ExprKind::Lambda { params, body } => Some(lower_lambda(mb, fb, params, body, expr)),
        ExprKind::ArrayAlloc { element_type, size } => Some(lower_array_alloc(mb, fb, element_type, size)),
        ExprKind::ArrayIndex { array, index } => Some(lower_array_index(mb, fb, array, index, expr)),
        ExprKind::ArrayLiteral(elems) => Some(lower_array_literal(mb, fb, elems, expr)),
        ExprKind::StringInterpolation(parts) => Some(lower_string_interpolation(mb, fb, parts)),
    }
}

/// Like [`lower_expr`], but for positions where the checker already
/// guarantees a non-`void` value (operands, initialisers, arguments).
fn lower_expr_value(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, expr: &Expr) -> VarId {
    lower_expr(mb, fb, expr).expect("non-void expression must lower to a value")
}

fn lower_literal(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, lit: &Literal, expr: &Expr) -> VarId {
    let ty = node_ty(fb, expr.id);
    let ir_ty = mb.to_ir_type(&ty);
    let dest = fb.new_var();
    match lit {
        Literal::Int(v) => {
            let value = match ir_ty {
                IrType::I64 => IrConst::I64(*v),
                IrType::F32 => IrConst::F32(*v as f32),
                IrType::F64 => IrConst::F64(*v as f64),
                _ => IrConst::I32(*v as i32),
            };
            fb.emit(IrInstr::Const { dest, value });
        }
        Literal::Float(v) => {
            let value = if matches!(ir_ty, IrType::F32) { IrConst::F32(*v as f32) } else { IrConst::F64(*v) };
            fb.emit(IrInstr::Const { dest, value });
        }
        Literal::Bool(b) => fb.emit(IrInstr::Const { dest, value: IrConst::I32(*b as i32) }),
        Literal::Str(s) => return lower_string_literal(mb, fb, s),
    }
    dest
}

fn lower_string_literal(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, s: &str) -> VarId {
    let byte_ty = mb.byte_array_type_idx();
    let len = s.len() as i32;
    let len_var = fb.new_var();
    fb.emit(IrInstr::Const { dest: len_var, value: IrConst::I32(len) });
    let arr_var = fb.new_var();
    fb.emit(IrInstr::ArrayNewDefault { dest: arr_var, type_idx: byte_ty, size: len_var });
    for (i, byte) in s.bytes().enumerate() {
        let idx_var = fb.new_var();
        fb.emit(IrInstr::Const { dest: idx_var, value: IrConst::I32(i as i32) });
        let val_var = fb.new_var();
        fb.emit(IrInstr::Const { dest: val_var, value: IrConst::I32(byte as i32) });
        fb.emit(IrInstr::ArraySet { type_idx: byte_ty, array: arr_var, index: idx_var, value: val_var });
    }
    let string_ty = mb.string_type_idx();
    let dest = fb.new_var();
    fb.emit(IrInstr::StructNew { dest, type_idx: string_ty, fields: vec![arr_var, len_var] });
    dest
}

fn lower_identifier(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, name: &str) -> VarId {
    if let Some((var, _)) = fb.lookup(name) {
        return var;
    }
    if let Some(&idx) = mb.const_index.get(name) {
        let dest = fb.new_var();
        fb.emit(IrInstr::GlobalGet { dest, index: idx });
        return dest;
    }
    if let Some(&idx) = mb.func_index.get(name) {
        let dest = fb.new_var();
        fb.emit(IrInstr::FuncRef { dest, func: idx });
        return dest;
    }
    // Name analysis guarantees every reachable identifier resolves; this is
    // only reached for an already-diagnosed program.
    let dest = fb.new_var();
    fb.emit(IrInstr::Const { dest, value: IrConst::I32(0) });
    dest
}

enum NumKind {
    I32,
    I64,
    F32,
    F64,
}

fn num_kind(ty: &PlasmType) -> NumKind {
    match ty {
        PlasmType::F32 => NumKind::F32,
        PlasmType::F64 => NumKind::F64,
        _ if ty.bit_width() == Some(64) && ty.is_integer() => NumKind::I64,
        _ => NumKind::I32,
    }
}

/// Common operand type for converting both sides before a comparison opcode.
/// Comparisons always produce `bool` regardless of operand width, so this
/// only picks the wider side to avoid truncating one operand before the
/// check; it has no bearing on the expression's own result type.
fn wider(a: &PlasmType, b: &PlasmType) -> PlasmType {
    if can_implicitly_upcast(a, b) {
        b.clone()
    } else {
        a.clone()
    }
}

fn lower_binary(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, op: BinOpKind, left: &Expr, right: &Expr, expr: &Expr) -> VarId {
    let lhs_ty = node_ty(fb, left.id);
    let rhs_ty = node_ty(fb, right.id);

    if let PlasmType::Class(class_name) = &lhs_ty {
        let has_overload = mb
            .global_scope
            .classes
            .get(class_name)
            .map(|c| c.operators.contains_key(&op.as_op_symbol()))
            .unwrap_or(false);
        if has_overload {
            let self_var = lower_expr_value(mb, fb, left);
            let rhs_var = lower_expr_value(mb, fb, right);
            let func_name = format!("{class_name}_op_{}", op.as_op_symbol().mangled());
            let func_idx = mb.func_index[&func_name];
            let dest = fb.new_var();
            fb.emit(IrInstr::Call { dest: Some(dest), func: func_idx, args: vec![self_var, rhs_var] });
            return dest;
        }
    }

    let lhs_var = lower_expr_value(mb, fb, left);
    let rhs_var = lower_expr_value(mb, fb, right);

    if matches!(op, BinOpKind::And | BinOpKind::Or) {
        let dest = fb.new_var();
        let ir_op = if matches!(op, BinOpKind::And) { BinOp::I32And } else { BinOp::I32Or };
        fb.emit(IrInstr::BinOp { dest, op: ir_op, lhs: lhs_var, rhs: rhs_var });
        return dest;
    }

    // Arithmetic's result type is the checker's recorded type for this node
    // (the left operand's type, per the language's default-arithmetic rule)
    // rather than a type this pass re-derives on its own; comparisons still
    // pick the wider side purely to choose a safe common conversion target,
    // since their own result is always `bool` regardless of operand width.
    let is_comparison = matches!(op, BinOpKind::Eq | BinOpKind::Ne | BinOpKind::Lt | BinOpKind::Gt | BinOpKind::Le | BinOpKind::Ge);
    let operand_ty = if is_comparison { wider(&lhs_ty, &rhs_ty) } else { node_ty(fb, expr.id) };
    let lhs_var = mb.convert(fb, lhs_var, &lhs_ty, &operand_ty);
    let rhs_var = mb.convert(fb, rhs_var, &rhs_ty, &operand_ty);

    if matches!(op, BinOpKind::Mod) && operand_ty.is_float() {
        return lower_float_rem(fb, lhs_var, rhs_var, &operand_ty);
    }

    let dest = fb.new_var();
    let ir_op = select_binop(op, &operand_ty);
    fb.emit(IrInstr::BinOp { dest, op: ir_op, lhs: lhs_var, rhs: rhs_var });
    dest
}

/// Wasm has no native float remainder opcode; folded here as
/// `a - trunc(a / b) * b` using only instructions the IR already defines.
fn lower_float_rem(fb: &mut FunctionBuilder, lhs: VarId, rhs: VarId, ty: &PlasmType) -> VarId {
    let is_f32 = matches!(ty, PlasmType::F32);
    let (float_ty, int_ty, div_op, mul_op, sub_op) = if is_f32 {
        (IrType::F32, IrType::I32, BinOp::F32Div, BinOp::F32Mul, BinOp::F32Sub)
    } else {
        (IrType::F64, IrType::I64, BinOp::F64Div, BinOp::F64Mul, BinOp::F64Sub)
    };

    let quotient = fb.new_var();
    fb.emit(IrInstr::BinOp { dest: quotient, op: div_op, lhs, rhs });
    let trunc_int = fb.new_var();
    fb.emit(IrInstr::Convert { dest: trunc_int, from: float_ty.clone(), to: int_ty.clone(), operand: quotient, signed: true });
    let trunc_float = fb.new_var();
    fb.emit(IrInstr::Convert { dest: trunc_float, from: int_ty, to: float_ty, operand: trunc_int, signed: true });
    let product = fb.new_var();
    fb.emit(IrInstr::BinOp { dest: product, op: mul_op, lhs: trunc_float, rhs });
    let dest = fb.new_var();
    fb.emit(IrInstr::BinOp { dest, op: sub_op, lhs, rhs: product });
    dest
}

fn select_binop(op: BinOpKind, ty: &PlasmType) -> BinOp {
    let signed = ty.is_signed();
    match (num_kind(ty), op) {
        (NumKind::I32, BinOpKind::Add) => BinOp::I32Add,
        (NumKind::I32, BinOpKind::Sub) => BinOp::I32Sub,
        (NumKind::I32, BinOpKind::Mul) => BinOp::I32Mul,
        (NumKind::I32, BinOpKind::Div) => if signed { BinOp::I32DivS } else { BinOp::I32DivU },
        (NumKind::I32, BinOpKind::Mod) => if signed { BinOp::I32RemS } else { BinOp::I32RemU },
        (NumKind::I32, BinOpKind::Eq) => BinOp::I32Eq,
        (NumKind::I32, BinOpKind::Ne) => BinOp::I32Ne,
        (NumKind::I32, BinOpKind::Lt) => if signed { BinOp::I32LtS } else { BinOp::I32LtU },
        (NumKind::I32, BinOpKind::Gt) => if signed { BinOp::I32GtS } else { BinOp::I32GtU },
        (NumKind::I32, BinOpKind::Le) => if signed { BinOp::I32LeS } else { BinOp::I32LeU },
        (NumKind::I32, BinOpKind::Ge) => if signed { BinOp::I32GeS } else { BinOp::I32GeU },

        (NumKind::I64, BinOpKind::Add) => BinOp::I64Add,
        (NumKind::I64, BinOpKind::Sub) => BinOp::I64Sub,
        (NumKind::I64, BinOpKind::Mul) => BinOp::I64Mul,
        (NumKind::I64, BinOpKind::Div) => if signed { BinOp::I64DivS } else { BinOp::I64DivU },
        (NumKind::I64, BinOpKind::Mod) => if signed { BinOp::I64RemS } else { BinOp::I64RemU },
        (NumKind::I64, BinOpKind::Eq) => BinOp::I64Eq,
        (NumKind::I64, BinOpKind::Ne) => BinOp::I64Ne,
        (NumKind::I64, BinOpKind::Lt) => if signed { BinOp::I64LtS } else { BinOp::I64LtU },
        (NumKind::I64, BinOpKind::Gt) => if signed { BinOp::I64GtS } else { BinOp::I64GtU },
        (NumKind::I64, BinOpKind::Le) => if signed { BinOp::I64LeS } else { BinOp::I64LeU },
        (NumKind::I64, BinOpKind::Ge) => if signed { BinOp::I64GeS } else { BinOp::I64GeU },

        (NumKind::F32, BinOpKind::Add) => BinOp::F32Add,
        (NumKind::F32, BinOpKind::Sub) => BinOp::F32Sub,
        (NumKind::F32, BinOpKind::Mul) => BinOp::F32Mul,
        (NumKind::F32, BinOpKind::Div) => BinOp::F32Div,
        (NumKind::F32, BinOpKind::Eq) => BinOp::F32Eq,
        (NumKind::F32, BinOpKind::Ne) => BinOp::F32Ne,
        (NumKind::F32, BinOpKind::Lt) => BinOp::F32Lt,
        (NumKind::F32, BinOpKind::Gt) => BinOp::F32Gt,
        (NumKind::F32, BinOpKind::Le) => BinOp::F32Le,
        (NumKind::F32, BinOpKind::Ge) => BinOp::F32Ge,

        (NumKind::F64, BinOpKind::Add) => BinOp::F64Add,
        (NumKind::F64, BinOpKind::Sub) => BinOp::F64Sub,
        (NumKind::F64, BinOpKind::Mul) => BinOp::F64Mul,
        (NumKind::F64, BinOpKind::Div) => BinOp::F64Div,
        (NumKind::F64, BinOpKind::Eq) => BinOp::F64Eq,
        (NumKind::F64, BinOpKind::Ne) => BinOp::F64Ne,
        (NumKind::F64, BinOpKind::Lt) => BinOp::F64Lt,
        (NumKind::F64, BinOpKind::Gt) => BinOp::F64Gt,
        (NumKind::F64, BinOpKind::Le) => BinOp::F64Le,
        (NumKind::F64, BinOpKind::Ge) => BinOp::F64Ge,

        (_, BinOpKind::And) => BinOp::I32And,
        (_, BinOpKind::Or) => BinOp::I32Or,
        (NumKind::I32, BinOpKind::Mod) => BinOp::I32RemS,
        (NumKind::I64, BinOpKind::Mod) => BinOp::I64RemS,
        (_, BinOpKind::Mod) => BinOp::I32RemS,
    }
}

fn lower_unary(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, op: UnOpKind, operand: &Expr) -> VarId {
    let ty = node_ty(fb, operand.id);
    let value = lower_expr_value(mb, fb, operand);
    let dest = fb.new_var();
    match op {
        UnOpKind::Not => fb.emit(IrInstr::UnOp { dest, op: UnOp::I32Eqz, operand: value }),
        UnOpKind::Neg => {
            let ir_op = match num_kind(&ty) {
                NumKind::I32 => UnOp::I32Neg,
                NumKind::I64 => UnOp::I64Neg,
                NumKind::F32 => UnOp::F32Neg,
                NumKind::F64 => UnOp::F64Neg,
            };
            fb.emit(IrInstr::UnOp { dest, op: ir_op, operand: value });
        }
    }
    dest
}

fn lower_call(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, callee: &Expr, args: &[Expr]) -> Option<VarId> {
    if let ExprKind::Identifier(name) | ExprKind::ProcIdentifier(name) = &callee.kind {
        if mb.global_scope.classes.contains_key(name) && fb.lookup(name).is_none() {
            return lower_constructor_call(mb, fb, name, args);
        }
        if fb.lookup(name).is_none() {
            if let Some(&func_idx) = mb.func_index.get(name) {
                return lower_direct_call(mb, fb, func_idx, args);
            }
        }
    }

    if let ExprKind::Member { target, name } = &callee.kind {
        let target_ty = node_ty(fb, target.id);
        if let PlasmType::Class(class_name) = &target_ty {
            let func_name = format!("{class_name}_{name}");
            if let Some(&func_idx) = mb.func_index.get(&func_name) {
                let self_var = lower_expr_value(mb, fb, target);
                return lower_direct_call_with_self(mb, fb, func_idx, self_var, args);
            }
        }
    }

    lower_indirect_call(mb, fb, callee, args)
}

fn lower_direct_call(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, func_idx: FuncIdx, args: &[Expr]) -> Option<VarId> {
    let arg_vars: Vec<VarId> = args.iter().map(|a| lower_expr_value(mb, fb, a)).collect();
    emit_call(mb, fb, func_idx, arg_vars)
}

fn lower_direct_call_with_self(
    mb: &mut ModuleBuilder,
    fb: &mut FunctionBuilder,
    func_idx: FuncIdx,
    self_var: VarId,
    args: &[Expr],
) -> Option<VarId> {
    let mut arg_vars = vec![self_var];
    arg_vars.extend(args.iter().map(|a| lower_expr_value(mb, fb, a)));
    emit_call(mb, fb, func_idx, arg_vars)
}

fn emit_call(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, func_idx: FuncIdx, args: Vec<VarId>) -> Option<VarId> {
    let has_ret = mb.module.function(func_idx).return_type.is_some();
    if has_ret {
        let dest = fb.new_var();
        fb.emit(IrInstr::Call { dest: Some(dest), func: func_idx, args });
        Some(dest)
    } else {
        fb.emit(IrInstr::Call { dest: None, func: func_idx, args });
        None
    }
}

fn lower_indirect_call(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, callee: &Expr, args: &[Expr]) -> Option<VarId> {
    let callee_ty = node_ty(fb, callee.id);
    let (param_tys, ret_ty) = match &callee_ty {
        PlasmType::Function { params, ret } => (params.clone(), (**ret).clone()),
        _ => (Vec::new(), PlasmType::Void),
    };
    let callee_var = lower_expr_value(mb, fb, callee);
    let arg_vars: Vec<VarId> = args.iter().map(|a| lower_expr_value(mb, fb, a)).collect();
    let sig_params: Vec<IrType> = param_tys.iter().map(|t| mb.to_ir_type(t)).collect();
    let ret_ir = if ret_ty == PlasmType::Void { None } else { Some(mb.to_ir_type(&ret_ty)) };
    let sig = mb.module.intern_func_sig(IrFuncSig { params: sig_params, ret: ret_ir.clone() });
    if ret_ir.is_some() {
        let dest = fb.new_var();
        fb.emit(IrInstr::CallRef { dest: Some(dest), sig, callee: callee_var, args: arg_vars });
        Some(dest)
    } else {
        fb.emit(IrInstr::CallRef { dest: None, sig, callee: callee_var, args: arg_vars });
        None
    }
}

fn lower_constructor_call(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, class_name: &str, args: &[Expr]) -> Option<VarId> {
    let Some(class) = mb.global_scope.classes.get(class_name).cloned() else {
        for a in args {
            lower_expr(mb, fb, a);
        }
        return None;
    };
    if class.constructors.is_empty() {
        for a in args {
            lower_expr(mb, fb, a);
        }
        let layout = mb.classes.get(class_name).cloned();
        return layout.map(|l| {
            let fields: Vec<VarId> = l.field_types.clone().iter().map(|t| mb.default_value(fb, t)).collect();
            let dest = fb.new_var();
            fb.emit(IrInstr::StructNew { dest, type_idx: l.type_idx, fields });
            dest
        });
    }

    let arg_types: Vec<PlasmType> = args.iter().map(|a| node_ty(fb, a.id)).collect();
    let ctor_idx = class
        .constructors
        .iter()
        .enumerate()
        .filter(|(_, c)| c.params.len() == args.len())
        .find(|(_, c)| {
            c.params
                .iter()
                .zip(&arg_types)
                .all(|(p, a)| can_implicitly_upcast(a, &type_from_spec(&p.ty)))
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let layout = mb.classes.get(class_name).cloned().unwrap();
    let field_vars: Vec<VarId> = layout.field_types.clone().iter().map(|t| mb.default_value(fb, t)).collect();
    let self_var = fb.new_var();
    fb.emit(IrInstr::StructNew { dest: self_var, type_idx: layout.type_idx, fields: field_vars });

    let arg_vars: Vec<VarId> = args.iter().map(|a| lower_expr_value(mb, fb, a)).collect();
    let mut call_args = vec![self_var];
    call_args.extend(arg_vars);

    let func_name = format!("{class_name}_constructor_{ctor_idx}");
    let func_idx = mb.func_index[&func_name];
    fb.emit(IrInstr::Call { dest: None, func: func_idx, args: call_args });

    Some(self_var)
}

fn lower_member(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, target: &Expr, name: &str) -> Option<VarId> {
    let target_ty = node_ty(fb, target.id);
    if let PlasmType::Class(class_name) = &target_ty {
        if let Some(layout) = mb.classes.get(class_name).cloned() {
            if let Some(&field_idx) = layout.field_index.get(name) {
                let obj = lower_expr_value(mb, fb, target);
                let dest = fb.new_var();
                fb.emit(IrInstr::StructGet {
                    dest,
                    type_idx: layout.type_idx,
                    field: FieldIdx::new(field_idx),
                    object: obj,
                });
                return Some(dest);
            }
        }
        // Method referenced as a value (not in call position): yields an
        // unbound funcref — the method's implicit `self` is not captured,
        // matching the limited closure model lambdas already have.
        let func_name = format!("{class_name}_{name}");
        if let Some(&func_idx) = mb.func_index.get(&func_name) {
            lower_expr(mb, fb, target);
            let dest = fb.new_var();
            fb.emit(IrInstr::FuncRef { dest, func: func_idx });
            return Some(dest);
        }
    }
    if name == "length" {
        if let PlasmType::Array(_) = &target_ty {
            let arr = lower_expr_value(mb, fb, target);
            let dest = fb.new_var();
            fb.emit(IrInstr::ArrayLen { dest, array: arr });
            return Some(dest);
        }
    }
    lower_expr(mb, fb, target)
}

fn lower_tuple(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, elems: &[Expr], expr: &Expr) -> VarId {
    let elem_tys: Vec<PlasmType> = elems.iter().map(|e| node_ty(fb, e.id)).collect();
    let _ = expr;
    let type_idx = mb.tuple_type_idx(&elem_tys);
    let fields: Vec<VarId> = elems.iter().map(|e| lower_expr_value(mb, fb, e)).collect();
    let dest = fb.new_var();
    fb.emit(IrInstr::StructNew { dest, type_idx, fields });
    dest
}

fn lower_cast(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, inner: &Expr, expr: &Expr) -> VarId {
    let inner_ty = node_ty(fb, inner.id);
    let target_ty = node_ty(fb, expr.id);
    let value = lower_expr_value(mb, fb, inner);
    mb.convert(fb, value, &inner_ty, &target_ty)
}

fn lower_type_test(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, inner: &Expr, target: &TypeSpec) -> VarId {
    let inner_ty = node_ty(fb, inner.id);
    let target_ty = type_from_spec(target);
    let value = lower_expr_value(mb, fb, inner);
    if let PlasmType::Class(class_name) = &target_ty {
        if let Some(layout) = mb.classes.get(class_name).cloned() {
            let dest = fb.new_var();
            fb.emit(IrInstr::RefTest { dest, type_idx: layout.type_idx, operand: value });
            return dest;
        }
    }
    let dest = fb.new_var();
    fb.emit(IrInstr::Const { dest, value: IrConst::I32((inner_ty == target_ty) as i32) });
    dest
}

fn lower_assign(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, target: &str, value: &Expr) -> VarId {
    let (target_var, target_ty) = fb.lookup(target).unwrap_or_else(|| (fb.new_var(), PlasmType::Any));
    let value_ty = node_ty(fb, value.id);
    let val = lower_expr_value(mb, fb, value);
    let converted = mb.convert(fb, val, &value_ty, &target_ty);
    fb.emit(IrInstr::Assign { dest: target_var, src: converted });
    target_var
}

fn lower_lambda(mb: &mut ModuleBuilder, fb_outer: &mut FunctionBuilder, params: &[LambdaParam], body: &LambdaBody, expr: &Expr) -> VarId {
    let lambda_ty = node_ty(fb_outer, expr.id);
    let (param_tys, ret_ty) = match &lambda_ty {
        PlasmType::Function { params, ret } => (params.clone(), (**ret).clone()),
        _ => (params.iter().map(|p| type_from_spec(&p.ty)).collect(), PlasmType::Void),
    };

    let name = mb.next_lambda_name();
    let ir_ret = if ret_ty == PlasmType::Void { None } else { Some(mb.to_ir_type(&ret_ty)) };

    let mut lfb = FunctionBuilder::new(fb_outer.node_types.clone());
    lfb.return_type = ret_ty;
    let mut ir_params = Vec::new();
    for (p, pty) in params.iter().zip(&param_tys) {
        let ir_pty = mb.to_ir_type(pty);
        let var = lfb.new_var();
        lfb.declare_param(&p.name, var, pty.clone());
        ir_params.push((var, ir_pty));
    }

    match body {
        LambdaBody::Expr(e) => {
            let v = lower_expr(mb, &mut lfb, e);
            lfb.terminate(IrTerminator::Return { value: v });
        }
        LambdaBody::Block(b) => {
            lower_block(mb, &mut lfb, b);
            if !lfb.current_is_terminated() {
                lfb.terminate(IrTerminator::Return { value: None });
            }
        }
    }

    let func = IrFunction {
        name: name.clone(),
        params: ir_params,
        locals: lfb.locals,
        blocks: lfb.blocks,
        entry_block: BlockId(0),
        return_type: ir_ret,
        exported: false,
    };
    let func_idx = mb.module.push_function(func);
    mb.func_index.insert(name, func_idx);

    let dest = fb_outer.new_var();
    fb_outer.emit(IrInstr::FuncRef { dest, func: func_idx });
    dest
}

fn lower_array_alloc(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, element_type: &TypeSpec, size: &Expr) -> VarId {
    let elem_ty = type_from_spec(element_type);
    let type_idx = mb.array_type_idx(&elem_ty);
    let size_var = lower_expr_value(mb, fb, size);
    let dest = fb.new_var();
    fb.emit(IrInstr::ArrayNewDefault { dest, type_idx, size: size_var });
    dest
}

fn lower_array_index(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, array: &Expr, index: &Expr, expr: &Expr) -> VarId {
    let elem_ty = node_ty(fb, expr.id);
    let type_idx = mb.array_type_idx(&elem_ty);
    let array_var = lower_expr_value(mb, fb, array);
    let index_var = lower_expr_value(mb, fb, index);
    let dest = fb.new_var();
    fb.emit(IrInstr::ArrayGet { dest, type_idx, array: array_var, index: index_var });
    dest
}

fn lower_array_literal(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, elems: &[Expr], expr: &Expr) -> VarId {
    let array_ty = node_ty(fb, expr.id);
    let elem_ty = match array_ty {
        PlasmType::Array(elem) => *elem,
        _ => PlasmType::Any,
    };
    let type_idx = mb.array_type_idx(&elem_ty);
    let len_var = fb.new_var();
    fb.emit(IrInstr::Const { dest: len_var, value: IrConst::I32(elems.len() as i32) });
    let arr_var = fb.new_var();
    fb.emit(IrInstr::ArrayNewDefault { dest: arr_var, type_idx, size: len_var });
    for (i, elem) in elems.iter().enumerate() {
        let elem_ty_actual = node_ty(fb, elem.id);
        let value = lower_expr_value(mb, fb, elem);
        let value = mb.convert(fb, value, &elem_ty_actual, &elem_ty);
        let idx_var = fb.new_var();
        fb.emit(IrInstr::Const { dest: idx_var, value: IrConst::I32(i as i32) });
        fb.emit(IrInstr::ArraySet { type_idx, array: arr_var, index: idx_var, value });
    }
    arr_var
}

fn lower_string_interpolation(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, parts: &[StringPart]) -> VarId {
    let mut acc: Option<VarId> = None;
    for part in parts {
        let piece = match part {
            StringPart::Text(s) => lower_string_literal(mb, fb, s),
            StringPart::Expr(e) => lower_expr_value(mb, fb, e),
        };
        acc = Some(match acc {
            None => piece,
            Some(prev) => concat_strings(mb, fb, prev, piece),
        });
    }
    acc.unwrap_or_else(|| lower_string_literal(mb, fb, ""))
}

fn concat_strings(mb: &mut ModuleBuilder, fb: &mut FunctionBuilder, a: VarId, b: VarId) -> VarId {
    let string_idx = mb.string_type_idx();
    let byte_idx = mb.byte_array_type_idx();

    let len_a = fb.new_var();
    fb.emit(IrInstr::StructGet { dest: len_a, type_idx: string_idx, field: FieldIdx::new(1), object: a });
    let len_b = fb.new_var();
    fb.emit(IrInstr::StructGet { dest: len_b, type_idx: string_idx, field: FieldIdx::new(1), object: b });
    let data_a = fb.new_var();
    fb.emit(IrInstr::StructGet { dest: data_a, type_idx: string_idx, field: FieldIdx::new(0), object: a });
    let data_b = fb.new_var();
    fb.emit(IrInstr::StructGet { dest: data_b, type_idx: string_idx, field: FieldIdx::new(0), object: b });

    let total_len = fb.new_var();
    fb.emit(IrInstr::BinOp { dest: total_len, op: BinOp::I32Add, lhs: len_a, rhs: len_b });
    let out_arr = fb.new_var();
    fb.emit(IrInstr::ArrayNewDefault { dest: out_arr, type_idx: byte_idx, size: total_len });

    copy_array_range(fb, byte_idx, data_a, out_arr, len_a, None);
    copy_array_range(fb, byte_idx, data_b, out_arr, len_b, Some(len_a));

    let dest = fb.new_var();
    fb.emit(IrInstr::StructNew { dest, type_idx: string_idx, fields: vec![out_arr, total_len] });
    dest
}

/// Copies `len` elements from `src` into `dst`, starting at `dst[0]` or, if
/// `dest_offset` is given, at `dst[dest_offset]` — the second half of a
/// string concatenation's copy.
fn copy_array_range(
    fb: &mut FunctionBuilder,
    type_idx: TypeDefIdx,
    src: VarId,
    dst: VarId,
    len: VarId,
    dest_offset: Option<VarId>,
) {
    let i_var = fb.new_var();
    let zero = fb.new_var();
    fb.emit(IrInstr::Const { dest: zero, value: IrConst::I32(0) });
    fb.emit(IrInstr::Assign { dest: i_var, src: zero });

    let header = fb.new_block("while_header");
    let body = fb.new_block("while_body");
    let exit = fb.new_block("while_exit");
    fb.terminate(IrTerminator::Jump { target: header });

    fb.switch_to(header);
    let cond = fb.new_var();
    fb.emit(IrInstr::BinOp { dest: cond, op: BinOp::I32LtS, lhs: i_var, rhs: len });
    fb.terminate(IrTerminator::BranchIf { condition: cond, if_true: body, if_false: exit });

    fb.switch_to(body);
    let elem = fb.new_var();
    fb.emit(IrInstr::ArrayGet { dest: elem, type_idx, array: src, index: i_var });
    let dst_index = match dest_offset {
        None => i_var,
        Some(offset) => {
            let d = fb.new_var();
            fb.emit(IrInstr::BinOp { dest: d, op: BinOp::I32Add, lhs: offset, rhs: i_var });
            d
        }
    };
    fb.emit(IrInstr::ArraySet { type_idx, array: dst, index: dst_index, value: elem });
    let one = fb.new_var();
    fb.emit(IrInstr::Const { dest: one, value: IrConst::I32(1) });
    let next_i = fb.new_var();
    fb.emit(IrInstr::BinOp { dest: next_i, op: BinOp::I32Add, lhs: i_var, rhs: one });
    fb.emit(IrInstr::Assign { dest: i_var, src: next_i });
    fb.terminate(IrTerminator::Jump { target: header });

    fb.switch_to(exit);
}
