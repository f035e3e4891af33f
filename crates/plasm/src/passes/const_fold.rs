//! Constant folding and propagation.
//!
//! Tracks which `VarId`s hold a known constant value within a block, then:
//! - propagates constants through `Assign` chains,
//! - folds `BinOp`/`UnOp` instructions whose operands are all known into a
//!   single `Const`.
//!
//! Constants are block-local: a value known at the end of one block is not
//! assumed known at the start of another, since the IR carries no
//! dominance information to justify that here.
//!
//! Folding never touches an operation that would trap at runtime (div/rem
//! by zero, signed division overflow) — the trap must still happen when
//! the code actually runs.

use std::collections::HashMap;

use crate::ir::types::{BinOp, IrConst, IrInstr, IrModule, UnOp, VarId};
use crate::passes::Pass;

pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "const_fold"
    }

    fn run(&self, module: &mut IrModule) -> bool {
        let mut changed = false;
        for func in &mut module.functions {
            for block in &mut func.blocks {
                let mut known: HashMap<VarId, IrConst> = HashMap::new();
                for instr in &mut block.instructions {
                    let folded_dest = fold_instr(instr, &known);
                    match folded_dest {
                        Some((dest, value)) => {
                            known.insert(dest, value);
                            changed = true;
                        }
                        None => {
                            if let Some(dest) = instr_dest(instr) {
                                known.remove(&dest);
                            }
                        }
                    }
                }
            }
        }
        changed
    }
}

/// If `instr` can be folded given `known`, rewrites it in place to a
/// `Const` and returns its destination and value.
fn fold_instr(instr: &mut IrInstr, known: &HashMap<VarId, IrConst>) -> Option<(VarId, IrConst)> {
    match instr {
        IrInstr::Const { dest, value } => Some((*dest, *value)),
        IrInstr::Assign { dest, src } => {
            let value = *known.get(src)?;
            let dest = *dest;
            *instr = IrInstr::Const { dest, value };
            Some((dest, value))
        }
        IrInstr::BinOp { dest, op, lhs, rhs } => {
            let lv = *known.get(lhs)?;
            let rv = *known.get(rhs)?;
            let value = try_eval_binop(*op, lv, rv)?;
            let dest = *dest;
            *instr = IrInstr::Const { dest, value };
            Some((dest, value))
        }
        IrInstr::UnOp { dest, op, operand } => {
            let value = *known.get(operand)?;
            let value = try_eval_unop(*op, value)?;
            let dest = *dest;
            *instr = IrInstr::Const { dest, value };
            Some((dest, value))
        }
        _ => None,
    }
}

/// The variable an instruction defines, for invalidation purposes — mirrors
/// the full match in `codegen::function::instr_dest_type` but only cares
/// about the identity of the destination, not its type.
fn instr_dest(instr: &IrInstr) -> Option<VarId> {
    match instr {
        IrInstr::Const { dest, .. }
        | IrInstr::BinOp { dest, .. }
        | IrInstr::UnOp { dest, .. }
        | IrInstr::Assign { dest, .. }
        | IrInstr::Convert { dest, .. }
        | IrInstr::GlobalGet { dest, .. }
        | IrInstr::StructNew { dest, .. }
        | IrInstr::StructGet { dest, .. }
        | IrInstr::ArrayNew { dest, .. }
        | IrInstr::ArrayNewDefault { dest, .. }
        | IrInstr::ArrayGet { dest, .. }
        | IrInstr::ArrayLen { dest, .. }
        | IrInstr::RefNull { dest, .. }
        | IrInstr::RefIsNull { dest, .. }
        | IrInstr::RefEq { dest, .. }
        | IrInstr::RefCast { dest, .. }
        | IrInstr::RefTest { dest, .. }
        | IrInstr::I31New { dest, .. }
        | IrInstr::I31GetS { dest, .. }
        | IrInstr::FuncRef { dest, .. }
        | IrInstr::Select { dest, .. } => Some(*dest),
        IrInstr::Call { dest, .. } | IrInstr::CallRef { dest, .. } => *dest,
        IrInstr::GlobalSet { .. } | IrInstr::StructSet { .. } | IrInstr::ArraySet { .. } => None,
    }
}

fn try_eval_binop(op: BinOp, lhs: IrConst, rhs: IrConst) -> Option<IrConst> {
    use BinOp::*;
    use IrConst::*;
    match (op, lhs, rhs) {
        (I32Add, I32(a), I32(b)) => Some(I32(a.wrapping_add(b))),
        (I32Sub, I32(a), I32(b)) => Some(I32(a.wrapping_sub(b))),
        (I32Mul, I32(a), I32(b)) => Some(I32(a.wrapping_mul(b))),
        (I32DivS, I32(a), I32(b)) => a.checked_div(b).map(I32),
        (I32DivU, I32(a), I32(b)) => (a as u32).checked_div(b as u32).map(|v| I32(v as i32)),
        (I32RemS, I32(a), I32(b)) => {
            if b == 0 {
                None
            } else if a == i32::MIN && b == -1 {
                Some(I32(0))
            } else {
                Some(I32(a % b))
            }
        }
        (I32RemU, I32(a), I32(b)) => (a as u32).checked_rem(b as u32).map(|v| I32(v as i32)),
        (I32And, I32(a), I32(b)) => Some(I32(a & b)),
        (I32Or, I32(a), I32(b)) => Some(I32(a | b)),
        (I32Eq, I32(a), I32(b)) => Some(I32((a == b) as i32)),
        (I32Ne, I32(a), I32(b)) => Some(I32((a != b) as i32)),
        (I32LtS, I32(a), I32(b)) => Some(I32((a < b) as i32)),
        (I32LtU, I32(a), I32(b)) => Some(I32(((a as u32) < (b as u32)) as i32)),
        (I32GtS, I32(a), I32(b)) => Some(I32((a > b) as i32)),
        (I32GtU, I32(a), I32(b)) => Some(I32(((a as u32) > (b as u32)) as i32)),
        (I32LeS, I32(a), I32(b)) => Some(I32((a <= b) as i32)),
        (I32LeU, I32(a), I32(b)) => Some(I32(((a as u32) <= (b as u32)) as i32)),
        (I32GeS, I32(a), I32(b)) => Some(I32((a >= b) as i32)),
        (I32GeU, I32(a), I32(b)) => Some(I32(((a as u32) >= (b as u32)) as i32)),

        (I64Add, I64(a), I64(b)) => Some(I64(a.wrapping_add(b))),
        (I64Sub, I64(a), I64(b)) => Some(I64(a.wrapping_sub(b))),
        (I64Mul, I64(a), I64(b)) => Some(I64(a.wrapping_mul(b))),
        (I64DivS, I64(a), I64(b)) => a.checked_div(b).map(I64),
        (I64DivU, I64(a), I64(b)) => (a as u64).checked_div(b as u64).map(|v| I64(v as i64)),
        (I64RemS, I64(a), I64(b)) => {
            if b == 0 {
                None
            } else if a == i64::MIN && b == -1 {
                Some(I64(0))
            } else {
                Some(I64(a % b))
            }
        }
        (I64RemU, I64(a), I64(b)) => (a as u64).checked_rem(b as u64).map(|v| I64(v as i64)),
        (I64Eq, I64(a), I64(b)) => Some(I32((a == b) as i32)),
        (I64Ne, I64(a), I64(b)) => Some(I32((a != b) as i32)),
        (I64LtS, I64(a), I64(b)) => Some(I32((a < b) as i32)),
        (I64LtU, I64(a), I64(b)) => Some(I32(((a as u64) < (b as u64)) as i32)),
        (I64GtS, I64(a), I64(b)) => Some(I32((a > b) as i32)),
        (I64GtU, I64(a), I64(b)) => Some(I32(((a as u64) > (b as u64)) as i32)),
        (I64LeS, I64(a), I64(b)) => Some(I32((a <= b) as i32)),
        (I64LeU, I64(a), I64(b)) => Some(I32(((a as u64) <= (b as u64)) as i32)),
        (I64GeS, I64(a), I64(b)) => Some(I32((a >= b) as i32)),
        (I64GeU, I64(a), I64(b)) => Some(I32(((a as u64) >= (b as u64)) as i32)),

        (F32Add, F32(a), F32(b)) => Some(F32(a + b)),
        (F32Sub, F32(a), F32(b)) => Some(F32(a - b)),
        (F32Mul, F32(a), F32(b)) => Some(F32(a * b)),
        (F32Div, F32(a), F32(b)) => Some(F32(a / b)),
        (F32Eq, F32(a), F32(b)) => Some(I32((a == b) as i32)),
        (F32Ne, F32(a), F32(b)) => Some(I32((a != b) as i32)),
        (F32Lt, F32(a), F32(b)) => Some(I32((a < b) as i32)),
        (F32Gt, F32(a), F32(b)) => Some(I32((a > b) as i32)),
        (F32Le, F32(a), F32(b)) => Some(I32((a <= b) as i32)),
        (F32Ge, F32(a), F32(b)) => Some(I32((a >= b) as i32)),

        (F64Add, F64(a), F64(b)) => Some(F64(a + b)),
        (F64Sub, F64(a), F64(b)) => Some(F64(a - b)),
        (F64Mul, F64(a), F64(b)) => Some(F64(a * b)),
        (F64Div, F64(a), F64(b)) => Some(F64(a / b)),
        (F64Eq, F64(a), F64(b)) => Some(I32((a == b) as i32)),
        (F64Ne, F64(a), F64(b)) => Some(I32((a != b) as i32)),
        (F64Lt, F64(a), F64(b)) => Some(I32((a < b) as i32)),
        (F64Gt, F64(a), F64(b)) => Some(I32((a > b) as i32)),
        (F64Le, F64(a), F64(b)) => Some(I32((a <= b) as i32)),
        (F64Ge, F64(a), F64(b)) => Some(I32((a >= b) as i32)),

        _ => None,
    }
}

fn try_eval_unop(op: UnOp, val: IrConst) -> Option<IrConst> {
    use IrConst::*;
    match (op, val) {
        (UnOp::I32Neg, I32(v)) => Some(I32(v.wrapping_neg())),
        (UnOp::I64Neg, I64(v)) => Some(I64(v.wrapping_neg())),
        (UnOp::F32Neg, F32(v)) => Some(F32(-v)),
        (UnOp::F64Neg, F64(v)) => Some(F64(-v)),
        (UnOp::I32Eqz, I32(v)) => Some(I32((v == 0) as i32)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{BlockId, IrBasicBlock, IrFunction, IrTerminator};

    fn make_func(instrs: Vec<IrInstr>) -> IrFunction {
        IrFunction {
            name: "f".to_string(),
            params: vec![],
            locals: vec![],
            blocks: vec![IrBasicBlock {
                id: BlockId(0),
                label: "entry".into(),
                instructions: instrs,
                terminator: IrTerminator::Return { value: None },
            }],
            entry_block: BlockId(0),
            return_type: None,
            exported: false,
        }
    }

    fn run_on(instrs: Vec<IrInstr>) -> IrFunction {
        let mut module = IrModule { functions: vec![make_func(instrs)], ..Default::default() };
        ConstFold.run(&mut module);
        module.functions.pop().unwrap()
    }

    #[test]
    fn folds_i32_add() {
        let func = run_on(vec![
            IrInstr::Const { dest: VarId(0), value: IrConst::I32(2) },
            IrInstr::Const { dest: VarId(1), value: IrConst::I32(3) },
            IrInstr::BinOp { dest: VarId(2), op: BinOp::I32Add, lhs: VarId(0), rhs: VarId(1) },
        ]);
        match func.blocks[0].instructions[2] {
            IrInstr::Const { value: IrConst::I32(5), .. } => {}
            ref other => panic!("expected Const(5), got {other:?}"),
        }
    }

    #[test]
    fn propagates_through_assign_chain() {
        let func = run_on(vec![
            IrInstr::Const { dest: VarId(0), value: IrConst::I32(7) },
            IrInstr::Assign { dest: VarId(1), src: VarId(0) },
            IrInstr::UnOp { dest: VarId(2), op: UnOp::I32Neg, operand: VarId(1) },
        ]);
        match func.blocks[0].instructions[2] {
            IrInstr::Const { value: IrConst::I32(-7), .. } => {}
            ref other => panic!("expected Const(-7), got {other:?}"),
        }
    }

    #[test]
    fn div_by_zero_not_folded() {
        let func = run_on(vec![
            IrInstr::Const { dest: VarId(0), value: IrConst::I32(10) },
            IrInstr::Const { dest: VarId(1), value: IrConst::I32(0) },
            IrInstr::BinOp { dest: VarId(2), op: BinOp::I32DivS, lhs: VarId(0), rhs: VarId(1) },
        ]);
        assert!(matches!(func.blocks[0].instructions[2], IrInstr::BinOp { .. }));
    }

    #[test]
    fn reassignment_invalidates_known_value() {
        // v0 starts const, gets overwritten by a non-const load, then is
        // used — the second use must not see the stale constant.
        let func = run_on(vec![
            IrInstr::Const { dest: VarId(0), value: IrConst::I32(1) },
            IrInstr::GlobalGet { dest: VarId(0), index: crate::ir::types::GlobalIdx::new(0) },
            IrInstr::UnOp { dest: VarId(1), op: UnOp::I32Eqz, operand: VarId(0) },
        ]);
        assert!(matches!(func.blocks[0].instructions[2], IrInstr::UnOp { .. }));
    }
}
