//! Dead basic block elimination.
//!
//! Removes blocks unreachable from a function's entry block. These arise
//! naturally during lowering: an `if`/`while` arm that always returns or
//! traps leaves its merge/exit block with no remaining predecessor.

use std::collections::{HashMap, HashSet};

use crate::ir::types::{BlockId, IrBasicBlock, IrFunction, IrModule, IrTerminator};
use crate::passes::Pass;

pub struct DeadCode;

impl Pass for DeadCode {
    fn name(&self) -> &'static str {
        "dead_code"
    }

    fn run(&self, module: &mut IrModule) -> bool {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= eliminate(func);
        }
        changed
    }
}

fn successors(term: &IrTerminator) -> Vec<BlockId> {
    match term {
        IrTerminator::Return { .. } | IrTerminator::Unreachable => vec![],
        IrTerminator::Jump { target } => vec![*target],
        IrTerminator::BranchIf { if_true, if_false, .. } => vec![*if_true, *if_false],
    }
}

fn reachable_blocks(func: &IrFunction) -> HashSet<BlockId> {
    let block_map: HashMap<BlockId, &IrBasicBlock> = func.blocks.iter().map(|b| (b.id, b)).collect();
    let mut reachable = HashSet::new();
    let mut worklist = vec![func.entry_block];
    while let Some(id) = worklist.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(block) = block_map.get(&id) {
            worklist.extend(successors(&block.terminator));
        }
    }
    reachable
}

fn eliminate(func: &mut IrFunction) -> bool {
    let reachable = reachable_blocks(func);
    let before = func.blocks.len();
    func.blocks.retain(|b| reachable.contains(&b.id));
    func.blocks.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::VarId;

    fn make_func(blocks: Vec<IrBasicBlock>) -> IrFunction {
        IrFunction {
            name: "f".to_string(),
            params: vec![],
            locals: vec![],
            blocks,
            entry_block: BlockId(0),
            return_type: None,
            exported: false,
        }
    }

    #[test]
    fn removes_block_unreachable_after_return() {
        let mut func = make_func(vec![
            IrBasicBlock { id: BlockId(0), label: "entry".into(), instructions: vec![], terminator: IrTerminator::Return { value: None } },
            IrBasicBlock { id: BlockId(1), label: "merge".into(), instructions: vec![], terminator: IrTerminator::Return { value: None } },
        ]);
        assert!(eliminate(&mut func));
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].id, BlockId(0));
    }

    #[test]
    fn keeps_all_blocks_reachable_via_branch_if() {
        let mut func = make_func(vec![
            IrBasicBlock {
                id: BlockId(0),
                label: "entry".into(),
                instructions: vec![],
                terminator: IrTerminator::BranchIf { condition: VarId(0), if_true: BlockId(1), if_false: BlockId(2) },
            },
            IrBasicBlock { id: BlockId(1), label: "then".into(), instructions: vec![], terminator: IrTerminator::Jump { target: BlockId(2) } },
            IrBasicBlock { id: BlockId(2), label: "merge".into(), instructions: vec![], terminator: IrTerminator::Return { value: None } },
        ]);
        assert!(!eliminate(&mut func));
        assert_eq!(func.blocks.len(), 3);
    }

    #[test]
    fn transitively_dead_blocks_removed() {
        let mut func = make_func(vec![
            IrBasicBlock { id: BlockId(0), label: "entry".into(), instructions: vec![], terminator: IrTerminator::Return { value: None } },
            IrBasicBlock { id: BlockId(1), label: "dead".into(), instructions: vec![], terminator: IrTerminator::Jump { target: BlockId(2) } },
            IrBasicBlock { id: BlockId(2), label: "also_dead".into(), instructions: vec![], terminator: IrTerminator::Return { value: None } },
        ]);
        assert!(eliminate(&mut func));
        assert_eq!(func.blocks.len(), 1);
    }
}
