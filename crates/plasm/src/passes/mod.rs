//! IR pass manager (§4.7): a trivial ordered list of passes, each exposing
//! `name()` and `run(module) -> bool` (true if it modified the module).
//!
//! The visitor contract is pre-order over module → function → block →
//! instruction; passes that need it walk `IrModule::functions` and each
//! function's `blocks` in declaration order, the same order the IR builder
//! produced them in.

pub mod const_fold;
pub mod dead_code;

use crate::ir::types::IrModule;

/// One optimization pass over an `IrModule`.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Runs the pass once, returning whether it changed anything.
    fn run(&self, module: &mut IrModule) -> bool;
}

/// The bundled pass list, run in order until none of them report a change.
pub fn default_passes() -> Vec<Box<dyn Pass>> {
    vec![Box::new(const_fold::ConstFold), Box::new(dead_code::DeadCode)]
}

/// Runs every bundled pass to a fixpoint.
pub fn run_all(module: &mut IrModule) {
    loop {
        let mut changed = false;
        for pass in default_passes() {
            changed |= pass.run(module);
        }
        if !changed {
            break;
        }
    }
}
