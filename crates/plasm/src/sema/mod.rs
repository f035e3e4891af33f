//! Semantic analysis: name resolution followed by type checking (§4.3, §4.4).

pub mod checker;
pub mod name;
pub mod types;

use crate::ast::{Program, TypeTable};
use crate::diagnostics::Diagnostic;

/// Result of running both semantic phases over a parsed program.
pub struct Analysis {
    pub names: name::NameResolution,
    pub types: TypeTable,
}

/// Runs name analysis, then (only if it found nothing fatal) type
/// analysis. Returns the combined diagnostics from whichever phases ran.
pub fn analyze(program: &Program) -> (Analysis, Vec<Diagnostic>) {
    let names = name::analyze(program);
    if !names.diagnostics.is_empty() {
        let diagnostics = names.diagnostics.clone();
        return (
            Analysis { names, types: TypeTable::new() },
            diagnostics,
        );
    }

    let (types, type_diagnostics) = checker::check(program, &names);
    (Analysis { names, types }, type_diagnostics)
}
