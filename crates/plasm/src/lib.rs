//! plasm — compiler from the plasm source language to WebAssembly-GC text
//! format (WAT).
//!
//! The pipeline is lexer → parser → name analysis → type analysis → IR
//! lowering → optimization passes → WAT emission, each phase accumulating
//! [`Diagnostic`]s rather than aborting on the first problem; [`compile`]
//! stops at the first phase that produced any.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod passes;
pub mod sema;

pub use anyhow::{Context, Result};
use diagnostics::Diagnostic;

/// Configuration threaded through the pipeline instead of ad hoc parameters.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Skip the optimization passes and emit WAT straight from the builder.
    pub emit_wat_only: bool,
    /// Dump each phase's diagnostics (and IR/WAT) as it runs.
    pub verbose: bool,
}

/// Everything a caller might want out of a successful compilation: the WAT
/// text plus the intermediate artefacts, useful for `-v` dumps and tests.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub wat: String,
    pub ir: ir::types::IrModule,
}

/// Runs the full pipeline over `source`, returning either the compiled
/// output or the diagnostics from the first phase that failed.
///
/// This is the single entry point both `main.rs` and the integration test
/// suite call, mirroring how a transpiler crate exposes one library
/// function wrapping its whole pipeline rather than making callers drive
/// each phase themselves.
pub fn compile(source: &str, options: &CompileOptions) -> std::result::Result<CompileOutput, Vec<Diagnostic>> {
    let (tokens, lex_diagnostics) = lexer::tokenize(source);
    if !lex_diagnostics.is_empty() {
        return Err(lex_diagnostics);
    }

    let (program, parse_diagnostics) = parser::parse(tokens);
    if !parse_diagnostics.is_empty() {
        return Err(parse_diagnostics);
    }

    let (analysis, sema_diagnostics) = sema::analyze(&program);
    if !sema_diagnostics.is_empty() {
        return Err(sema_diagnostics);
    }

    let mut module = ir::builder::build(&program, &analysis);
    if !options.emit_wat_only {
        passes::run_all(&mut module);
    }

    let wat = codegen::generate(&module);
    Ok(CompileOutput { wat, ir: module })
}

/// Convenience wrapper for callers that only want the WAT text and are
/// happy to format diagnostics themselves via [`diagnostics::render`].
pub fn compile_to_wat(source: &str) -> std::result::Result<String, Vec<Diagnostic>> {
    compile(source, &CompileOptions::default()).map(|out| out.wat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_trivial_function_to_wat() {
        let src = "fn main() i32 { return 0; }";
        let out = compile(src, &CompileOptions::default()).expect("should compile");
        assert!(out.wat.contains("(module"));
        assert!(out.wat.contains("(export \"_start\")"));
    }

    #[test]
    fn lexer_error_stops_the_pipeline() {
        let src = "fn main() i32 { return 0; } \"unterminated";
        let err = compile(src, &CompileOptions::default()).unwrap_err();
        assert!(!err.is_empty());
        assert_eq!(err[0].phase, diagnostics::Phase::Lexer);
    }

    #[test]
    fn parse_error_stops_before_sema() {
        let src = "fn main() i32 { return }";
        let err = compile(src, &CompileOptions::default()).unwrap_err();
        assert_eq!(err[0].phase, diagnostics::Phase::Parser);
    }
}
