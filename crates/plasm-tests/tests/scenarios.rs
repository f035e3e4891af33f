//! End-to-end integration tests for the plasm compiler.
//!
//! These exercise the full pipeline (lex → parse → sema → IR → WAT) against
//! the concrete scenarios a correct implementation is expected to handle.

use anyhow::Result;
use plasm::{compile, diagnostics::Phase, CompileOptions};

fn compile_ok(src: &str) -> plasm::CompileOutput {
    match compile(src, &CompileOptions::default()) {
        Ok(out) => out,
        Err(diags) => panic!("expected zero diagnostics, got: {diags:?}"),
    }
}

fn compile_err(src: &str) -> Vec<plasm::diagnostics::Diagnostic> {
    match compile(src, &CompileOptions::default()) {
        Ok(out) => panic!("expected a diagnostic, compiled successfully to:\n{}", out.wat),
        Err(diags) => diags,
    }
}

#[test]
fn const_and_function() {
    let out = compile_ok("const x = 42; fn add(u64 a, u64 b) u64 { return a + b; }");

    let global = out.ir.globals.iter().find(|g| g.name == "x").expect("global x");
    assert_eq!(global.init.to_string(), "42");

    let add = out.ir.functions.iter().find(|f| f.name == "add").expect("function add");
    assert_eq!(add.params.len(), 2);

    assert!(out.wat.contains("(global $x i64 (i64.const 42))"));
    assert!(out.wat.contains("(param $a i64)"));
    assert!(out.wat.contains("(param $b i64)"));
    assert!(out.wat.contains("(result i64)"));
    assert!(out.wat.contains("i64.add"));
}

#[test]
fn implicit_upcast_is_accepted() {
    compile_ok("fn t() u16 { final u8 x = 10; final u16 y = x; return y; }");
}

#[test]
fn forbidden_implicit_cast_is_rejected() {
    let diags = compile_err("fn t() i64 { final u64 x = 100; final i64 y = x; return y; }");
    assert!(diags.iter().any(|d| d.message.contains("cannot assign")), "{diags:?}");
    assert!(diags.iter().all(|d| d.phase == Phase::Type));
}

#[test]
fn explicit_downcast_via_as() {
    let out = compile_ok("fn t() u8 { final u64 x = 100; return x as u8; }");
    assert!(out.wat.contains("(result i32)"));
    assert!(out.wat.contains("i32.wrap_i64") || out.wat.contains("wrap"));
}

#[test]
fn operator_overload_dispatches_through_a_call() {
    let src = r#"
        class Point {
            final u64 x;
            final u64 y;
            op(+)(Point other) Point { return self; }
        }
        fn t(Point a, Point b) Point { return a + b; }
    "#;
    let out = compile_ok(src);

    let op_fn = out.ir.functions.iter().find(|f| f.name == "Point_op_add").expect("Point_op_add");
    assert_eq!(op_fn.params.len(), 2, "implicit self plus other");

    let t_fn = out.ir.functions.iter().find(|f| f.name == "t").expect("function t");
    let calls_op_add = t_fn.blocks.iter().flat_map(|b| &b.instructions).any(|instr| {
        matches!(instr, plasm::ir::types::IrInstr::Call { func, .. }
            if out.ir.function(*func).name == "Point_op_add")
    });
    assert!(calls_op_add, "a + b should lower to a call to Point_op_add, not an arithmetic opcode");
}

#[test]
fn lambda_typing_and_call() {
    let out = compile_ok("fn t() u64 { final f = @(u64 x) => x + 1; return f(42 as u64); }");
    assert!(
        out.ir.functions.iter().any(|f| f.name.starts_with("__lambda_")),
        "expected a lifted __lambda_<n> function"
    );
    assert!(out.wat.contains("call_ref"));
}

#[test]
fn wrong_lambda_arity_is_rejected() {
    let diags = compile_err("fn t() u64 { final f = @(u64 x, u64 y) => x + y; return f(42); }");
    assert!(diags.iter().any(|d| d.message.contains("argument(s)")), "{diags:?}");
}

#[test]
fn cast_chain_associates_left() {
    compile_ok("fn t() u8 { return 1 as u32 as u8; }");
}

#[test]
fn missing_semicolon_after_return_is_reported() {
    let diags = compile_err("fn t() void { return }");
    assert_eq!(diags[0].phase, Phase::Parser);
}

#[test]
fn class_with_no_constructors_reports_it() {
    let diags = compile_err("class Empty { } fn t() void { Empty(); }");
    assert!(diags.iter().any(|d| d.message.contains("no constructors")), "{diags:?}");
}

#[test]
fn generated_wat_parses_as_a_valid_module() -> Result<()> {
    let out = compile_ok("const x = 42; fn add(u64 a, u64 b) u64 { return a + b; }");
    wat::parse_str(&out.wat)?;
    Ok(())
}

#[test]
fn if_else_where_both_arms_return_does_not_panic_codegen() {
    // The merge block following this if/else is never jumped to (both arms
    // return directly), so the dead-code pass prunes it from the function;
    // codegen must tolerate the resulting gap rather than assume it exists.
    let out = compile_ok("fn t(bool c) i32 { if (c) { return 1; } else { return 2; } }");
    assert!(out.wat.contains("(if"));
    wat::parse_str(&out.wat).expect("pruned merge block must still produce valid WAT");
}

#[test]
fn class_with_fields_emits_valid_wat_with_named_fields() {
    let src = r#"
        class Point {
            final u64 x;
            final u64 y;
        }
        fn t(Point p) Point { return p; }
    "#;
    let out = compile_ok(src);
    assert!(out.wat.contains("(field $x (mut i64))"));
    assert!(out.wat.contains("(field $y (mut i64))"));
    wat::parse_str(&out.wat).expect("struct with named fields must produce valid WAT");
}

#[test]
fn func_count_matches_ir_module() {
    let out = compile_ok("fn a() void { } fn b() void { a(); }");
    let func_entries = out.wat.matches("(func ").count();
    assert_eq!(func_entries, out.ir.functions.len());
}
