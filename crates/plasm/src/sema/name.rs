//! Name analysis: builds the global symbol table, resolves every
//! identifier to a binding, and reports duplicate-declaration /
//! undefined-identifier / illegal-assignment-target / unknown-class errors
//! (§4.3).
//!
//! Type analysis (`checker.rs`) runs afterwards and trusts that every
//! identifier it sees already resolved cleanly here.

use std::collections::HashMap;

use crate::ast::*;
use crate::diagnostics::{Diagnostic, Phase};

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub fields: HashMap<String, FieldDecl>,
    pub field_order: Vec<String>,
    pub constructors: Vec<ConstructorDecl>,
    pub operators: HashMap<OpSymbol, OperatorDecl>,
    pub methods: HashMap<String, ClassMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Const,
    Function,
    Procedure,
    Class,
    Param,
    Local { is_final: bool },
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: BindingKind,
    pub declared_at_node: Option<NodeId>,
}

/// Top-level symbol table: every name a program declares at global scope.
#[derive(Debug, Default)]
pub struct GlobalScope {
    pub consts: HashMap<String, ConstDecl>,
    pub functions: HashMap<String, FunctionDecl>,
    pub procedures: HashMap<String, ProcedureDecl>,
    pub classes: HashMap<String, ClassInfo>,
}

/// A single lexical block: parameters or `let`/`final` bindings introduced
/// in the current function/procedure/constructor/lambda body.
#[derive(Debug, Default)]
struct LocalScope {
    bindings: HashMap<String, BindingKind>,
}

/// Chain of nested local scopes, innermost last.
pub struct ScopeStack {
    scopes: Vec<LocalScope>,
}

impl ScopeStack {
    fn new() -> Self {
        Self { scopes: vec![LocalScope::default()] }
    }

    fn push(&mut self) {
        self.scopes.push(LocalScope::default());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, kind: BindingKind) {
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .bindings
            .insert(name.to_string(), kind);
    }

    fn resolve_local(&self, name: &str) -> Option<BindingKind> {
        self.scopes.iter().rev().find_map(|s| s.bindings.get(name).copied())
    }
}

pub struct NameResolution {
    pub global: GlobalScope,
    /// Resolution recorded for every `ExprKind::Identifier` node, keyed by
    /// its `NodeId`, consumed by the type checker instead of re-walking
    /// scopes.
    pub resolutions: HashMap<NodeId, BindingKind>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn analyze(program: &Program) -> NameResolution {
    let mut global = GlobalScope::default();
    let mut diagnostics = Vec::new();

    for decl in &program.declarations {
        match decl {
            Declaration::Const(c) => {
                if global.consts.contains_key(&c.name) || global_name_taken(&global, &c.name) {
                    diagnostics.push(dup_error(Phase::Name, c.line, c.column, &c.name));
                } else {
                    global.consts.insert(c.name.clone(), c.clone());
                }
            }
            Declaration::Function(f) => {
                if global.functions.contains_key(&f.name) || global_name_taken(&global, &f.name) {
                    diagnostics.push(dup_error(Phase::Name, f.line, f.column, &f.name));
                } else {
                    global.functions.insert(f.name.clone(), f.clone());
                }
            }
            Declaration::Procedure(p) => {
                if global.procedures.contains_key(&p.name) || global_name_taken(&global, &p.name) {
                    diagnostics.push(dup_error(Phase::Name, p.line, p.column, &p.name));
                } else {
                    global.procedures.insert(p.name.clone(), p.clone());
                }
            }
            Declaration::Class(c) => {
                if global.classes.contains_key(&c.name) || global_name_taken(&global, &c.name) {
                    diagnostics.push(dup_error(Phase::Name, c.line, c.column, &c.name));
                    continue;
                }
                let info = build_class_info(c, &mut diagnostics);
                global.classes.insert(c.name.clone(), info);
            }
        }
    }

    let mut resolutions = HashMap::new();

    for decl in &program.declarations {
        match decl {
            Declaration::Function(f) => {
                walk_function_like(&f.params, &f.body, &global, &mut resolutions, &mut diagnostics)
            }
            Declaration::Procedure(p) => {
                walk_function_like(&p.params, &p.body, &global, &mut resolutions, &mut diagnostics)
            }
            Declaration::Class(c) => {
                for ctor in &c.constructors {
                    let mut scope = ScopeStack::new();
                    scope.declare("self", BindingKind::Param);
                    for p in &ctor.params {
                        scope.declare(&p.name, BindingKind::Param);
                    }
                    walk_block(&ctor.body, &global, &mut scope, &mut resolutions, &mut diagnostics);
                }
                for op in &c.operators {
                    let mut scope = ScopeStack::new();
                    scope.declare("self", BindingKind::Param);
                    scope.declare(&op.param.name, BindingKind::Param);
                    walk_block(&op.body, &global, &mut scope, &mut resolutions, &mut diagnostics);
                }
                for m in &c.methods {
                    match m {
                        ClassMethod::Function(f) => {
                            let mut scope = ScopeStack::new();
                            scope.declare("self", BindingKind::Param);
                            for p in &f.params {
                                scope.declare(&p.name, BindingKind::Param);
                            }
                            walk_block(&f.body, &global, &mut scope, &mut resolutions, &mut diagnostics);
                        }
                        ClassMethod::Procedure(p) => {
                            let mut scope = ScopeStack::new();
                            scope.declare("self", BindingKind::Param);
                            for param in &p.params {
                                scope.declare(&param.name, BindingKind::Param);
                            }
                            walk_block(&p.body, &global, &mut scope, &mut resolutions, &mut diagnostics);
                        }
                    }
                }
            }
            Declaration::Const(_) => {}
        }
    }

    NameResolution { global, resolutions, diagnostics }
}

fn global_name_taken(global: &GlobalScope, name: &str) -> bool {
    global.functions.contains_key(name) || global.procedures.contains_key(name) || global.classes.contains_key(name)
}

fn dup_error(phase: Phase, line: u32, column: u32, name: &str) -> Diagnostic {
    Diagnostic::new(phase, line, column, format!("'{name}' is already declared"))
}

fn build_class_info(decl: &ClassDecl, diagnostics: &mut Vec<Diagnostic>) -> ClassInfo {
    let mut fields = HashMap::new();
    let mut field_order = Vec::new();
    for field in &decl.fields {
        if fields.contains_key(&field.name) {
            diagnostics.push(dup_error(Phase::Name, field.line, field.column, &field.name));
            continue;
        }
        field_order.push(field.name.clone());
        fields.insert(field.name.clone(), field.clone());
    }

    let mut operators = HashMap::new();
    for op in &decl.operators {
        if operators.contains_key(&op.symbol) {
            diagnostics.push(dup_error(Phase::Name, op.line, op.column, op.symbol.mangled()));
            continue;
        }
        operators.insert(op.symbol, op.clone());
    }

    let mut methods = HashMap::new();
    for m in &decl.methods {
        let (name, line, column) = match m {
            ClassMethod::Function(f) => (f.name.clone(), f.line, f.column),
            ClassMethod::Procedure(p) => (p.name.clone(), p.line, p.column),
        };
        if methods.contains_key(&name) || fields.contains_key(&name) {
            diagnostics.push(dup_error(Phase::Name, line, column, &name));
            continue;
        }
        methods.insert(name, m.clone());
    }

    ClassInfo {
        name: decl.name.clone(),
        fields,
        field_order,
        constructors: decl.constructors.clone(),
        operators,
        methods,
    }
}

fn walk_function_like(
    params: &[Param],
    body: &Block,
    global: &GlobalScope,
    resolutions: &mut HashMap<NodeId, BindingKind>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut scope = ScopeStack::new();
    for p in params {
        scope.declare(&p.name, BindingKind::Param);
    }
    walk_block(body, global, &mut scope, resolutions, diagnostics);
}

fn walk_block(
    block: &Block,
    global: &GlobalScope,
    scope: &mut ScopeStack,
    resolutions: &mut HashMap<NodeId, BindingKind>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    scope.push();
    for stmt in &block.statements {
        walk_stmt(stmt, global, scope, resolutions, diagnostics);
    }
    scope.pop();
}

fn walk_stmt(
    stmt: &Stmt,
    global: &GlobalScope,
    scope: &mut ScopeStack,
    resolutions: &mut HashMap<NodeId, BindingKind>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match stmt {
        Stmt::Block(b) => walk_block(b, global, scope, resolutions, diagnostics),
        Stmt::VarDecl { is_final, bindings, .. } => {
            for binding in bindings {
                if let Some(init) = &binding.init {
                    walk_expr(init, global, scope, resolutions, diagnostics);
                }
                scope.declare(&binding.name, BindingKind::Local { is_final: *is_final });
            }
        }
        Stmt::If { condition, then_branch, else_branch, .. } => {
            walk_expr(condition, global, scope, resolutions, diagnostics);
            walk_stmt(then_branch, global, scope, resolutions, diagnostics);
            if let Some(else_branch) = else_branch {
                walk_stmt(else_branch, global, scope, resolutions, diagnostics);
            }
        }
        Stmt::While { condition, body, .. } => {
            walk_expr(condition, global, scope, resolutions, diagnostics);
            walk_stmt(body, global, scope, resolutions, diagnostics);
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                walk_expr(value, global, scope, resolutions, diagnostics);
            }
        }
        Stmt::Expression { expr, .. } => walk_expr(expr, global, scope, resolutions, diagnostics),
    }
}

fn walk_expr(
    expr: &Expr,
    global: &GlobalScope,
    scope: &mut ScopeStack,
    resolutions: &mut HashMap<NodeId, BindingKind>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match &expr.kind {
        ExprKind::Identifier(name) | ExprKind::ProcIdentifier(name) => {
            if let Some(kind) = resolve_name(global, scope, name) {
                resolutions.insert(expr.id, kind);
            } else {
                diagnostics.push(Diagnostic::new(
                    Phase::Name,
                    expr.line,
                    expr.column,
                    format!("undefined identifier '{name}'"),
                ));
            }
        }
        ExprKind::Literal(_) | ExprKind::SelfExpr => {}
        ExprKind::Binary { left, right, .. } => {
            walk_expr(left, global, scope, resolutions, diagnostics);
            walk_expr(right, global, scope, resolutions, diagnostics);
        }
        ExprKind::Unary { operand, .. } => walk_expr(operand, global, scope, resolutions, diagnostics),
        ExprKind::Call { callee, args } => {
            walk_expr(callee, global, scope, resolutions, diagnostics);
            for a in args {
                walk_expr(a, global, scope, resolutions, diagnostics);
            }
        }
        ExprKind::Member { target, .. } => walk_expr(target, global, scope, resolutions, diagnostics),
        ExprKind::Tuple(elems) | ExprKind::ArrayLiteral(elems) => {
            for e in elems {
                walk_expr(e, global, scope, resolutions, diagnostics);
            }
        }
        ExprKind::ConstructorCall { class_name, args } => {
            if !global.classes.contains_key(class_name) {
                diagnostics.push(Diagnostic::new(
                    Phase::Name,
                    expr.line,
                    expr.column,
                    format!("unknown class '{class_name}'"),
                ));
            }
            for a in args {
                walk_expr(a, global, scope, resolutions, diagnostics);
            }
        }
        ExprKind::Cast { expr: inner, .. } | ExprKind::TypeTest { expr: inner, .. } => {
            walk_expr(inner, global, scope, resolutions, diagnostics);
        }
        ExprKind::Assign { target, value } => {
            walk_expr(value, global, scope, resolutions, diagnostics);
            match resolve_name(global, scope, target) {
                Some(BindingKind::Local { is_final: true }) => {
                    diagnostics.push(Diagnostic::new(
                        Phase::Name,
                        expr.line,
                        expr.column,
                        format!("cannot assign to final binding '{target}'"),
                    ));
                }
                Some(BindingKind::Const) | Some(BindingKind::Function) | Some(BindingKind::Procedure)
                | Some(BindingKind::Class) => {
                    diagnostics.push(Diagnostic::new(
                        Phase::Name,
                        expr.line,
                        expr.column,
                        format!("'{target}' is not an assignable binding"),
                    ));
                }
                Some(BindingKind::Param) | Some(BindingKind::Local { is_final: false }) => {
                    resolutions.insert(expr.id, BindingKind::Local { is_final: false });
                }
                None => {
                    diagnostics.push(Diagnostic::new(
                        Phase::Name,
                        expr.line,
                        expr.column,
                        format!("undefined identifier '{target}'"),
                    ));
                }
            }
        }
        ExprKind::Lambda { params, body } => {
            scope.push();
            for p in params {
                scope.declare(&p.name, BindingKind::Param);
            }
            match body {
                LambdaBody::Expr(e) => walk_expr(e, global, scope, resolutions, diagnostics),
                LambdaBody::Block(b) => {
                    for stmt in &b.statements {
                        walk_stmt(stmt, global, scope, resolutions, diagnostics);
                    }
                }
            }
            scope.pop();
        }
        ExprKind::ArrayAlloc { size, .. } => walk_expr(size, global, scope, resolutions, diagnostics),
        ExprKind::ArrayIndex { array, index } => {
            walk_expr(array, global, scope, resolutions, diagnostics);
            walk_expr(index, global, scope, resolutions, diagnostics);
        }
        ExprKind::StringInterpolation(parts) => {
            for part in parts {
                if let StringPart::Expr(e) = part {
                    walk_expr(e, global, scope, resolutions, diagnostics);
                }
            }
        }
    }
}

fn resolve_name(global: &GlobalScope, scope: &ScopeStack, name: &str) -> Option<BindingKind> {
    if let Some(kind) = scope.resolve_local(name) {
        return Some(kind);
    }
    if global.consts.contains_key(name) {
        return Some(BindingKind::Const);
    }
    if global.functions.contains_key(name) {
        return Some(BindingKind::Function);
    }
    if global.procedures.contains_key(name) {
        return Some(BindingKind::Procedure);
    }
    if global.classes.contains_key(name) {
        return Some(BindingKind::Class);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn analyze_src(src: &str) -> NameResolution {
        let (tokens, _) = tokenize(src);
        let (program, parse_diags) = parse(tokens);
        assert!(parse_diags.is_empty(), "{parse_diags:?}");
        analyze(&program)
    }

    #[test]
    fn duplicate_top_level_name_is_reported() {
        let res = analyze_src("const x = 1; const x = 2;");
        assert!(res.diagnostics.iter().any(|d| d.message.contains("already declared")));
    }

    #[test]
    fn undefined_identifier_is_reported() {
        let res = analyze_src("fn t() u64 { return missing; }");
        assert!(res.diagnostics.iter().any(|d| d.message.contains("undefined identifier")));
    }

    #[test]
    fn assignment_to_final_is_rejected() {
        let res = analyze_src("fn t() void { final x = 1; x = 2; }");
        assert!(res.diagnostics.iter().any(|d| d.message.contains("final")));
    }

    #[test]
    fn constructor_call_to_unknown_class_is_reported() {
        let res = analyze_src("fn t() void { let p = Missing(1); }");
        // `Missing(1)` parses as a Call over an Identifier, not a
        // ConstructorCall — still caught, but as an undefined identifier.
        assert!(res.diagnostics.iter().any(|d| d.message.contains("undefined identifier")));
    }
}
