//! Type analysis: walks the AST once more (after name analysis has
//! resolved every identifier) to infer and check the type of every
//! expression, filling the node-type side-table and reporting condition/
//! return/assignment/operator/constructor/call/array-element mismatches
//! (§4.4).

use std::collections::HashMap;

use crate::ast::*;
use crate::diagnostics::{Diagnostic, Phase};
use crate::sema::name::{ClassInfo, GlobalScope, NameResolution};
use crate::sema::types::{can_implicitly_upcast, PlasmType};

pub fn type_from_spec(spec: &TypeSpec) -> PlasmType {
    match spec {
        TypeSpec::Void => PlasmType::Void,
        TypeSpec::Any => PlasmType::Any,
        TypeSpec::Tuple(elems) => PlasmType::Tuple(elems.iter().map(type_from_spec).collect()),
        TypeSpec::Function { params, ret } => PlasmType::Function {
            params: params.iter().map(type_from_spec).collect(),
            ret: Box::new(type_from_spec(ret)),
        },
        TypeSpec::Generic { name, args } if name == "array" && args.len() == 1 => {
            PlasmType::Array(Box::new(type_from_spec(&args[0])))
        }
        TypeSpec::Generic { name, .. } => PlasmType::Class(name.clone()),
        TypeSpec::Simple(name) => match name.as_str() {
            "u8" => PlasmType::U8,
            "u16" => PlasmType::U16,
            "u32" => PlasmType::U32,
            "u64" => PlasmType::U64,
            "i8" => PlasmType::I8,
            "i16" => PlasmType::I16,
            "i32" => PlasmType::I32,
            "i64" => PlasmType::I64,
            "f32" => PlasmType::F32,
            "f64" => PlasmType::F64,
            "bool" => PlasmType::Bool,
            "string" => PlasmType::String,
            other => PlasmType::Class(other.to_string()),
        },
    }
}

struct LocalScopes {
    scopes: Vec<HashMap<String, PlasmType>>,
}

impl LocalScopes {
    fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }
    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }
    fn pop(&mut self) {
        self.scopes.pop();
    }
    fn declare(&mut self, name: &str, ty: PlasmType) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), ty);
    }
    fn lookup(&self, name: &str) -> Option<&PlasmType> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}

struct Checker<'a> {
    global: &'a GlobalScope,
    current_class: Option<&'a ClassInfo>,
    return_type: PlasmType,
    locals: LocalScopes,
    types: HashMap<NodeId, PlasmType>,
    diagnostics: Vec<Diagnostic>,
}

pub fn check(program: &Program, names: &NameResolution) -> (HashMap<NodeId, PlasmType>, Vec<Diagnostic>) {
    let mut checker = Checker {
        global: &names.global,
        current_class: None,
        return_type: PlasmType::Void,
        locals: LocalScopes::new(),
        types: HashMap::new(),
        diagnostics: Vec::new(),
    };

    for decl in &program.declarations {
        match decl {
            Declaration::Const(c) => {
                checker.locals = LocalScopes::new();
                checker.check_expr(&c.value);
            }
            Declaration::Function(f) => checker.check_function(f),
            Declaration::Procedure(p) => checker.check_procedure(p),
            Declaration::Class(c) => checker.check_class(c, &names.global),
        }
    }

    (checker.types, checker.diagnostics)
}

impl<'a> Checker<'a> {
    fn error(&mut self, line: u32, column: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(Phase::Type, line, column, message));
    }

    fn record(&mut self, id: NodeId, ty: PlasmType) -> PlasmType {
        self.types.insert(id, ty.clone());
        ty
    }

    fn check_function(&mut self, f: &FunctionDecl) {
        self.current_class = None;
        self.return_type = type_from_spec(&f.return_type);
        self.locals = LocalScopes::new();
        for p in &f.params {
            self.locals.declare(&p.name, type_from_spec(&p.ty));
        }
        self.check_block(&f.body);
    }

    fn check_procedure(&mut self, p: &ProcedureDecl) {
        self.current_class = None;
        self.return_type = type_from_spec(&p.return_type);
        self.locals = LocalScopes::new();
        for param in &p.params {
            self.locals.declare(&param.name, type_from_spec(&param.ty));
        }
        self.check_block(&p.body);
    }

    fn check_class(&mut self, c: &ClassDecl, global: &'a GlobalScope) {
        let info = &global.classes[&c.name];
        self.current_class = Some(info);
        let self_ty = PlasmType::Class(c.name.clone());

        for ctor in &c.constructors {
            self.return_type = PlasmType::Void;
            self.locals = LocalScopes::new();
            self.locals.declare("self", self_ty.clone());
            for p in &ctor.params {
                self.locals.declare(&p.name, type_from_spec(&p.ty));
            }
            self.check_block(&ctor.body);
        }
        for op in &c.operators {
            self.return_type = type_from_spec(&op.return_type);
            self.locals = LocalScopes::new();
            self.locals.declare("self", self_ty.clone());
            self.locals.declare(&op.param.name, type_from_spec(&op.param.ty));
            self.check_block(&op.body);
        }
        for m in &c.methods {
            match m {
                ClassMethod::Function(f) => {
                    self.return_type = type_from_spec(&f.return_type);
                    self.locals = LocalScopes::new();
                    self.locals.declare("self", self_ty.clone());
                    for p in &f.params {
                        self.locals.declare(&p.name, type_from_spec(&p.ty));
                    }
                    self.check_block(&f.body);
                }
                ClassMethod::Procedure(p) => {
                    self.return_type = type_from_spec(&p.return_type);
                    self.locals = LocalScopes::new();
                    self.locals.declare("self", self_ty.clone());
                    for param in &p.params {
                        self.locals.declare(&param.name, type_from_spec(&param.ty));
                    }
                    self.check_block(&p.body);
                }
            }
        }
        self.current_class = None;
    }

    fn check_block(&mut self, block: &Block) {
        self.locals.push();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.locals.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(b) => self.check_block(b),
            Stmt::VarDecl { ty, bindings, .. } => {
                let declared = ty.as_ref().map(type_from_spec);
                for binding in bindings {
                    let var_ty = match (&declared, &binding.init) {
                        (Some(declared), Some(init)) => {
                            let init_ty = self.check_initializer(init, declared);
                            if !can_implicitly_upcast(&init_ty, declared) {
                                self.error(
                                    binding.line,
                                    binding.column,
                                    format!("cannot assign {init_ty} to binding of type {declared}"),
                                );
                            }
                            declared.clone()
                        }
                        (Some(declared), None) => declared.clone(),
                        (None, Some(init)) => self.check_expr(init),
                        (None, None) => {
                            self.error(binding.line, binding.column, "binding has no type and no initializer");
                            PlasmType::Any
                        }
                    };
                    self.locals.declare(&binding.name, var_ty);
                }
            }
            Stmt::If { condition, then_branch, else_branch, .. } => {
                let cond_ty = self.check_expr(condition);
                if cond_ty != PlasmType::Bool {
                    self.error(condition.line, condition.column, format!("condition must be bool, found {cond_ty}"));
                }
                self.check_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch);
                }
            }
            Stmt::While { condition, body, .. } => {
                let cond_ty = self.check_expr(condition);
                if cond_ty != PlasmType::Bool {
                    self.error(condition.line, condition.column, format!("condition must be bool, found {cond_ty}"));
                }
                self.check_stmt(body);
            }
            Stmt::Return { value, line, column } => {
                let actual = match value {
                    Some(v) => self.check_initializer(v, &self.return_type.clone()),
                    None => PlasmType::Void,
                };
                if !can_implicitly_upcast(&actual, &self.return_type) {
                    self.error(
                        *line,
                        *column,
                        format!("return type mismatch: expected {}, found {actual}", self.return_type),
                    );
                }
            }
            Stmt::Expression { expr, .. } => {
                self.check_expr(expr);
            }
        }
    }

    /// Type-checks an expression used to initialise a binding with a known
    /// target type: an integer literal adopts the target type directly
    /// instead of going through the upcast lattice (§9 literal-binding
    /// exception). Any other expression is checked normally.
    fn check_initializer(&mut self, expr: &Expr, target: &PlasmType) -> PlasmType {
        if let ExprKind::Literal(Literal::Int(_)) = &expr.kind {
            if target.is_integer() || target.is_float() {
                return self.record(expr.id, target.clone());
            }
        }
        self.check_expr(expr)
    }

    fn check_expr(&mut self, expr: &Expr) -> PlasmType {
        let ty = match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(_) => PlasmType::I64,
                Literal::Float(_) => PlasmType::F64,
                Literal::Str(_) => PlasmType::String,
                Literal::Bool(_) => PlasmType::Bool,
            },
            ExprKind::Identifier(name) | ExprKind::ProcIdentifier(name) => self.lookup_name_type(name, expr),
            ExprKind::SelfExpr => self
                .current_class
                .map(|c| PlasmType::Class(c.name.clone()))
                .unwrap_or(PlasmType::Any),
            ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right, expr),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, expr),
            ExprKind::Call { callee, args } => self.check_call(callee, args, expr),
            ExprKind::Member { target, name } => self.check_member(target, name, expr),
            ExprKind::Tuple(elems) => {
                let tys = elems.iter().map(|e| self.check_expr(e)).collect();
                PlasmType::Tuple(tys)
            }
            ExprKind::ConstructorCall { class_name, args } => self.check_constructor_call(class_name, args, expr),
            ExprKind::Cast { expr: inner, target } => {
                self.check_expr(inner);
                type_from_spec(target)
            }
            ExprKind::TypeTest { expr: inner, .. } => {
                self.check_expr(inner);
                PlasmType::Bool
            }
            ExprKind::Assign { target, value } => self.check_assign(target, value, expr),
            ExprKind::Lambda { params, body } => self.check_lambda(params, body),
            ExprKind::ArrayAlloc { element_type, size } => {
                let size_ty = self.check_expr(size);
                if !size_ty.is_integer() {
                    self.error(size.line, size.column, format!("array size must be an integer, found {size_ty}"));
                }
                PlasmType::Array(Box::new(type_from_spec(element_type)))
            }
            ExprKind::ArrayIndex { array, index } => self.check_array_index(array, index, expr),
            ExprKind::ArrayLiteral(elems) => self.check_array_literal(elems, expr),
            ExprKind::StringInterpolation(parts) => {
                for part in parts {
                    if let StringPart::Expr(e) = part {
                        self.check_expr(e);
                    }
                }
                PlasmType::String
            }
        };
        self.record(expr.id, ty)
    }

    fn lookup_name_type(&mut self, name: &str, expr: &Expr) -> PlasmType {
        if let Some(ty) = self.locals.lookup(name) {
            return ty.clone();
        }
        if let Some(c) = self.global.consts.get(name) {
            return self.check_expr(&c.value);
        }
        if let Some(f) = self.global.functions.get(name) {
            return PlasmType::Function {
                params: f.params.iter().map(|p| type_from_spec(&p.ty)).collect(),
                ret: Box::new(type_from_spec(&f.return_type)),
            };
        }
        if let Some(p) = self.global.procedures.get(name) {
            return PlasmType::Function {
                params: p.params.iter().map(|p| type_from_spec(&p.ty)).collect(),
                ret: Box::new(type_from_spec(&p.return_type)),
            };
        }
        if self.global.classes.contains_key(name) {
            return PlasmType::Class(name.to_string());
        }
        // Name analysis already reported the undefined-identifier error;
        // fall back to `any` so downstream checks don't cascade.
        let _ = expr;
        PlasmType::Any
    }

    fn check_binary(&mut self, op: BinOpKind, left: &Expr, right: &Expr, expr: &Expr) -> PlasmType {
        let lhs = self.check_expr(left);
        let rhs = self.check_expr(right);

        if let PlasmType::Class(class_name) = &lhs {
            let class_name = class_name.clone();
            if let Some(class) = self.global.classes.get(&class_name) {
                let symbol = op.as_op_symbol();
                if let Some(operator) = class.operators.get(&symbol).cloned() {
                    let param_ty = type_from_spec(&operator.param.ty);
                    if !can_implicitly_upcast(&rhs, &param_ty) {
                        self.error(
                            expr.line,
                            expr.column,
                            format!(
                                "operator {} on {class_name} expects {param_ty}, found {rhs}",
                                symbol.mangled()
                            ),
                        );
                    }
                    return type_from_spec(&operator.return_type);
                }
                self.error(
                    expr.line,
                    expr.column,
                    format!("{class_name} has no overload for operator {}", symbol.mangled()),
                );
                return PlasmType::Any;
            }
        }

        match op {
            BinOpKind::Eq | BinOpKind::Ne | BinOpKind::Lt | BinOpKind::Gt | BinOpKind::Le | BinOpKind::Ge => {
                if !(can_implicitly_upcast(&lhs, &rhs) || can_implicitly_upcast(&rhs, &lhs)) {
                    self.error(expr.line, expr.column, format!("cannot compare {lhs} with {rhs}"));
                }
                PlasmType::Bool
            }
            BinOpKind::And | BinOpKind::Or => {
                if lhs != PlasmType::Bool || rhs != PlasmType::Bool {
                    self.error(expr.line, expr.column, format!("logical operator expects bool, found {lhs} and {rhs}"));
                }
                PlasmType::Bool
            }
            _ => {
                if !(can_implicitly_upcast(&lhs, &rhs) || can_implicitly_upcast(&rhs, &lhs)) {
                    self.error(expr.line, expr.column, format!("cannot apply operator to {lhs} and {rhs}"));
                    return PlasmType::Any;
                }
                lhs
            }
        }
    }

    fn check_unary(&mut self, op: UnOpKind, operand: &Expr, expr: &Expr) -> PlasmType {
        let ty = self.check_expr(operand);
        match op {
            UnOpKind::Neg => {
                if !ty.is_numeric() {
                    self.error(expr.line, expr.column, format!("unary '-' expects a number, found {ty}"));
                }
                ty
            }
            UnOpKind::Not => {
                if ty != PlasmType::Bool {
                    self.error(expr.line, expr.column, format!("unary '!' expects bool, found {ty}"));
                }
                PlasmType::Bool
            }
        }
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], expr: &Expr) -> PlasmType {
        // A call whose callee names a class resolves as a constructor call.
        if let ExprKind::Identifier(name) | ExprKind::ProcIdentifier(name) = &callee.kind {
            if self.global.classes.contains_key(name) {
                return self.check_constructor_call(name, args, expr);
            }
        }

        let callee_ty = self.check_expr(callee);
        match callee_ty {
            PlasmType::Function { params, ret } => {
                if params.len() != args.len() {
                    self.error(
                        expr.line,
                        expr.column,
                        format!("expected {} argument(s), found {}", params.len(), args.len()),
                    );
                }
                for (i, arg) in args.iter().enumerate() {
                    let arg_ty = match params.get(i) {
                        Some(expected) => self.check_initializer(arg, expected),
                        None => self.check_expr(arg),
                    };
                    if let Some(expected) = params.get(i) {
                        if !can_implicitly_upcast(&arg_ty, expected) {
                            self.error(
                                arg.line,
                                arg.column,
                                format!("argument {} expected {expected}, found {arg_ty}", i + 1),
                            );
                        }
                    }
                }
                *ret
            }
            // Not a function type and not a class/function-name callee handled above;
            // the spec's call rule falls back to void here rather than diagnosing.
            _ => PlasmType::Void,
        }
    }

    fn check_constructor_call(&mut self, class_name: &str, args: &[Expr], expr: &Expr) -> PlasmType {
        let Some(class) = self.global.classes.get(class_name).cloned() else {
            for a in args {
                self.check_expr(a);
            }
            return PlasmType::Any;
        };

        if class.constructors.is_empty() {
            self.error(expr.line, expr.column, format!("{class_name} declares no constructors"));
            for a in args {
                self.check_expr(a);
            }
            return PlasmType::Class(class_name.to_string());
        }

        let arg_types: Vec<PlasmType> = args.iter().map(|a| self.check_expr(a)).collect();
        let by_arity: Vec<_> = class.constructors.iter().filter(|c| c.params.len() == args.len()).collect();
        if by_arity.is_empty() {
            self.error(
                expr.line,
                expr.column,
                format!("no constructor of {class_name} takes {} argument(s)", args.len()),
            );
            return PlasmType::Class(class_name.to_string());
        }

        let matched = by_arity.iter().find(|ctor| {
            ctor.params
                .iter()
                .zip(&arg_types)
                .all(|(p, a)| can_implicitly_upcast(a, &type_from_spec(&p.ty)))
        });

        if matched.is_none() {
            self.error(
                expr.line,
                expr.column,
                format!("no constructor of {class_name} accepts the given argument types"),
            );
        }

        PlasmType::Class(class_name.to_string())
    }

    fn check_member(&mut self, target: &Expr, name: &str, expr: &Expr) -> PlasmType {
        let target_ty = self.check_expr(target);
        if let PlasmType::Class(class_name) = &target_ty {
            if let Some(class) = self.global.classes.get(class_name) {
                if let Some(field) = class.fields.get(name) {
                    return field.ty.as_ref().map(type_from_spec).unwrap_or(PlasmType::Any);
                }
                if let Some(method) = class.methods.get(name) {
                    return match method {
                        ClassMethod::Function(f) => PlasmType::Function {
                            params: f.params.iter().map(|p| type_from_spec(&p.ty)).collect(),
                            ret: Box::new(type_from_spec(&f.return_type)),
                        },
                        ClassMethod::Procedure(p) => PlasmType::Function {
                            params: p.params.iter().map(|p| type_from_spec(&p.ty)).collect(),
                            ret: Box::new(type_from_spec(&p.return_type)),
                        },
                    };
                }
                self.error(expr.line, expr.column, format!("{class_name} has no member '{name}'"));
                return PlasmType::Any;
            }
        }
        if name == "length" {
            if let PlasmType::Array(_) = &target_ty {
                return PlasmType::U32;
            }
        }
        self.error(expr.line, expr.column, format!("{target_ty} has no member '{name}'"));
        PlasmType::Any
    }

    fn check_assign(&mut self, target: &str, value: &Expr, expr: &Expr) -> PlasmType {
        let target_ty = self.locals.lookup(target).cloned().unwrap_or(PlasmType::Any);
        let value_ty = self.check_initializer(value, &target_ty);
        if !can_implicitly_upcast(&value_ty, &target_ty) {
            self.error(expr.line, expr.column, format!("cannot assign {value_ty} to {target_ty}"));
        }
        target_ty
    }

    /// Lambda parameters are always explicitly typed; the body's inferred
    /// type becomes the lambda's return type (expression body), or, for a
    /// block body, the declared-else-inferred type of its return
    /// statements (first one wins — later mismatches are still checked
    /// against it).
    fn check_lambda(&mut self, params: &[LambdaParam], body: &LambdaBody) -> PlasmType {
        self.locals.push();
        for p in params {
            self.locals.declare(&p.name, type_from_spec(&p.ty));
        }
        let ret = match body {
            LambdaBody::Expr(e) => self.check_expr(e),
            LambdaBody::Block(b) => {
                let saved_return = self.return_type.clone();
                self.return_type = infer_block_return_type(self, b);
                for stmt in &b.statements {
                    self.check_stmt(stmt);
                }
                let inferred = self.return_type.clone();
                self.return_type = saved_return;
                inferred
            }
        };
        self.locals.pop();
        PlasmType::Function {
            params: params.iter().map(|p| type_from_spec(&p.ty)).collect(),
            ret: Box::new(ret),
        }
    }

    fn check_array_index(&mut self, array: &Expr, index: &Expr, expr: &Expr) -> PlasmType {
        let array_ty = self.check_expr(array);
        let index_ty = self.check_expr(index);
        if !index_ty.is_integer() {
            self.error(index.line, index.column, format!("array index must be an integer, found {index_ty}"));
        }
        match array_ty {
            PlasmType::Array(elem) => *elem,
            other => {
                self.error(expr.line, expr.column, format!("{other} is not indexable"));
                PlasmType::Any
            }
        }
    }

    /// Empty array literals have no elements to infer from and type as
    /// `array<any>` (§9 boundary behaviour). Otherwise the first element's
    /// type is the target and every other element must upcast to it.
    fn check_array_literal(&mut self, elems: &[Expr], expr: &Expr) -> PlasmType {
        if elems.is_empty() {
            return PlasmType::Array(Box::new(PlasmType::Any));
        }
        let first_ty = self.check_expr(&elems[0]);
        for elem in &elems[1..] {
            let elem_ty = self.check_expr(elem);
            if !can_implicitly_upcast(&elem_ty, &first_ty) {
                self.error(
                    elem.line,
                    elem.column,
                    format!("array element type mismatch: expected {first_ty}, found {elem_ty}"),
                );
            }
        }
        let _ = expr;
        PlasmType::Array(Box::new(first_ty))
    }
}

/// Best-effort scan for the declared type of the first `return <expr>;` in
/// a lambda block body, used to seed `self.return_type` before checking
/// the block for real (nested returns are then checked against it).
fn infer_block_return_type(checker: &mut Checker<'_>, block: &Block) -> PlasmType {
    for stmt in &block.statements {
        if let Stmt::Return { value: Some(v), .. } = stmt {
            return checker.check_expr(v);
        }
    }
    PlasmType::Void
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::sema::name::analyze;

    fn check_src(src: &str) -> Vec<Diagnostic> {
        let (tokens, _) = tokenize(src);
        let (program, parse_diags) = parse(tokens);
        assert!(parse_diags.is_empty(), "{parse_diags:?}");
        let names = analyze(&program);
        assert!(names.diagnostics.is_empty(), "{:?}", names.diagnostics);
        let (_, diags) = check(&program, &names);
        diags
    }

    #[test]
    fn implicit_widening_is_accepted() {
        let diags = check_src("fn t() void { final u32 x = 1; final u64 y = x; }");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn forbidden_implicit_narrowing_is_rejected() {
        let diags = check_src("fn t() void { final u64 x = 1; final u32 y = x; }");
        assert!(diags.iter().any(|d| d.message.contains("cannot assign")));
    }

    #[test]
    fn condition_must_be_boolean() {
        let diags = check_src("fn t() void { if (1) { } }");
        assert!(diags.iter().any(|d| d.message.contains("condition must be bool")));
    }

    #[test]
    fn wrong_call_arity_is_rejected() {
        let diags = check_src("fn add(u64 a, u64 b) u64 { return a + b; } fn t() void { add(1); }");
        assert!(diags.iter().any(|d| d.message.contains("argument(s)")));
    }

    #[test]
    fn lambda_arity_mismatch_is_rejected() {
        let diags = check_src("fn t() void { final f = @(u64 a) => a; let x = f(1, 2); }");
        assert!(diags.iter().any(|d| d.message.contains("argument(s)")));
    }

    #[test]
    fn empty_array_literal_types_any() {
        let diags = check_src("fn t() void { final a = []; }");
        assert!(diags.is_empty(), "{diags:?}");
    }
}
