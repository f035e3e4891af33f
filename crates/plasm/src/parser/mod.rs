//! Recursive-descent parser: token stream → typed [`Program`].
//!
//! Precedence, lowest to highest: assignment < logical-or < logical-and <
//! equality < relational (which also swallows `is T` and a left-associative
//! `as T` chain) < additive < multiplicative < unary < postfix < primary.
//!
//! Parse errors do not abort the parse: after reporting one, the parser
//! resynchronises by advancing to the next `;` or the next keyword that can
//! start a statement or declaration, then resumes (§4.2).

use crate::ast::*;
use crate::diagnostics::{Diagnostic, Phase};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    ids: NodeIdAllocator,
}

/// Sentinel used internally to signal a statement-level parse failure that
/// has already been reported and resynchronised; callers simply skip the
/// statement rather than propagating a `Result`.
struct Desync;

type PResult<T> = Result<T, Desync>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            ids: NodeIdAllocator::default(),
        }
    }

    // ── token stream helpers ────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn is_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&mut self, message: impl Into<String>) -> Desync {
        let tok = self.peek().clone();
        self.diagnostics
            .push(Diagnostic::new(Phase::Parser, tok.line, tok.column, message));
        Desync
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let found = self.peek().kind.clone();
            Err(self.error_here(format!("expected {what}, found {found}")))
        }
    }

    /// `;` is required after const/return/var-decl/expr-stmt/field decl, but
    /// a missing one is a diagnostic, not a fatal desync (§4.2).
    fn expect_semicolon(&mut self) {
        if !self.matches(&TokenKind::Semicolon) {
            self.error_here("expected ';'");
        }
    }

    /// Advance to the next `;` (consuming it) or the next statement/
    /// declaration-starting keyword, whichever comes first.
    fn synchronize(&mut self) {
        while !self.is_eof() {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                return;
            }
            if matches!(
                self.peek().kind,
                TokenKind::Class
                    | TokenKind::Fn
                    | TokenKind::Proc
                    | TokenKind::Const
                    | TokenKind::Final
                    | TokenKind::Let
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::Return
            ) {
                return;
            }
            self.advance();
        }
    }

    fn next_id(&mut self) -> NodeId {
        self.ids.next()
    }

    fn expr(&mut self, kind: ExprKind, line: u32, column: u32) -> Expr {
        Expr {
            id: self.next_id(),
            kind,
            line,
            column,
        }
    }

    // ── top level ───────────────────────────────────────────────────────

    pub fn parse_program(mut self) -> (Program, Vec<Diagnostic>) {
        let mut program = Program::default();
        while self.matches(&TokenKind::Import) {
            let tok = self.peek().clone();
            let mut path = String::new();
            while let TokenKind::Identifier(name) = self.peek().kind.clone() {
                path.push_str(&name);
                self.advance();
                if self.matches(&TokenKind::Dot) {
                    path.push('.');
                } else {
                    break;
                }
            }
            self.expect_semicolon();
            program.imports.push(ImportDecl {
                path,
                line: tok.line,
                column: tok.column,
            });
        }

        while !self.is_eof() {
            match self.parse_declaration() {
                Ok(decl) => program.declarations.push(decl),
                Err(Desync) => self.synchronize(),
            }
        }

        (program, self.diagnostics)
    }

    fn parse_visibility(&mut self) -> Visibility {
        if self.matches(&TokenKind::Pub) {
            Visibility::Public
        } else if self.matches(&TokenKind::Prot) {
            Visibility::Protected
        } else {
            Visibility::Private
        }
    }

    fn parse_declaration(&mut self) -> PResult<Declaration> {
        let visibility = self.parse_visibility();
        let is_static = self.matches(&TokenKind::Static);

        match self.peek().kind.clone() {
            TokenKind::Const => self.parse_const_decl(visibility).map(Declaration::Const),
            TokenKind::Fn => self
                .parse_function_decl(visibility, is_static)
                .map(Declaration::Function),
            TokenKind::Proc => self
                .parse_procedure_decl(visibility, is_static)
                .map(Declaration::Procedure),
            TokenKind::Class => self.parse_class_decl(visibility).map(Declaration::Class),
            other => Err(self.error_here(format!(
                "expected a declaration (const/fn/proc/class), found {other}"
            ))),
        }
    }

    fn parse_const_decl(&mut self, visibility: Visibility) -> PResult<ConstDecl> {
        let tok = self.expect(&TokenKind::Const, "'const'")?;
        let name = self.parse_identifier_name("constant name")?;
        self.expect(&TokenKind::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect_semicolon();
        Ok(ConstDecl {
            name,
            value,
            visibility,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_identifier_name(&mut self, what: &str) -> PResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error_here(format!("expected {what}, found {other}"))),
        }
    }

    fn parse_function_decl(&mut self, visibility: Visibility, is_static: bool) -> PResult<FunctionDecl> {
        let tok = self.expect(&TokenKind::Fn, "'fn'")?;
        let name = self.parse_identifier_name("function name")?;
        let params = self.parse_params()?;
        let return_type = self.parse_type_spec()?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            visibility,
            is_static,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_procedure_decl(&mut self, visibility: Visibility, is_static: bool) -> PResult<ProcedureDecl> {
        let tok = self.expect(&TokenKind::Proc, "'proc'")?;
        let name = match self.peek().kind.clone() {
            TokenKind::ProcIdentifier(name) => {
                self.advance();
                name
            }
            other => return Err(self.error_here(format!("expected '$name', found {other}"))),
        };
        let params = self.parse_params()?;
        let return_type = self.parse_type_spec()?;
        let body = self.parse_block()?;
        Ok(ProcedureDecl {
            name,
            params,
            return_type,
            body,
            visibility,
            is_static,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let tok = self.peek().clone();
                let ty = self.parse_type_spec()?;
                let name = self.parse_identifier_name("parameter name")?;
                params.push(Param {
                    ty,
                    name,
                    line: tok.line,
                    column: tok.column,
                });
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_class_decl(&mut self, visibility: Visibility) -> PResult<ClassDecl> {
        let tok = self.expect(&TokenKind::Class, "'class'")?;
        let name = self.parse_identifier_name("class name")?;
        self.expect(&TokenKind::LBrace, "'{'")?;

        let mut fields = Vec::new();
        let mut constructors = Vec::new();
        let mut operators = Vec::new();
        let mut methods = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            let member_visibility = self.parse_visibility();
            let member_static = self.matches(&TokenKind::Static);
            let result = match self.peek().kind.clone() {
                TokenKind::Final | TokenKind::Let => {
                    self.parse_field_decl().map(|f| fields.push(f))
                }
                TokenKind::Constructor => {
                    self.parse_constructor_decl().map(|c| constructors.push(c))
                }
                TokenKind::Op => self.parse_operator_decl().map(|o| operators.push(o)),
                TokenKind::Fn => self
                    .parse_function_decl(member_visibility, member_static)
                    .map(|f| methods.push(ClassMethod::Function(f))),
                TokenKind::Proc => self
                    .parse_procedure_decl(member_visibility, member_static)
                    .map(|p| methods.push(ClassMethod::Procedure(p))),
                other => Err(self.error_here(format!(
                    "expected a class member (field/constructor/op/fn/proc), found {other}"
                ))),
            };
            if result.is_err() {
                self.synchronize();
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;

        Ok(ClassDecl {
            name,
            fields,
            constructors,
            operators,
            methods,
            visibility,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_field_decl(&mut self) -> PResult<FieldDecl> {
        let tok = self.peek().clone();
        let is_final = self.matches(&TokenKind::Final);
        if !is_final {
            self.expect(&TokenKind::Let, "'let' or 'final'")?;
        }
        let ty = if self.check(&TokenKind::Semicolon) || self.check(&TokenKind::Assign) {
            None
        } else {
            match self.peek().kind.clone() {
                TokenKind::Identifier(name) if self.peek_at(1).kind == TokenKind::Semicolon
                    || self.peek_at(1).kind == TokenKind::Assign =>
                {
                    // bare `let name;` with no type — treat the identifier as the name below
                    let _ = name;
                    None
                }
                _ => Some(self.parse_type_spec()?),
            }
        };
        let name = self.parse_identifier_name("field name")?;
        let default = if self.matches(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon();
        Ok(FieldDecl {
            ty,
            name,
            is_final,
            default,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_constructor_decl(&mut self) -> PResult<ConstructorDecl> {
        let tok = self.expect(&TokenKind::Constructor, "'constructor'")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(ConstructorDecl {
            params,
            body,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_operator_decl(&mut self) -> PResult<OperatorDecl> {
        let tok = self.expect(&TokenKind::Op, "'op'")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let op_tok = self.advance();
        let symbol = OpSymbol::from_token_text(&op_tok.text)
            .ok_or_else(|| self.error_here(format!("unknown operator symbol '{}'", op_tok.text)))?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let param_tok = self.peek().clone();
        let param_ty = self.parse_type_spec()?;
        let param_name = self.parse_identifier_name("parameter name")?;
        self.expect(&TokenKind::RParen, "')'")?;
        let return_type = self.parse_type_spec()?;
        let body = self.parse_block()?;
        Ok(OperatorDecl {
            symbol,
            param: Param {
                ty: param_ty,
                name: param_name,
                line: param_tok.line,
                column: param_tok.column,
            },
            return_type,
            body,
            line: tok.line,
            column: tok.column,
        })
    }

    // ── type specs ──────────────────────────────────────────────────────

    fn parse_type_spec(&mut self) -> PResult<TypeSpec> {
        if self.matches(&TokenKind::Void) {
            return Ok(TypeSpec::Void);
        }
        if self.matches(&TokenKind::Any) {
            return Ok(TypeSpec::Any);
        }
        if self.check(&TokenKind::LParen) {
            // Could be a tuple type or a function type `(T, ...) => T`.
            // Peek past the matching ')' for a following '=>'.
            let save = self.pos;
            self.advance(); // '('
            let mut depth = 1usize;
            while depth > 0 && !self.is_eof() {
                match self.peek().kind {
                    TokenKind::LParen => depth += 1,
                    TokenKind::RParen => depth -= 1,
                    _ => {}
                }
                self.advance();
            }
            let is_function = self.check(&TokenKind::FatArrow);
            self.pos = save;

            self.advance(); // '('
            let mut elems = Vec::new();
            if !self.check(&TokenKind::RParen) {
                loop {
                    elems.push(self.parse_type_spec()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
            if is_function {
                self.expect(&TokenKind::FatArrow, "'=>'")?;
                let ret = self.parse_type_spec()?;
                return Ok(TypeSpec::Function {
                    params: elems,
                    ret: Box::new(ret),
                });
            }
            return Ok(TypeSpec::Tuple(elems));
        }

        let name = self.parse_type_name()?;
        if self.matches(&TokenKind::Lt) {
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type_spec()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt, "'>'")?;
            return Ok(TypeSpec::Generic { name, args });
        }
        Ok(TypeSpec::Simple(name))
    }

    fn parse_type_name(&mut self) -> PResult<String> {
        let tok = self.peek().clone();
        let name = match &tok.kind {
            TokenKind::U8 => "u8",
            TokenKind::U16 => "u16",
            TokenKind::U32 => "u32",
            TokenKind::U64 => "u64",
            TokenKind::I8 => "i8",
            TokenKind::I16 => "i16",
            TokenKind::I32 => "i32",
            TokenKind::I64 => "i64",
            TokenKind::F32 => "f32",
            TokenKind::F64 => "f64",
            TokenKind::Bool => "bool",
            TokenKind::StringTy => "string",
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                return Ok(name);
            }
            other => return Err(self.error_here(format!("expected a type, found {other}"))),
        };
        self.advance();
        Ok(name.to_string())
    }

    // ── statements ──────────────────────────────────────────────────────

    fn parse_block(&mut self) -> PResult<Block> {
        let tok = self.expect(&TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_eof() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(Desync) => self.synchronize(),
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Block {
            statements,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        match self.peek().kind.clone() {
            TokenKind::LBrace => self.parse_block().map(Stmt::Block),
            TokenKind::Final | TokenKind::Let => self.parse_var_decl(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_var_decl(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        let is_final = self.matches(&TokenKind::Final);
        if !is_final {
            self.expect(&TokenKind::Let, "'let' or 'final'")?;
        }

        // An optional leading type precedes the first binding name. We
        // distinguish `T name` from a bare `name` by checking whether a
        // type keyword/identifier is immediately followed by another
        // identifier (the binding name) rather than `=`, `,`, or `;`.
        let ty = if self.looks_like_leading_type() {
            Some(self.parse_type_spec()?)
        } else {
            None
        };

        let mut bindings = Vec::new();
        loop {
            let btok = self.peek().clone();
            let name = self.parse_identifier_name("variable name")?;
            let init = if self.matches(&TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            bindings.push(VarBinding {
                name,
                init,
                line: btok.line,
                column: btok.column,
            });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_semicolon();
        Ok(Stmt::VarDecl {
            ty,
            is_final,
            bindings,
            line: tok.line,
            column: tok.column,
        })
    }

    fn looks_like_leading_type(&self) -> bool {
        match &self.peek().kind {
            TokenKind::U8
            | TokenKind::U16
            | TokenKind::U32
            | TokenKind::U64
            | TokenKind::I8
            | TokenKind::I16
            | TokenKind::I32
            | TokenKind::I64
            | TokenKind::F32
            | TokenKind::F64
            | TokenKind::Bool
            | TokenKind::StringTy
            | TokenKind::Void
            | TokenKind::Any => true,
            TokenKind::Identifier(_) => matches!(self.peek_at(1).kind, TokenKind::Identifier(_) | TokenKind::Lt),
            _ => false,
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let tok = self.expect(&TokenKind::If, "'if'")?;
        let parenthesised = self.matches(&TokenKind::LParen);
        let condition = self.parse_expression()?;
        if parenthesised {
            self.expect(&TokenKind::RParen, "')'")?;
        }
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.matches(&TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let tok = self.expect(&TokenKind::While, "'while'")?;
        let parenthesised = self.matches(&TokenKind::LParen);
        let condition = self.parse_expression()?;
        if parenthesised {
            self.expect(&TokenKind::RParen, "')'")?;
        }
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While {
            condition,
            body,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let tok = self.expect(&TokenKind::Return, "'return'")?;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_semicolon();
        Ok(Stmt::Return {
            value,
            line: tok.line,
            column: tok.column,
        })
    }

    fn parse_expr_statement(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        let expr = self.parse_expression()?;
        self.expect_semicolon();
        Ok(Stmt::Expression {
            expr,
            line: tok.line,
            column: tok.column,
        })
    }

    // ── expressions ─────────────────────────────────────────────────────

    fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let lhs = self.parse_logical_or()?;
        if self.check(&TokenKind::Assign) {
            let tok = self.advance();
            let value = self.parse_assignment()?;
            // Assignment is restricted to a bare identifier target (§9):
            // member assignment (`self.x = v`) is accepted by the grammar
            // but always rejected later by name analysis, matching the
            // known-broken behaviour of the source language.
            if let ExprKind::Identifier(name) = lhs.kind {
                return Ok(self.expr(
                    ExprKind::Assign {
                        target: name,
                        value: Box::new(value),
                    },
                    tok.line,
                    tok.column,
                ));
            }
            self.error_here("assignment target must be a bare identifier");
            return Ok(lhs);
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_logical_and()?;
        while self.check(&TokenKind::OrOr) {
            let tok = self.advance();
            let right = self.parse_logical_and()?;
            left = self.expr(
                ExprKind::Binary {
                    op: BinOpKind::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            let tok = self.advance();
            let right = self.parse_equality()?;
            left = self.expr(
                ExprKind::Binary {
                    op: BinOpKind::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinOpKind::Eq,
                TokenKind::Ne => BinOpKind::Ne,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_relational()?;
            left = self.expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    /// Relational level also consumes `is T` and a left-associative `as T`
    /// chain (§4.2): `e as T1 as T2` associates left.
    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            if self.check(&TokenKind::Is) {
                let tok = self.advance();
                let target = self.parse_type_spec()?;
                left = self.expr(
                    ExprKind::TypeTest {
                        expr: Box::new(left),
                        target,
                    },
                    tok.line,
                    tok.column,
                );
                continue;
            }
            if self.check(&TokenKind::As) {
                let tok = self.advance();
                let target = self.parse_type_spec()?;
                left = self.expr(
                    ExprKind::Cast {
                        expr: Box::new(left),
                        target,
                    },
                    tok.line,
                    tok.column,
                );
                continue;
            }
            let op = match self.peek().kind {
                TokenKind::Lt => BinOpKind::Lt,
                TokenKind::Gt => BinOpKind::Gt,
                TokenKind::Le => BinOpKind::Le,
                TokenKind::Ge => BinOpKind::Ge,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_additive()?;
            left = self.expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOpKind::Add,
                TokenKind::Minus => BinOpKind::Sub,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_multiplicative()?;
            left = self.expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOpKind::Mul,
                TokenKind::Slash => BinOpKind::Div,
                TokenKind::Percent => BinOpKind::Mod,
                _ => break,
            };
            let tok = self.advance();
            let right = self.parse_unary()?;
            left = self.expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                tok.line,
                tok.column,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.peek().kind {
            TokenKind::Minus => {
                let tok = self.advance();
                let operand = self.parse_unary()?;
                Ok(self.expr(
                    ExprKind::Unary {
                        op: UnOpKind::Neg,
                        operand: Box::new(operand),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            TokenKind::Bang => {
                let tok = self.advance();
                let operand = self.parse_unary()?;
                Ok(self.expr(
                    ExprKind::Unary {
                        op: UnOpKind::Not,
                        operand: Box::new(operand),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind.clone() {
                TokenKind::Dot => {
                    let tok = self.advance();
                    let name = match self.peek().kind.clone() {
                        TokenKind::Identifier(name) => {
                            self.advance();
                            name
                        }
                        TokenKind::ProcIdentifier(name) => {
                            self.advance();
                            name
                        }
                        other => return Err(self.error_here(format!("expected member name, found {other}"))),
                    };
                    expr = self.expr(
                        ExprKind::Member {
                            target: Box::new(expr),
                            name,
                        },
                        tok.line,
                        tok.column,
                    );
                }
                TokenKind::LBracket => {
                    let tok = self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = self.expr(
                        ExprKind::ArrayIndex {
                            array: Box::new(expr),
                            index: Box::new(index),
                        },
                        tok.line,
                        tok.column,
                    );
                }
                TokenKind::LParen => {
                    let tok = self.advance();
                    let args = self.parse_arg_list()?;
                    expr = self.expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        tok.line,
                        tok.column,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind.clone() {
            TokenKind::True => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Bool(true)), tok.line, tok.column))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Bool(false)), tok.line, tok.column))
            }
            TokenKind::IntLiteral(v) => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Int(v)), tok.line, tok.column))
            }
            TokenKind::FloatLiteral(v) => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Float(v)), tok.line, tok.column))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Str(s)), tok.line, tok.column))
            }
            TokenKind::SelfKw => {
                self.advance();
                Ok(self.expr(ExprKind::SelfExpr, tok.line, tok.column))
            }
            TokenKind::New => self.parse_array_alloc(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::At => self.parse_lambda(),
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(self.expr(ExprKind::Identifier(name), tok.line, tok.column))
            }
            TokenKind::ProcIdentifier(name) => {
                self.advance();
                Ok(self.expr(ExprKind::ProcIdentifier(name), tok.line, tok.column))
            }
            TokenKind::LParen => self.parse_paren_or_tuple(),
            other => Err(self.error_here(format!("unexpected token {other}"))),
        }
    }

    fn parse_array_alloc(&mut self) -> PResult<Expr> {
        let tok = self.expect(&TokenKind::New, "'new'")?;
        let element_type = self.parse_type_spec()?;
        self.expect(&TokenKind::LBracket, "'['")?;
        let size = self.parse_expression()?;
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(self.expr(
            ExprKind::ArrayAlloc {
                element_type,
                size: Box::new(size),
            },
            tok.line,
            tok.column,
        ))
    }

    fn parse_array_literal(&mut self) -> PResult<Expr> {
        let tok = self.expect(&TokenKind::LBracket, "'['")?;
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                elements.push(self.parse_expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(self.expr(ExprKind::ArrayLiteral(elements), tok.line, tok.column))
    }

    /// `@ ( params? )` followed by `=> expr` (expression-bodied) or a block.
    fn parse_lambda(&mut self) -> PResult<Expr> {
        let tok = self.expect(&TokenKind::At, "'@'")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let ty = self.parse_type_spec()?;
                let name = self.parse_identifier_name("parameter name")?;
                params.push(LambdaParam { ty, name });
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        let body = if self.matches(&TokenKind::FatArrow) {
            LambdaBody::Expr(Box::new(self.parse_expression()?))
        } else {
            LambdaBody::Block(self.parse_block()?)
        };
        Ok(self.expr(ExprKind::Lambda { params, body }, tok.line, tok.column))
    }

    /// A `(` at the start of a unary expression is a cast target if
    /// lookahead sees a type token followed by `)`; this call never
    /// consumes input before deciding, restoring `pos` if it guesses wrong.
    fn parse_paren_or_tuple(&mut self) -> PResult<Expr> {
        let tok = self.advance(); // '('

        // ConstructorCall-style `Name(args)` is handled in postfix via Call;
        // here we only resolve the plain grouping/tuple form.
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                elements.push(self.parse_expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        if elements.len() == 1 {
            Ok(elements.into_iter().next().unwrap())
        } else {
            Ok(self.expr(ExprKind::Tuple(elements), tok.line, tok.column))
        }
    }
}

/// Parse a token stream into a [`Program`], returning parse diagnostics
/// alongside it rather than aborting on the first error.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<Diagnostic>) {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> (Program, Vec<Diagnostic>) {
        let (tokens, lex_diags) = tokenize(src);
        assert!(lex_diags.is_empty(), "lex diagnostics: {lex_diags:?}");
        parse(tokens)
    }

    #[test]
    fn parses_const_and_function() {
        let (program, diags) = parse_src("const x = 42; fn add(u64 a, u64 b) u64 { return a + b; }");
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(program.declarations.len(), 2);
    }

    #[test]
    fn missing_semicolon_after_return_is_reported() {
        let (_, diags) = parse_src("fn t() void { return }");
        assert!(diags.iter().any(|d| d.message.contains("';'")));
    }

    #[test]
    fn cast_chain_is_left_associative() {
        let (program, diags) = parse_src("fn t() u8 { return 1 as u32 as u8; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!("expected function");
        };
        let Stmt::Return { value: Some(expr), .. } = &f.body.statements[0] else {
            panic!("expected return");
        };
        // outermost cast should target u8, wrapping a cast targeting u32
        match &expr.kind {
            ExprKind::Cast { target, expr: inner } => {
                assert_eq!(*target, TypeSpec::Simple("u8".into()));
                assert!(matches!(inner.kind, ExprKind::Cast { .. }));
            }
            other => panic!("expected outer cast, got {other:?}"),
        }
    }

    #[test]
    fn empty_lambda_parses() {
        let (program, diags) = parse_src("fn t() void { final f = @() => 1; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!("expected function");
        };
        assert_eq!(f.body.statements.len(), 1);
    }

    #[test]
    fn empty_array_literal_parses() {
        let (_, diags) = parse_src("fn t() void { final a = []; }");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn class_with_operator_overload_parses() {
        let src = r#"
            class Point {
                final u64 x;
                final u64 y;
                op(+)(Point other) Point { return self; }
            }
        "#;
        let (program, diags) = parse_src(src);
        assert!(diags.is_empty(), "{diags:?}");
        let Declaration::Class(c) = &program.declarations[0] else {
            panic!("expected class");
        };
        assert_eq!(c.fields.len(), 2);
        assert_eq!(c.operators.len(), 1);
        assert_eq!(c.operators[0].symbol, OpSymbol::Add);
    }

    #[test]
    fn lambda_function_type_tiebreak() {
        let src = "fn t((u64) => u64 f) u64 { return f(1); }";
        let (program, diags) = parse_src(src);
        assert!(diags.is_empty(), "{diags:?}");
        let Declaration::Function(f) = &program.declarations[0] else {
            panic!("expected function");
        };
        assert!(matches!(f.params[0].ty, TypeSpec::Function { .. }));
    }

    #[test]
    fn assignment_target_must_be_identifier() {
        let (_, diags) = parse_src("fn t() void { self.x = 1; }");
        assert!(diags.iter().any(|d| d.message.contains("bare identifier")));
    }
}
