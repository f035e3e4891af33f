//! AST → IR lowering (§4.5).
//!
//! `core` holds the per-module/per-function builder state; `lower` walks
//! declarations, statements, and expressions against it. Lambdas are lifted
//! eagerly: the moment the expression lowerer sees one it lowers the body
//! into a fresh top-level `IrFunction` and yields a `funcref` value at the
//! point of use, instead of queueing work for a later pass.

pub mod core;
pub mod lower;

use std::collections::HashMap;

use crate::ast::*;
use crate::ir::types::*;
use crate::sema::checker::type_from_spec;
use crate::sema::types::PlasmType;
use crate::sema::Analysis;

pub use core::{ClassLayout, FunctionBuilder, ModuleBuilder};

/// Lowers a type-checked program into a complete [`IrModule`].
///
/// Two passes over declarations happen before any function body is lowered:
/// class struct layouts are reserved first (so a field of class type can
/// reference any other class regardless of declaration order), then every
/// callable — free function/procedure and every class constructor/operator/
/// method — gets its `FuncIdx` reserved under its mangled name, so forward
/// and mutually-recursive calls resolve without a second linking pass.
pub fn build(program: &Program, analysis: &Analysis) -> IrModule {
    let mut mb = ModuleBuilder::new(&analysis.names.global);
    mb.register_class_layouts(program);
    mb.reserve_function_slots(program);

    for decl in &program.declarations {
        if let Declaration::Const(c) = decl {
            mb.lower_const(c, &analysis.types);
        }
    }

    for decl in &program.declarations {
        match decl {
            Declaration::Function(f) => mb.lower_function_decl(f, &analysis.types),
            Declaration::Procedure(p) => mb.lower_procedure_decl(p, &analysis.types),
            Declaration::Class(c) => mb.lower_class(c, &analysis.types),
            Declaration::Const(_) => {}
        }
    }

    mb.module
}

impl<'a> ModuleBuilder<'a> {
    /// Maps a checked [`PlasmType`] to the IR's simpler value-type space,
    /// interning a GC type definition the first time a given array/tuple/
    /// string shape is seen.
    pub fn to_ir_type(&mut self, ty: &PlasmType) -> IrType {
        match ty {
            PlasmType::U8
            | PlasmType::U16
            | PlasmType::U32
            | PlasmType::I8
            | PlasmType::I16
            | PlasmType::I32
            | PlasmType::Bool => IrType::I32,
            PlasmType::U64 | PlasmType::I64 => IrType::I64,
            PlasmType::F32 => IrType::F32,
            PlasmType::F64 => IrType::F64,
            PlasmType::Void => IrType::I32,
            PlasmType::Any => IrType::AnyRef,
            PlasmType::String => IrType::StringRef(self.string_type_idx()),
            PlasmType::Array(elem) => IrType::ArrayRef(self.array_type_idx(elem)),
            PlasmType::Class(name) => match self.classes.get(name) {
                Some(layout) => IrType::StructRef(layout.type_idx),
                // Name analysis guarantees every referenced class exists;
                // this only triggers on an already-diagnosed program.
                None => IrType::AnyRef,
            },
            PlasmType::Tuple(elems) => IrType::StructRef(self.tuple_type_idx(elems)),
            PlasmType::Function { .. } => IrType::FuncRef,
        }
    }

    /// Lazily interns the `array<T>` GC array type for element type `elem`.
    pub fn array_type_idx(&mut self, elem: &PlasmType) -> TypeDefIdx {
        let key = elem.to_string();
        if let Some(idx) = self.array_types.get(&key) {
            return *idx;
        }
        let element_ir = self.to_ir_type(elem);
        let idx = self.module.push_type_def(IrTypeDef::Array {
            name: format!("array_{key}"),
            element: element_ir,
        });
        self.array_types.insert(key, idx);
        idx
    }

    /// The plain `array<i8>` byte-array type backing string storage.
    pub fn byte_array_type_idx(&mut self) -> TypeDefIdx {
        self.array_type_idx(&PlasmType::U8)
    }

    /// Lazily interns the struct-of-(data: array<i8>, length: i32) type used
    /// to represent `string` values.
    pub fn string_type_idx(&mut self) -> TypeDefIdx {
        if let Some(idx) = self.string_type {
            return idx;
        }
        let bytes_idx = self.byte_array_type_idx();
        let idx = self.module.push_type_def(IrTypeDef::Struct {
            name: "string".to_string(),
            fields: vec![
                IrField { name: "data".to_string(), ty: IrType::ArrayRef(bytes_idx) },
                IrField { name: "length".to_string(), ty: IrType::I32 },
            ],
        });
        self.string_type = Some(idx);
        idx
    }

    /// Lazily interns an anonymous struct type for a tuple shape, keyed by
    /// the textual rendering of its element types.
    pub fn tuple_type_idx(&mut self, elems: &[PlasmType]) -> TypeDefIdx {
        let key = elems.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(",");
        if let Some(idx) = self.tuple_types.get(&key) {
            return *idx;
        }
        let fields: Vec<IrField> = elems
            .iter()
            .enumerate()
            .map(|(i, e)| IrField { name: format!("_{i}"), ty: self.to_ir_type(e) })
            .collect();
        let idx = self.module.push_type_def(IrTypeDef::Struct {
            name: format!("tuple_{}", self.tuple_types.len()),
            fields,
        });
        self.tuple_types.insert(key, idx);
        idx
    }

    /// Produces a zero/null value of the right IR shape for `ty`, used for
    /// uninitialised locals and freshly allocated constructor-call objects.
    pub fn default_value(&mut self, fb: &mut FunctionBuilder, ty: &PlasmType) -> VarId {
        let ir_ty = self.to_ir_type(ty);
        let dest = fb.new_var();
        match &ir_ty {
            IrType::I32 => fb.emit(IrInstr::Const { dest, value: IrConst::I32(0) }),
            IrType::I64 => fb.emit(IrInstr::Const { dest, value: IrConst::I64(0) }),
            IrType::F32 => fb.emit(IrInstr::Const { dest, value: IrConst::F32(0.0) }),
            IrType::F64 => fb.emit(IrInstr::Const { dest, value: IrConst::F64(0.0) }),
            other => fb.emit(IrInstr::RefNull { dest, ty: other.clone() }),
        }
        dest
    }

    /// Converts `value` (of type `from`) to `to` where the underlying wasm
    /// representation actually differs. Reference-type widening towards
    /// `any` (or between two ref types that collapse to the same shape, e.g.
    /// `u8`/`u16`/`u32`/`bool` all being `i32`) needs no instruction at all —
    /// wasm subtyping already makes it free.
    pub fn convert(&mut self, fb: &mut FunctionBuilder, value: VarId, from: &PlasmType, to: &PlasmType) -> VarId {
        if from == to {
            return value;
        }
        let from_ir = self.to_ir_type(from);
        let to_ir = self.to_ir_type(to);
        if from_ir == to_ir {
            return value;
        }
        if !from_ir.is_numeric() || !to_ir.is_numeric() {
            return value;
        }
        // Int→float reads the source under its own signedness; float→int
        // truncation is governed by the target's signedness instead. Either
        // way this is an `IrType`-pair decision the caller's `from`/`to`
        // `PlasmType`s still know but the already-collapsed `IrType`s don't.
        let from_is_float = matches!(from_ir, IrType::F32 | IrType::F64);
        let to_is_float = matches!(to_ir, IrType::F32 | IrType::F64);
        let signed = if from_is_float && !to_is_float { to.is_signed() } else { from.is_signed() };
        let dest = fb.new_var();
        fb.emit(IrInstr::Convert { dest, from: from_ir, to: to_ir, operand: value, signed });
        dest
    }

    /// Reserves the GC struct type index for every class declared in the
    /// program, then — now that every class's index is known — resolves and
    /// patches in the actual field types (a field may reference a class
    /// declared later in the source).
    pub fn register_class_layouts(&mut self, program: &Program) {
        for decl in &program.declarations {
            if let Declaration::Class(c) = decl {
                let mut field_index = HashMap::new();
                let mut field_types = Vec::new();
                for (i, f) in c.fields.iter().enumerate() {
                    field_index.insert(f.name.clone(), i as u32);
                    field_types.push(f.ty.as_ref().map(type_from_spec).unwrap_or(PlasmType::Any));
                }
                let type_idx = self
                    .module
                    .push_type_def(IrTypeDef::Struct { name: c.name.clone(), fields: Vec::new() });
                self.classes.insert(c.name.clone(), ClassLayout { type_idx, field_index, field_types });
            }
        }
        for decl in &program.declarations {
            if let Declaration::Class(c) = decl {
                let layout = self.classes.get(&c.name).cloned().unwrap();
                let field_irs: Vec<IrField> = c
                    .fields
                    .iter()
                    .zip(layout.field_types.iter())
                    .map(|(f, t)| IrField { name: f.name.clone(), ty: self.to_ir_type(t) })
                    .collect();
                if let IrTypeDef::Struct { fields, .. } = &mut self.module.type_defs[layout.type_idx.as_u32() as usize]
                {
                    *fields = field_irs;
                }
            }
        }
    }

    /// Reserves a `FuncIdx` for every named callable in the program, under
    /// the exact name used at call sites: the bare source name for free
    /// functions/procedures, `<class>_constructor_<n>` for constructors
    /// (`n` is the declaration-order index, 0-based), `<class>_op_<mangled>`
    /// for operator overloads (the stable ABI from `OpSymbol::mangled`), and
    /// `<class>_<name>` for ordinary methods.
    pub fn reserve_function_slots(&mut self, program: &Program) {
        for decl in &program.declarations {
            match decl {
                Declaration::Function(f) => self.reserve_slot(&f.name),
                Declaration::Procedure(p) => self.reserve_slot(&p.name),
                Declaration::Class(c) => {
                    for (i, _) in c.constructors.iter().enumerate() {
                        self.reserve_slot(&format!("{}_constructor_{}", c.name, i));
                    }
                    for op in &c.operators {
                        self.reserve_slot(&format!("{}_op_{}", c.name, op.symbol.mangled()));
                    }
                    for m in &c.methods {
                        let name = match m {
                            ClassMethod::Function(f) => &f.name,
                            ClassMethod::Procedure(p) => &p.name,
                        };
                        self.reserve_slot(&format!("{}_{}", c.name, name));
                    }
                }
                Declaration::Const(_) => {}
            }
        }
    }

    fn reserve_slot(&mut self, name: &str) {
        let stub = IrFunction {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![IrBasicBlock {
                id: BlockId(0),
                label: "entry".to_string(),
                instructions: Vec::new(),
                terminator: IrTerminator::Unreachable,
            }],
            entry_block: BlockId(0),
            return_type: None,
            exported: false,
        };
        let idx = self.module.push_function(stub);
        self.func_index.insert(name.to_string(), idx);
    }

    /// A top-level `const` becomes an immutable `IrGlobal`. Only literal
    /// initialisers are supported as a genuine wasm global initialiser;
    /// anything else is a documented limitation (see `DESIGN.md`) and falls
    /// back to a zero value.
    pub fn lower_const(&mut self, c: &ConstDecl, types: &TypeTable) {
        let ty = types.get(&c.value.id).cloned().unwrap_or(PlasmType::Any);
        let ir_ty = self.to_ir_type(&ty);
        let init = match (&c.value.kind, &ir_ty) {
            (ExprKind::Literal(Literal::Int(v)), IrType::I64) => IrConst::I64(*v),
            (ExprKind::Literal(Literal::Int(v)), IrType::F32) => IrConst::F32(*v as f32),
            (ExprKind::Literal(Literal::Int(v)), IrType::F64) => IrConst::F64(*v as f64),
            (ExprKind::Literal(Literal::Int(v)), _) => IrConst::I32(*v as i32),
            (ExprKind::Literal(Literal::Float(v)), IrType::F32) => IrConst::F32(*v as f32),
            (ExprKind::Literal(Literal::Float(v)), _) => IrConst::F64(*v),
            (ExprKind::Literal(Literal::Bool(b)), _) => IrConst::I32(*b as i32),
            _ => IrConst::I32(0),
        };
        let idx = self.module.push_global(IrGlobal { name: c.name.clone(), ty: ir_ty, mutable: false, init });
        self.const_index.insert(c.name.clone(), idx);
    }

    pub fn lower_function_decl(&mut self, f: &FunctionDecl, types: &TypeTable) {
        let idx = self.func_index[&f.name];
        let func = self.lower_callable(&f.name, &f.params, &f.return_type, &f.body, None, types);
        self.module.functions[idx.as_u32() as usize] = func;
    }

    pub fn lower_procedure_decl(&mut self, p: &ProcedureDecl, types: &TypeTable) {
        let idx = self.func_index[&p.name];
        let func = self.lower_callable(&p.name, &p.params, &p.return_type, &p.body, None, types);
        self.module.functions[idx.as_u32() as usize] = func;
    }

    pub fn lower_class(&mut self, c: &ClassDecl, types: &TypeTable) {
        let self_ty = PlasmType::Class(c.name.clone());
        for (i, ctor) in c.constructors.iter().enumerate() {
            let name = format!("{}_constructor_{}", c.name, i);
            let idx = self.func_index[&name];
            let func = self.lower_callable(
                &name,
                &ctor.params,
                &TypeSpec::Void,
                &ctor.body,
                Some(self_ty.clone()),
                types,
            );
            self.module.functions[idx.as_u32() as usize] = func;
        }
        for op in &c.operators {
            let name = format!("{}_op_{}", c.name, op.symbol.mangled());
            let idx = self.func_index[&name];
            let func = self.lower_callable(
                &name,
                std::slice::from_ref(&op.param),
                &op.return_type,
                &op.body,
                Some(self_ty.clone()),
                types,
            );
            self.module.functions[idx.as_u32() as usize] = func;
        }
        for m in &c.methods {
            match m {
                ClassMethod::Function(f) => {
                    let name = format!("{}_{}", c.name, f.name);
                    let idx = self.func_index[&name];
                    let func =
                        self.lower_callable(&name, &f.params, &f.return_type, &f.body, Some(self_ty.clone()), types);
                    self.module.functions[idx.as_u32() as usize] = func;
                }
                ClassMethod::Procedure(p) => {
                    let name = format!("{}_{}", c.name, p.name);
                    let idx = self.func_index[&name];
                    let func =
                        self.lower_callable(&name, &p.params, &p.return_type, &p.body, Some(self_ty.clone()), types);
                    self.module.functions[idx.as_u32() as usize] = func;
                }
            }
        }
    }

    /// Shared lowering for free functions, procedures, constructors,
    /// operator overloads, and methods: they differ only in whether an
    /// implicit leading `self` parameter is bound.
    fn lower_callable(
        &mut self,
        name: &str,
        params: &[Param],
        return_type: &TypeSpec,
        body: &Block,
        self_ty: Option<PlasmType>,
        types: &TypeTable,
    ) -> IrFunction {
        let ret_ty = type_from_spec(return_type);
        let ir_ret = if ret_ty == PlasmType::Void { None } else { Some(self.to_ir_type(&ret_ty)) };

        let mut fb = FunctionBuilder::new(types.clone());
        fb.return_type = ret_ty;

        let mut ir_params = Vec::new();
        if let Some(self_ty) = self_ty {
            let ir_self_ty = self.to_ir_type(&self_ty);
            let var = fb.new_var();
            fb.declare_param("self", var, self_ty);
            ir_params.push((var, ir_self_ty));
        }
        for p in params {
            let pty = type_from_spec(&p.ty);
            let ir_pty = self.to_ir_type(&pty);
            let var = fb.new_var();
            fb.declare_param(&p.name, var, pty);
            ir_params.push((var, ir_pty));
        }

        lower::lower_block(self, &mut fb, body);
        if !fb.current_is_terminated() {
            fb.terminate(IrTerminator::Return { value: None });
        }

        IrFunction {
            name: name.to_string(),
            params: ir_params,
            locals: fb.locals,
            blocks: fb.blocks,
            entry_block: BlockId(0),
            return_type: ir_ret,
            exported: name == "main",
        }
    }
}
