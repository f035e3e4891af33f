//! IR type definitions.
//!
//! A structured, SSA-form intermediate representation of plasm programs.
//! Every AST operation lowers to one or more IR instructions against
//! explicit variable names (`v0`, `v1`, ...) instead of an implicit
//! operand stack, and basic blocks are labelled (`then`, `else`, `merge`,
//! `while_header`, ...) rather than numbered, since the WAT generator
//! walks the label shape directly into nested `if`/`loop` forms instead of
//! reconstructing arbitrary control flow (§4.6).

use std::fmt;

/// Unique identifier for a variable in SSA form: `v0`, `v1`, `v2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Generic index type with a phantom tag, distinguishing index spaces that
/// are all plain `u32`s at the wire level (type indices, function indices,
/// struct-field indices) but must never be confused with one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idx<TAG> {
    idx: u32,
    _marker: std::marker::PhantomData<TAG>,
}

impl<TAG> Idx<TAG> {
    pub fn new(idx: u32) -> Self {
        Self { idx, _marker: std::marker::PhantomData }
    }

    pub fn as_u32(&self) -> u32 {
        self.idx
    }
}

impl<TAG> From<Idx<TAG>> for u32 {
    fn from(idx: Idx<TAG>) -> Self {
        idx.idx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDefTag;
/// Index into `IrModule::type_defs` (GC struct/array type definitions).
pub type TypeDefIdx = Idx<TypeDefTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncTag;
/// Index into `IrModule::functions`.
pub type FuncIdx = Idx<FuncTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalTag;
/// Index into `IrModule::globals`.
pub type GlobalIdx = Idx<GlobalTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldTag;
/// Index of a field within a single GC struct type.
pub type FieldIdx = Idx<FieldTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncSigTag;
/// Index into `IrModule::func_sigs` — the wasm function-type space used by
/// `call_ref`, distinct from the GC struct/array type space.
pub type FuncSigIdx = Idx<FuncSigTag>;

/// A wasm function type, referenced by `call_ref` when invoking a lambda
/// value through its `funcref`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFuncSig {
    pub params: Vec<IrType>,
    pub ret: Option<IrType>,
}

/// Unique identifier for a basic block, carrying the structural role the
/// builder gave it (the WAT generator switches on this, not on arbitrary
/// graph shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

/// A value type in the GC-aware IR type system. Mirrors `PlasmType` but
/// drops source-level distinctions (tuples, function types) that lowering
/// has already resolved into concrete GC shapes or funcrefs.
#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    I32,
    I64,
    F32,
    F64,
    /// `i31ref`: unboxed small integers / booleans.
    I31Ref,
    /// `(ref null $typedef)` — a GC struct or array reference.
    StructRef(TypeDefIdx),
    ArrayRef(TypeDefIdx),
    /// `(ref null string)` — not a GC proposal builtin; modelled as a
    /// struct-of-(array<i8>, length) via `type_defs`, referenced here the
    /// same way any other struct is.
    StringRef(TypeDefIdx),
    FuncRef,
    /// The unconstrained top reference type `anyref`.
    AnyRef,
}

impl IrType {
    /// Whether this type is returned via the wasm value stack directly
    /// (numeric types) as opposed to a reference.
    pub fn is_numeric(&self) -> bool {
        matches!(self, IrType::I32 | IrType::I64 | IrType::F32 | IrType::F64)
    }
}

/// One named field of a GC struct type. Fields are addressed by their
/// `$name` symbol in emitted WAT, the same way locals and globals are,
/// rather than by positional index.
#[derive(Debug, Clone)]
pub struct IrField {
    pub name: String,
    pub ty: IrType,
}

/// GC type definition: either a struct (named fields, used for classes,
/// strings, and lambda closures) or an array (used for `array<T>`).
#[derive(Debug, Clone)]
pub enum IrTypeDef {
    Struct { name: String, fields: Vec<IrField> },
    Array { name: String, element: IrType },
}

/// A module-level immutable or mutable global.
#[derive(Debug, Clone)]
pub struct IrGlobal {
    pub name: String,
    pub ty: IrType,
    pub mutable: bool,
    pub init: IrConst,
}

/// A compile-time constant value, used for `Const` instructions and
/// global initializers.
#[derive(Debug, Clone, Copy)]
pub enum IrConst {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl fmt::Display for IrConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrConst::I32(v) => write!(f, "{v}"),
            IrConst::I64(v) => write!(f, "{v}"),
            IrConst::F32(v) => write!(f, "{v}"),
            IrConst::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Arithmetic/comparison/logical binary operations, already specialised to
/// a concrete IR numeric type (unlike `ast::BinOpKind`, which is still
/// generic over whatever operands the parser saw).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I32And,
    I32Or,

    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    I32Neg,
    I64Neg,
    F32Neg,
    F64Neg,
    /// Boolean negation over an `i32` 0/1 value.
    I32Eqz,
}

/// A single IR instruction (SSA form — each produces a new variable, with
/// the exception of `GlobalSet`/`ArraySet`/`StructSet`, which write through
/// a reference instead).
#[derive(Debug, Clone)]
pub enum IrInstr {
    Const { dest: VarId, value: IrConst },
    BinOp { dest: VarId, op: BinOp, lhs: VarId, rhs: VarId },
    UnOp { dest: VarId, op: UnOp, operand: VarId },

    /// `dest = src` — a wasm `local.get`/`local.set` pair; not pure SSA,
    /// but matches local-variable reassignment semantics (`let`/params).
    Assign { dest: VarId, src: VarId },

    /// Widen/convert between numeric IR types (`i32.extend_...`,
    /// `i64.trunc_...`, `f64.convert_...`, etc. are chosen in codegen from
    /// the `from`/`to` pair). `signed` carries the source `PlasmType`'s
    /// signedness, which the `from`/`to` `IrType`s alone cannot express
    /// (`u32` and `i32` both map to `IrType::I32`) but which int↔int
    /// extension and int↔float conversion opcodes need.
    Convert { dest: VarId, from: IrType, to: IrType, operand: VarId, signed: bool },

    Call { dest: Option<VarId>, func: FuncIdx, args: Vec<VarId> },
    /// Indirect call through a `funcref` value (lambda invocation).
    CallRef { dest: Option<VarId>, sig: FuncSigIdx, callee: VarId, args: Vec<VarId> },

    GlobalGet { dest: VarId, index: GlobalIdx },
    GlobalSet { index: GlobalIdx, value: VarId },

    /// `struct.new $typedef` — one value per field, in declaration order.
    StructNew { dest: VarId, type_idx: TypeDefIdx, fields: Vec<VarId> },
    StructGet { dest: VarId, type_idx: TypeDefIdx, field: FieldIdx, object: VarId },
    StructSet { type_idx: TypeDefIdx, field: FieldIdx, object: VarId, value: VarId },

    ArrayNew { dest: VarId, type_idx: TypeDefIdx, init: VarId, size: VarId },
    ArrayNewDefault { dest: VarId, type_idx: TypeDefIdx, size: VarId },
    ArrayGet { dest: VarId, type_idx: TypeDefIdx, array: VarId, index: VarId },
    ArraySet { type_idx: TypeDefIdx, array: VarId, index: VarId, value: VarId },
    ArrayLen { dest: VarId, array: VarId },

    RefNull { dest: VarId, ty: IrType },
    RefIsNull { dest: VarId, operand: VarId },
    RefEq { dest: VarId, lhs: VarId, rhs: VarId },
    /// `ref.cast $typedef` — fails (traps) at runtime if the dynamic type
    /// doesn't match; used for the non-`is` half of downcasting.
    RefCast { dest: VarId, type_idx: TypeDefIdx, operand: VarId },
    /// `ref.test $typedef` — the boolean form, backing the `is` operator.
    RefTest { dest: VarId, type_idx: TypeDefIdx, operand: VarId },

    /// Boxes an `i32` into an `i31ref` (used when storing small ints/bools
    /// into an `anyref`-typed slot, e.g. an `any`-typed local).
    I31New { dest: VarId, operand: VarId },
    I31GetS { dest: VarId, operand: VarId },

    /// Produces a `funcref` literal for a named function — how lambda
    /// lifting materialises a callable value at the lifted call site.
    FuncRef { dest: VarId, func: FuncIdx },

    Select { dest: VarId, condition: VarId, if_true: VarId, if_false: VarId },
}

/// How control flow exits a basic block.
#[derive(Debug, Clone)]
pub enum IrTerminator {
    Return { value: Option<VarId> },
    Jump { target: BlockId },
    /// `if (condition) goto if_true else goto if_false` — the builder only
    /// ever targets `then`/`else`/`while_body`/`while_exit`-role blocks
    /// with this, which is what lets the generator emit structured
    /// `if`/`loop` forms instead of a `br_table` dispatch loop.
    BranchIf { condition: VarId, if_true: BlockId, if_false: BlockId },
    Unreachable,
}

/// A basic block: straight-line instructions plus exactly one terminator.
#[derive(Debug, Clone)]
pub struct IrBasicBlock {
    pub id: BlockId,
    /// Structural role used by the WAT generator to decide nesting; purely
    /// descriptive (two different blocks may share a role, e.g. every
    /// `while` loop has its own `while_header`).
    pub label: String,
    pub instructions: Vec<IrInstr>,
    pub terminator: IrTerminator,
}

/// A fully lowered function (source function/procedure/method/constructor/
/// operator overload, or a lifted lambda).
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<(VarId, IrType)>,
    pub locals: Vec<(VarId, IrType)>,
    pub blocks: Vec<IrBasicBlock>,
    /// INVARIANT: always `BlockId(0)` — execution starts at the first
    /// block created while lowering this function's body.
    pub entry_block: BlockId,
    pub return_type: Option<IrType>,
    pub exported: bool,
}

/// A complete lowered program: types, globals, and functions, ready for
/// the WAT generator.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub type_defs: Vec<IrTypeDef>,
    pub func_sigs: Vec<IrFuncSig>,
    pub globals: Vec<IrGlobal>,
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn push_type_def(&mut self, def: IrTypeDef) -> TypeDefIdx {
        self.type_defs.push(def);
        TypeDefIdx::new((self.type_defs.len() - 1) as u32)
    }

    /// Interns a function signature, reusing an existing entry with the
    /// same shape rather than growing the type space unboundedly.
    pub fn intern_func_sig(&mut self, sig: IrFuncSig) -> FuncSigIdx {
        if let Some(pos) = self.func_sigs.iter().position(|s| *s == sig) {
            return FuncSigIdx::new(pos as u32);
        }
        self.func_sigs.push(sig);
        FuncSigIdx::new((self.func_sigs.len() - 1) as u32)
    }

    pub fn push_global(&mut self, global: IrGlobal) -> GlobalIdx {
        self.globals.push(global);
        GlobalIdx::new((self.globals.len() - 1) as u32)
    }

    pub fn push_function(&mut self, function: IrFunction) -> FuncIdx {
        self.functions.push(function);
        FuncIdx::new((self.functions.len() - 1) as u32)
    }

    pub fn type_def(&self, idx: TypeDefIdx) -> &IrTypeDef {
        &self.type_defs[idx.as_u32() as usize]
    }

    pub fn function(&self, idx: FuncIdx) -> &IrFunction {
        &self.functions[idx.as_u32() as usize]
    }
}
