//! Core IR builder state: variable/block allocation, the current
//! function's in-progress block list, and small helpers shared by every
//! lowering routine in `lower.rs`.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::ir::types::*;
use crate::sema::name::GlobalScope;
use crate::sema::types::PlasmType;

/// Class layout computed once before lowering any function body: the GC
/// struct type index for the class and the field-name → index mapping
/// inside it.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    pub type_idx: TypeDefIdx,
    pub field_index: HashMap<String, u32>,
    pub field_types: Vec<PlasmType>,
}

/// Cross-function lowering state: the module under construction plus
/// lookup tables that every function lowering needs (class layouts, the
/// mapping from a declared function/procedure name to its `FuncIdx`, and a
/// counter for freshly lifted lambda names). Lambdas are lifted eagerly —
/// as soon as the expression lowerer encounters one it lowers the lambda
/// body into a fresh top-level `IrFunction` right away, rather than
/// queueing it for later.
pub struct ModuleBuilder<'a> {
    pub module: IrModule,
    pub global_scope: &'a GlobalScope,
    pub classes: HashMap<String, ClassLayout>,
    pub func_index: HashMap<String, FuncIdx>,
    pub const_index: HashMap<String, GlobalIdx>,
    pub array_types: HashMap<String, TypeDefIdx>,
    pub tuple_types: HashMap<String, TypeDefIdx>,
    pub string_type: Option<TypeDefIdx>,
    pub lambda_counter: u32,
}

impl<'a> ModuleBuilder<'a> {
    pub fn new(global_scope: &'a GlobalScope) -> Self {
        Self {
            module: IrModule::default(),
            global_scope,
            classes: HashMap::new(),
            func_index: HashMap::new(),
            const_index: HashMap::new(),
            array_types: HashMap::new(),
            tuple_types: HashMap::new(),
            string_type: None,
            lambda_counter: 0,
        }
    }

    pub fn next_lambda_name(&mut self) -> String {
        let name = format!("__lambda_{}", self.lambda_counter);
        self.lambda_counter += 1;
        name
    }
}

/// Per-function lowering state: the variable counter, the list of blocks
/// built so far, and the block currently being appended to.
pub struct FunctionBuilder {
    pub blocks: Vec<IrBasicBlock>,
    pub locals: Vec<(VarId, IrType)>,
    next_var: u32,
    current: usize,
    /// Maps a source-level local/param name to its `VarId` and `PlasmType`.
    pub scopes: Vec<HashMap<String, (VarId, PlasmType)>>,
    /// Node-type side table produced by the checker, consulted when a
    /// numeric conversion needs to pick the right wasm opcode.
    pub node_types: HashMap<NodeId, PlasmType>,
    /// The enclosing function/procedure/method/operator/lambda's declared
    /// return type, consulted by `return` lowering to pick the right
    /// implicit conversion before the `ret` terminator.
    pub return_type: PlasmType,
}

impl FunctionBuilder {
    pub fn new(node_types: HashMap<NodeId, PlasmType>) -> Self {
        let entry = IrBasicBlock {
            id: BlockId(0),
            label: "entry".to_string(),
            instructions: Vec::new(),
            terminator: IrTerminator::Unreachable,
        };
        Self {
            blocks: vec![entry],
            locals: Vec::new(),
            next_var: 0,
            current: 0,
            scopes: vec![HashMap::new()],
            node_types,
            return_type: PlasmType::Void,
        }
    }

    pub fn new_var(&mut self) -> VarId {
        let id = VarId(self.next_var);
        self.next_var += 1;
        id
    }

    pub fn declare_local(&mut self, name: &str, var: VarId, ty: IrType, plasm_ty: PlasmType) {
        self.locals.push((var, ty));
        self.scopes.last_mut().unwrap().insert(name.to_string(), (var, plasm_ty));
    }

    pub fn declare_param(&mut self, name: &str, var: VarId, plasm_ty: PlasmType) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), (var, plasm_ty));
    }

    pub fn lookup(&self, name: &str) -> Option<(VarId, PlasmType)> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocates a new block with the given structural label, not yet the
    /// current insertion point.
    pub fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(IrBasicBlock {
            id,
            label: label.into(),
            instructions: Vec::new(),
            terminator: IrTerminator::Unreachable,
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = self.blocks.iter().position(|b| b.id == block).expect("known block");
    }

    pub fn emit(&mut self, instr: IrInstr) {
        self.blocks[self.current].instructions.push(instr);
    }

    pub fn terminate(&mut self, terminator: IrTerminator) {
        self.blocks[self.current].terminator = terminator;
    }

    /// Whether the current block already has a non-placeholder terminator
    /// (e.g. an early `return` inside an `if` arm) — used to avoid
    /// appending an unreachable fallthrough jump after it.
    pub fn current_is_terminated(&self) -> bool {
        !matches!(self.blocks[self.current].terminator, IrTerminator::Unreachable)
    }
}
