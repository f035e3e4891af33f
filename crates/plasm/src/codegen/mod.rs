//! WAT (WebAssembly GC text format) code generation (§4.6).
//!
//! Takes the optimized `IrModule` and renders it as `.wat` source text —
//! no binary encoding; `wat2wasm` (invoked from the CLI, §6) does that.

pub mod function;
pub mod instruction;
pub mod module;
pub mod types;

use crate::ir::types::IrModule;

pub fn generate(module: &IrModule) -> String {
    module::generate(module)
}
