//! wasmtree: a tree-shaped WebAssembly IR, a binary reader that builds
//! it, and a binary writer that can emit relocatable objects.

// Re-export wasmparser for easier use of the right version by our embedders.
pub use wasmparser;

pub mod backend;
pub mod entity;
mod errors;
pub mod frontend;
mod ir;
pub mod opcode;
pub mod passes;
pub mod visitor;

pub use backend::{write_binary_module, WriteBinaryOptions};
pub use errors::*;
pub use frontend::{wasm_to_ir, FrontendOptions};
pub use ir::*;
pub use opcode::{Opcode, OpcodeKind};
pub use passes::{generate_names, resolve_names};
pub use visitor::{Delegate, ExprVisitor};
