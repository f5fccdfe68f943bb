//! Frontend: convert Wasm to IR.

use crate::errors::{ErrorHandler, Errors, Status};
use crate::ir::Module;
use anyhow::Result;
use log::debug;

mod builder;
pub mod reader;

pub use builder::BinaryReaderIR;

/// Options for the frontend.
#[derive(Clone, Debug)]
pub struct FrontendOptions {
    /// Apply function, local and module names from the `name` section.
    pub read_debug_names: bool,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        FrontendOptions {
            read_debug_names: true,
        }
    }
}

/// Decodes `bytes` into a fresh module. Malformed input fails outright;
/// structural problems found while building the IR are returned
/// alongside the (partial) module.
pub fn wasm_to_ir(bytes: &[u8], options: &FrontendOptions) -> Result<(Module, Errors)> {
    let mut module = Module::default();
    let mut errors = Errors::default();
    let status = read_binary_ir(bytes, options, &mut module, &mut errors)?;
    debug!(
        "decoded {} fields ({} funcs) with status {:?}",
        module.fields.len(),
        module.funcs.len(),
        status
    );
    Ok((module, errors))
}

/// Decodes `bytes` into `module`, reporting builder diagnostics to
/// `errors`.
pub fn read_binary_ir(
    bytes: &[u8],
    options: &FrontendOptions,
    module: &mut Module,
    errors: &mut dyn ErrorHandler,
) -> Result<Status> {
    let mut builder = BinaryReaderIR::new(module, errors);
    reader::read_binary(bytes, options, &mut builder)
}
