//! Stage resolution: parsed command line → ordered stage descriptors.

mod stages;
mod types;

pub use stages::{resolve_stages, ResolveContext};
pub use types::{
    callback_fn, CallbackInput, CommandCallback, CommandFetcher, CompiledModule, Executable,
    FetchRequest, ModuleCompiler, ModuleProgram, Resolution, StageDescriptor,
};
