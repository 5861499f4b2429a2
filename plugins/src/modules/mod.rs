mod script;

pub use script::{ScriptCompiler, ScriptProgram, SCRIPT_EXTENSION};
