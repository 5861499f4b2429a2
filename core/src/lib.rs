pub mod ast;
pub mod backend;
pub mod config;
pub mod error;
pub mod fs;
pub mod pipeline;
pub mod relay;
pub mod resolver;
pub mod terminal;
