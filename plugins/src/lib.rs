pub mod commands;
pub mod factory;
pub mod fetcher;
pub mod fs;
pub mod modules;
pub mod parser;
