mod builtins;

pub use builtins::{builtin, BUILTIN_NAMES};
