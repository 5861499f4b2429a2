mod memory;

pub use memory::{read_file, remove_file, write_file, MemoryFs};
