//! Host-local containers used during construction and synchronisation.

mod dirty;
mod rename_table;

pub use dirty::DirtyBitset;
pub use rename_table::{RenameTable, DEFAULT_MAX_LOAD, MIN_CAPACITY};
