//! `cold`: a multi-threaded ELF static linker library, driving the pipeline
//! `bin/ld.rs` wires up. See `DESIGN.md` for how each module grounds back to
//! the teacher repository this crate started from.

pub mod archive;
pub mod context;
pub mod diagnostics;
pub mod driver;
pub mod elf_parse;
pub mod input_file;
pub mod layout;
pub mod merge;
pub mod opt;
pub mod parallel;
pub mod relax;
pub mod relocation;
pub mod resolve;
pub mod section;
pub mod symbol;
pub mod synthetic;
pub mod target;
pub mod thunk;

pub use context::Context;
pub use opt::{FileOpt, LibraryOpt, ObjectFileOpt, Opt};
