//! `InputFile` and its variants (spec.md §3), generalizing the teacher's
//! single `ObjectFile { name, as_needed, content }` (`link.rs`) into the
//! three kinds spec.md names: a relocatable object, a shared object, and
//! the linker-synthesized internal object that backs synthetic symbols.

use std::sync::atomic::{AtomicBool, AtomicU32};

use crate::section::{ComdatGroup, InputSection};
use crate::symbol::{Symbol, SymRef};

/// Command-line-order rank, used as the tiebreaker in resolution rule 3
/// (spec.md §4.1). Lower wins.
pub type Priority = u32;

/// One global symbol an object defines or references, with the real ELF
/// binding/section extracted by `elf_parse::parse_object` (spec.md §4.1's
/// resolution tiers need the actual `st_info`/`st_shndx`, not a guess).
#[derive(Debug, Clone)]
pub struct GlobalSymbolDef {
    pub name: String,
    pub binding: crate::symbol::Binding,
    pub value: u64,
    pub section_idx: Option<u32>,
    pub is_ifunc: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectFlags {
    pub is_lto_obj: bool,
    pub is_gcc_offload_obj: bool,
    pub has_ctors: bool,
    pub has_init_array: bool,
    pub needs_executable_stack: bool,
}

/// A parsed relocatable object (`.o`), possibly extracted from an archive.
pub struct ObjectFile {
    pub name: String,
    pub archive_name: Option<String>,
    pub priority: Priority,
    pub as_needed: bool,

    pub content: Vec<u8>,

    /// Local (`STB_LOCAL`) symbols, indexed by their ELF symtab index.
    pub local_symbols: Vec<Symbol>,
    /// Global symbols this file defines or references; resolution decides
    /// which of these end up owned by this file.
    pub global_symbols: Vec<GlobalSymbolDef>,

    pub sections: Vec<InputSection>,
    pub comdat_groups: Vec<ComdatGroup>,

    /// Maps a raw ELF symtab index (as referenced by `DecodedReloc::r_sym`)
    /// back to the `local_symbols`/`global_symbols` slot it was parsed into.
    pub symtab: Vec<SymRef>,

    pub flags: ObjectFlags,

    pub is_reachable: AtomicBool,
    pub is_alive: AtomicBool,
}

/// A shared object (`.so`) pulled in as a `DT_NEEDED` dependency.
pub struct SharedObject {
    pub name: String,
    pub soname: String,
    pub priority: Priority,
    pub as_needed: bool,

    pub content: Vec<u8>,

    /// Exported dynamic symbols this DSO provides.
    pub exported_symbol_names: Vec<String>,
    pub version_names: Vec<String>,

    pub is_reachable: AtomicBool,
    pub is_alive: AtomicBool,
}

/// The linker-synthesized internal object: owns the placeholder definitions
/// for `__ehdr_start`, `_DYNAMIC`, `_GLOBAL_OFFSET_TABLE_`, `__start_<sec>` /
/// `__stop_<sec>` pairs, and the rest of spec.md §4.7's synthetic symbol set,
/// finalized in `synthetic.rs::fix_synthetic_symbols` once layout is known.
pub struct InternalFile {
    pub priority: Priority,
    pub synthetic_symbol_names: Vec<String>,
}

pub enum InputFile {
    Object(ObjectFile),
    SharedObject(SharedObject),
    Internal(InternalFile),
}

impl InputFile {
    pub fn priority(&self) -> Priority {
        match self {
            InputFile::Object(o) => o.priority,
            InputFile::SharedObject(s) => s.priority,
            InputFile::Internal(i) => i.priority,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            InputFile::Object(o) => o.is_alive.load(std::sync::atomic::Ordering::Acquire),
            InputFile::SharedObject(s) => s.is_alive.load(std::sync::atomic::Ordering::Acquire),
            InputFile::Internal(_) => true,
        }
    }

    pub fn mark_alive(&self) {
        match self {
            InputFile::Object(o) => o.is_alive.store(true, std::sync::atomic::Ordering::Release),
            InputFile::SharedObject(s) => s.is_alive.store(true, std::sync::atomic::Ordering::Release),
            InputFile::Internal(_) => {}
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InputFile::Object(o) => &o.name,
            InputFile::SharedObject(s) => &s.name,
            InputFile::Internal(_) => "<internal>",
        }
    }
}

impl ObjectFile {
    pub fn new(name: String, priority: Priority, content: Vec<u8>, archive_name: Option<String>) -> Self {
        ObjectFile {
            name,
            archive_name,
            priority,
            as_needed: false,
            content,
            local_symbols: Vec::new(),
            global_symbols: Vec::new(),
            sections: Vec::new(),
            comdat_groups: Vec::new(),
            symtab: Vec::new(),
            flags: ObjectFlags::default(),
            is_reachable: AtomicBool::new(false),
            is_alive: AtomicBool::new(false),
        }
    }
}

/// Response-file and archive-member recursion depth, separate from
/// `Context::rsp_depth` since archive nesting is unrelated to `@file` nesting.
pub static ARCHIVE_NEST_GUARD: AtomicU32 = AtomicU32::new(0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_is_not_alive() {
        let obj = ObjectFile::new("a.o".into(), 0, vec![], None);
        assert!(!obj.is_alive.load(std::sync::atomic::Ordering::Relaxed));
    }
}
