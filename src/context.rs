//! Process-wide mutable state, generalized from the teacher's implicit
//! globals in `link.rs` (which threads `Opt`/`Arena` by hand through a few
//! functions) into the single explicit `Context` spec.md §9 calls for.

use std::path::PathBuf;
use std::sync::atomic::AtomicU32;

use dashmap::DashMap;
use parking_lot::Mutex;
use typed_arena::Arena;

use crate::diagnostics::Diagnostics;
use crate::input_file::InputFile;
use crate::opt::Opt;
use crate::section::{MergedSection, OutputSection};
use crate::symbol::Symbol;
use crate::target::{MachineType, OutputMode, Target};

/// The max depth response-file (`@file`) expansion may recurse to before
/// `opt::expand_response_files` reports a fatal error (spec.md §6).
pub const MAX_RSP_DEPTH: u32 = 10;

/// Process-wide state threaded through every pass. Fields that many tasks
/// read concurrently are plain values or owned arenas; fields that are
/// mutated from multiple passes carry their own synchronization, per
/// spec.md §9's guidance against a bare global singleton.
pub struct Context {
    pub opt: Opt,
    pub machine: MachineType,
    pub output_mode: OutputMode,
    pub page_size: u64,

    /// Thread pointer / dynamic thread pointer addresses for the current
    /// output, fixed once the TLS segment's layout is known.
    pub tp_addr: Mutex<Option<u64>>,
    pub dtp_addr: Mutex<Option<u64>>,

    /// Arena-owned input files; indices into this vector are the only
    /// long-lived handle other structures keep (spec.md §9: "never take
    /// long-lived borrows across passes").
    pub files: Arena<InputFile>,

    /// Interned global symbol table, keyed by name. Local symbols live on
    /// their owning `InputFile` instead.
    pub symbols: DashMap<String, Symbol>,

    /// Output sections, keyed by name; populated once section assignment
    /// in `resolve.rs`/`section.rs` runs.
    pub output_sections: Mutex<Vec<OutputSection>>,

    /// Mergeable-section dedup tables, one per distinct merged-section name.
    pub merged_sections: DashMap<String, MergedSection>,

    /// The fatal/error/warn channel and undef-symbol aggregator every pass
    /// reports through, instead of a bare `eprintln!`.
    pub diagnostics: Diagnostics,

    /// `-L` search directories, in command-line order.
    pub search_dirs: Vec<PathBuf>,

    /// Current response-file nesting depth, used by `opt::expand_response_files`.
    pub rsp_depth: AtomicU32,
}

impl Context {
    pub fn new(opt: Opt, machine: MachineType, output_mode: OutputMode) -> Self {
        let search_dirs = opt.search_dir.iter().map(PathBuf::from).collect();
        let diagnostics = Diagnostics::new(opt.fatal_warnings, opt.suppress_warnings);
        Context {
            opt,
            machine,
            output_mode,
            page_size: 0x1000,
            tp_addr: Mutex::new(None),
            dtp_addr: Mutex::new(None),
            files: Arena::new(),
            symbols: DashMap::new(),
            output_sections: Mutex::new(Vec::new()),
            merged_sections: DashMap::new(),
            diagnostics,
            search_dirs,
            rsp_depth: AtomicU32::new(0),
        }
    }

    pub fn has_error(&self) -> bool {
        self.diagnostics.has_error()
    }

    /// The `Target` implementation for this link's machine type, the single
    /// dispatch point `relocation::scan_section`/`apply_one` are driven
    /// through (spec.md §9: "the driver is generic over it").
    pub fn target(&self) -> Box<dyn Target> {
        crate::target::target_for(self.machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_error() {
        let ctx = Context::new(Opt::default(), MachineType::X86_64, OutputMode::Pde);
        assert!(!ctx.has_error());
        ctx.diagnostics.error("test error");
        assert!(ctx.has_error());
    }
}
