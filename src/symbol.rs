//! `Symbol` (spec.md §3). The teacher's own `link.rs::Symbol` only tracks
//! enough state to emit `.symtab`/`.dynsym` entries for its single-target
//! toy linker; this generalizes it with the full demand-bit set, origin
//! selector, and aux side-table indices spec.md requires, using a
//! `bitflags!` bitset (grounded in `novafacing-elf`'s own bitflags-based
//! `SectionFlags`/`SymbolFlags` modeling) backed by an atomic for the
//! concurrent OR updates spec.md §5 mandates.

use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Demand bits set during the relocation scan pass (§4.2) and consumed
    /// by synthetic-section sizing (§4.8) and relaxation/thunk planning.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SymbolFlags: u16 {
        const NEEDS_GOT      = 1 << 0;
        const NEEDS_PLT      = 1 << 1;
        const NEEDS_CPLT     = 1 << 2;
        const NEEDS_COPYREL  = 1 << 3;
        const NEEDS_GOTTP    = 1 << 4;
        const NEEDS_TLSGD    = 1 << 5;
        const NEEDS_TLSDESC  = 1 << 6;
        const NEEDS_PPC_OPD  = 1 << 7;
        /// Set once resolution has determined a DSO cannot satisfy this
        /// hidden symbol; forces a restart of Phase A (§4.1 rule 4).
        const SKIP_DSO       = 1 << 8;
    }
}

/// An atomic wrapper around `SymbolFlags` so the scan pass can OR bits in
/// from multiple worker threads without a lock (spec.md §5: "Demand-bit
/// updates use atomic OR").
#[derive(Debug)]
pub struct AtomicSymbolFlags(AtomicU16);

impl AtomicSymbolFlags {
    pub fn new(initial: SymbolFlags) -> Self {
        AtomicSymbolFlags(AtomicU16::new(initial.bits()))
    }

    pub fn insert(&self, flags: SymbolFlags) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn get(&self) -> SymbolFlags {
        SymbolFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn contains(&self, flags: SymbolFlags) -> bool {
        self.get().contains(flags)
    }
}

impl Default for AtomicSymbolFlags {
    fn default() -> Self {
        AtomicSymbolFlags::new(SymbolFlags::empty())
    }
}

/// Binding strength, ordered weakest-to-strongest to back the resolution
/// total order in spec.md §4.1 rule 1 (`Undef < Common < Weak < Regular`,
/// note the derive order below is ascending so `Ord` matches "beats").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    Undef,
    Common,
    Weak,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Default,
    Hidden,
    Protected,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionIndex {
    Unspecified,
    Local,
    Index(u16),
}

/// Which kind of entity a symbol's `value` is relative to, until layout
/// finalizes it into an absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Offset into an input section. For a global symbol, `file_idx` is the
    /// owning object's `Priority`; for a local symbol (always resolved
    /// within its own object) the field is unused.
    InputSection { file_idx: u32, section_idx: u32 },
    /// Offset into a section fragment.
    Fragment { merged_section: u32, fragment_idx: u32 },
    /// Offset into a finalized output section.
    OutputSection { output_section_idx: u32 },
    Absolute,
}

/// What one ELF symtab slot turned into after parsing (spec.md §3):
/// relocations reference symbols by raw symtab index, but `elf_parse` splits
/// that table into per-object `local_symbols` (no long-lived name lookup
/// needed) and whole-link `GlobalSymbolDef`s (looked up in `Context::symbols`
/// by name). `ObjectFile::symtab` maps the original index back to whichever
/// it became, so the scan/apply passes can resolve `DecodedReloc::r_sym`.
#[derive(Debug, Clone)]
pub enum SymRef {
    Local(u32),
    Global(String),
    /// The reserved `STN_UNDEF` index 0, or a slot `elf_parse` skipped
    /// (empty name).
    None,
}

/// Indices into `Context`-owned side tables, populated during the scan
/// pass and synthetic-section construction. `u32::MAX` means "unallocated".
#[derive(Debug, Clone, Copy)]
pub struct SymbolAux {
    pub got_idx: u32,
    pub plt_idx: u32,
    pub gotplt_idx: u32,
    pub dynsym_idx: u32,
    pub gottp_idx: u32,
    pub tlsgd_idx: u32,
    pub tlsdesc_idx: u32,
    /// Addresses of every thunk entry covering this symbol, sorted, so the
    /// apply pass can binary-search for the nearest one (§4.4).
    pub thunk_addrs: Vec<u64>,
}

pub const UNALLOCATED: u32 = u32::MAX;

impl Default for SymbolAux {
    fn default() -> Self {
        SymbolAux {
            got_idx: UNALLOCATED,
            plt_idx: UNALLOCATED,
            gotplt_idx: UNALLOCATED,
            dynsym_idx: UNALLOCATED,
            gottp_idx: UNALLOCATED,
            tlsgd_idx: UNALLOCATED,
            tlsdesc_idx: UNALLOCATED,
            thunk_addrs: Vec::new(),
        }
    }
}

/// A single interned symbol, shared across every file that defines or
/// references it by name. `file` is a weak back-reference (an index into
/// `Context::files`, never an owning pointer) resolved by lookup.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub binding: Binding,
    pub is_exported: bool,
    pub is_imported: bool,
    pub is_weak_import: bool,
    pub visibility: Visibility,

    /// Weak back-reference: `None` until resolution picks an owner.
    pub file: Option<u32>,
    pub value: i64,
    pub origin: Option<Origin>,
    pub version: VersionIndex,
    pub is_ifunc: bool,

    pub flags: AtomicSymbolFlags,
    pub aux: SymbolAux,
}

impl Symbol {
    pub fn new(name: String) -> Self {
        Symbol {
            name,
            binding: Binding::Undef,
            is_exported: false,
            is_imported: false,
            is_weak_import: false,
            visibility: Visibility::Default,
            file: None,
            value: 0,
            origin: None,
            version: VersionIndex::Unspecified,
            is_ifunc: false,
            flags: AtomicSymbolFlags::default(),
            aux: SymbolAux::default(),
        }
    }

    /// True if this symbol, as currently resolved, strictly beats `other`
    /// under spec.md §4.1 rule 1, breaking ties by priority (rule 3).
    pub fn beats(&self, self_priority: u32, other: &Symbol, other_priority: u32) -> bool {
        match self.binding.cmp(&other.binding) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self_priority < other_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_order_matches_resolution_tiers() {
        assert!(Binding::Regular > Binding::Weak);
        assert!(Binding::Weak > Binding::Common);
        assert!(Binding::Common > Binding::Undef);
    }

    #[test]
    fn atomic_flags_or_across_threads() {
        let flags = AtomicSymbolFlags::default();
        std::thread::scope(|s| {
            s.spawn(|| flags.insert(SymbolFlags::NEEDS_GOT));
            s.spawn(|| flags.insert(SymbolFlags::NEEDS_PLT));
        });
        assert!(flags.contains(SymbolFlags::NEEDS_GOT));
        assert!(flags.contains(SymbolFlags::NEEDS_PLT));
    }

    #[test]
    fn regular_beats_weak_regardless_of_priority() {
        let mut strong = Symbol::new("f".into());
        strong.binding = Binding::Regular;
        let mut weak = Symbol::new("f".into());
        weak.binding = Binding::Weak;
        assert!(strong.beats(5, &weak, 0));
    }

    #[test]
    fn tie_breaks_by_lower_priority() {
        let mut a = Symbol::new("f".into());
        a.binding = Binding::Regular;
        let mut b = Symbol::new("f".into());
        b.binding = Binding::Regular;
        assert!(a.beats(0, &b, 1));
        assert!(!a.beats(1, &b, 0));
    }
}
