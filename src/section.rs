//! `InputSection`, `OutputSection`, `SectionFragment`, `Chunk` (spec.md §3),
//! generalizing the teacher's `link.rs::OutputSection` (which only carries
//! flat `content: Vec<u8>` plus a relocation list for its single-pass toy
//! linker) into the arena-owned, index-referenced model spec.md requires.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::target::DecodedReloc;

/// A COMDAT group: members are dead together if the group loses election
/// (spec.md §4.1 Phase C).
#[derive(Debug, Clone)]
pub struct ComdatGroup {
    pub signature: String,
    pub member_section_indices: Vec<u32>,
}

/// `RelocDelta = (offset, cumulative_delta)` (spec.md §3, §4.5): the
/// cumulative delta at position `i` is the number of bytes removed
/// strictly before `offset`.
pub type RelocDelta = (u64, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOrigin {
    Input { file_idx: u32, section_idx: u32 },
}

pub struct InputSection {
    pub file_idx: u32,
    pub shndx: u32,
    pub name: String,

    /// Raw bytes: either a view into the mapped file, or an owned buffer
    /// when the section was `SHF_COMPRESSED` and had to be inflated.
    pub data: Vec<u8>,
    /// Size after decompression (may differ from `data.len()` only in the
    /// brief window before decompression runs).
    pub sh_size: u64,
    pub p2align: u32,
    pub sh_flags: u64,
    pub sh_type: u32,

    pub relocations: Vec<DecodedReloc>,

    /// Weak back-reference to the owning output section, `None` before
    /// section assignment runs.
    pub output_section: Option<u32>,
    /// Offset within the output section; `-1` (`u64::MAX`) before layout.
    pub offset: u64,

    pub is_alive: bool,
    /// Set when any relocation or symbol takes this section's address,
    /// disqualifying it from identical-code folding (`--icf`).
    pub address_taken: bool,

    /// Sorted `(offset, cumulative_delta)` pairs for relaxable targets
    /// (RISC-V / LoongArch); empty on targets that don't relax.
    pub r_deltas: Vec<RelocDelta>,
}

impl InputSection {
    pub const UNASSIGNED_OFFSET: u64 = u64::MAX;

    pub fn new(file_idx: u32, shndx: u32, name: String, data: Vec<u8>, sh_flags: u64, sh_type: u32) -> Self {
        let sh_size = data.len() as u64;
        InputSection {
            file_idx,
            shndx,
            name,
            data,
            sh_size,
            p2align: 0,
            sh_flags,
            sh_type,
            relocations: Vec::new(),
            output_section: None,
            offset: Self::UNASSIGNED_OFFSET,
            is_alive: true,
            address_taken: false,
            r_deltas: Vec::new(),
        }
    }

    /// Binary-searches `r_deltas` for the cumulative delta to subtract from
    /// a pre-relax offset (spec.md §4.5's lookup contract).
    pub fn delta_at(&self, offset: u64) -> u64 {
        match self.r_deltas.binary_search_by_key(&offset, |&(o, _)| o) {
            Ok(i) => self.r_deltas[i].1,
            Err(0) => 0,
            Err(i) => self.r_deltas[i - 1].1,
        }
    }

    pub fn relaxed_size(&self) -> u64 {
        let total_removed = self.r_deltas.last().map(|&(_, d)| d).unwrap_or(0);
        self.sh_size - total_removed
    }
}

/// One deduplicated unit of a mergeable section (spec.md §3, §4.3).
#[derive(Debug, Clone)]
pub struct SectionFragment {
    pub bytes: Vec<u8>,
    pub align: u64,
    /// Assigned single-threaded after all insertions into the owning
    /// `MergedSection`'s table complete (spec.md §5).
    pub address: Option<u64>,
}

/// A whole-link mergeable-section dedup table, keyed by exact byte content.
/// Backed by `dashmap` for the concurrent insertion spec.md §4.3 and §5
/// require ("concurrent hash set... linearization").
pub struct MergedSection {
    pub name: String,
    pub fragments: DashMap<Vec<u8>, SectionFragment>,
    /// HyperLogLog-style cardinality pre-estimate, used to pre-size
    /// `fragments` and avoid rehashing mid-link (spec.md §4.3).
    pub estimated_cardinality: std::sync::atomic::AtomicU64,
}

impl MergedSection {
    pub fn new(name: String) -> Self {
        MergedSection {
            name,
            fragments: DashMap::new(),
            estimated_cardinality: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Inserts `bytes` if absent, returning the fragment's final alignment
    /// (the max of any contributor's alignment, per spec.md §4.3).
    pub fn insert(&self, bytes: &[u8], align: u64) {
        self.fragments
            .entry(bytes.to_vec())
            .and_modify(|f| f.align = f.align.max(align))
            .or_insert_with(|| SectionFragment { bytes: bytes.to_vec(), align, address: None });
    }
}

/// `to_phdr_flags` input: the composite classification key used both for
/// output-section ordering (§4.6 rank1) and for `PT_LOAD` boundary detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub not_alloc: bool,
    pub writable: bool,
    pub executable: bool,
    pub not_tls: bool,
    pub not_relro: bool,
    pub bss: bool,
}

pub struct OutputSection {
    pub name: String,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_size: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_addralign: u64,

    pub members: Vec<(u32, u32)>, // (file_idx, section_idx)
    pub thunk_offsets: Vec<u64>,
    /// Name of the twin `.rela.<name>` section, if this output section
    /// needs dynamic relocations.
    pub reloc_twin: Option<String>,
    pub is_relro: bool,
}

impl OutputSection {
    pub fn new(name: String, sh_type: u32, sh_flags: u64) -> Self {
        OutputSection {
            name,
            sh_type,
            sh_flags,
            sh_size: 0,
            sh_addr: 0,
            sh_offset: 0,
            sh_addralign: 1,
            members: Vec::new(),
            thunk_offsets: Vec::new(),
            reloc_twin: None,
            is_relro: false,
        }
    }

    /// Derives `is_relro` from name/flags, mirroring the well-known set of
    /// relro-eligible sections (`.data.rel.ro*`, `.got`, `.dynamic`, `.init_array*`...).
    pub fn infer_relro(&mut self) {
        self.is_relro = self.name == ".data.rel.ro"
            || self.name.starts_with(".data.rel.ro.")
            || self.name == ".got"
            || self.name == ".dynamic"
            || self.name == ".init_array"
            || self.name == ".fini_array"
            || self.name == ".preinit_array";
    }

    pub fn order_key(&self) -> OrderKey {
        const SHF_WRITE: u64 = 0x1;
        const SHF_EXECINSTR: u64 = 0x4;
        const SHF_ALLOC: u64 = 0x2;
        const SHF_TLS: u64 = 0x400;
        const SHT_NOBITS: u32 = 8;
        OrderKey {
            not_alloc: self.sh_flags & SHF_ALLOC == 0,
            writable: self.sh_flags & SHF_WRITE != 0,
            executable: self.sh_flags & SHF_EXECINSTR != 0,
            not_tls: self.sh_flags & SHF_TLS == 0,
            not_relro: !self.is_relro,
            bss: self.sh_type == SHT_NOBITS,
        }
    }
}

/// Folds sections with byte-identical content, no relocations, and
/// `address_taken == false` into a single representative (spec.md
/// SPEC_FULL §4's scoped-down single-round `--icf=all`). Returns the map
/// from folded section `(file_idx, section_idx)` to the representative
/// that survives.
pub fn fold_identical_code_sections(
    sections: &[(u32, u32, &InputSection)],
) -> BTreeMap<(u32, u32), (u32, u32)> {
    let mut by_content: BTreeMap<&[u8], (u32, u32)> = BTreeMap::new();
    let mut folded = BTreeMap::new();
    for &(file_idx, section_idx, isec) in sections {
        if !isec.relocations.is_empty() || isec.address_taken || !isec.is_alive {
            continue;
        }
        match by_content.get(isec.data.as_slice()) {
            Some(&representative) => {
                folded.insert((file_idx, section_idx), representative);
            }
            None => {
                by_content.insert(isec.data.as_slice(), (file_idx, section_idx));
            }
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_at_uses_preceding_entry() {
        let mut isec = InputSection::new(0, 0, "t".into(), vec![0; 100], 0, 0);
        isec.r_deltas = vec![(10, 4), (50, 8)];
        assert_eq!(isec.delta_at(5), 0);
        assert_eq!(isec.delta_at(10), 4);
        assert_eq!(isec.delta_at(40), 4);
        assert_eq!(isec.delta_at(60), 8);
    }

    #[test]
    fn relaxed_size_subtracts_total_delta() {
        let mut isec = InputSection::new(0, 0, "t".into(), vec![0; 100], 0, 0);
        isec.r_deltas = vec![(10, 4), (50, 8)];
        assert_eq!(isec.relaxed_size(), 92);
    }

    #[test]
    fn merged_section_keeps_max_alignment() {
        let ms = MergedSection::new(".rodata.str1.1".into());
        ms.insert(b"hello", 1);
        ms.insert(b"hello", 8);
        assert_eq!(ms.fragments.get(b"hello".as_slice()).unwrap().align, 8);
    }

    #[test]
    fn icf_folds_byte_identical_sections_without_relocations() {
        let a = InputSection::new(0, 0, "f1".into(), vec![1, 2, 3], 0x6, 1);
        let b = InputSection::new(1, 0, "f2".into(), vec![1, 2, 3], 0x6, 1);
        let folded = fold_identical_code_sections(&[(0, 0, &a), (1, 0, &b)]);
        assert_eq!(folded.get(&(1, 0)), Some(&(0, 0)));
    }
}
