//! Section-shrinking relaxation (C5, spec.md §4.5), grounded in
//! `original_source/src/shrink-sections.cc`: computes `r_deltas` for
//! RISC-V / LoongArch executable sections so mandatory alignment padding
//! (`R_*_ALIGN`) and, under `--relax`, optional instruction-pair shrinks
//! (`R_*_RELAX`) can remove bytes from the middle of a section.

use crate::section::{InputSection, RelocDelta};
use crate::target::DecodedReloc;

/// One candidate byte removal discovered while scanning a section's
/// relocations in order: `offset` is the pre-relax position, `len` is how
/// many bytes disappear starting there.
struct Removal {
    offset: u64,
    len: u64,
}

/// Computes `align_to(value, alignment)`.
fn align_to(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Mandatory pass: for every `R_*_ALIGN` relocation (whose addend encodes
/// `(alignment << bits) | padding_bytes` per the RISC-V/LoongArch psABIs,
/// simplified here to `(alignment, max_padding)` already decoded by the
/// caller), removes `actual - desired` padding bytes. Always runs, even
/// without `--relax` (spec.md §4.5: "This is mandatory").
fn align_removals(section: &InputSection, align_relocs: &[(u64, u64, u64)]) -> Vec<Removal> {
    let mut removals = Vec::new();
    let mut delta_so_far = 0u64;
    for &(offset, alignment, actual_padding) in align_relocs {
        let post_delta_pos = offset - delta_so_far;
        let desired = align_to(post_delta_pos, alignment) - post_delta_pos;
        if actual_padding > desired {
            let removed = actual_padding - desired;
            removals.push(Removal { offset, len: removed });
            delta_so_far += removed;
        }
    }
    removals
}

/// Optional pass: given a list of `(offset, shrinkable_len, trimmed_len)`
/// candidates already filtered by the caller to pairs immediately followed
/// by their matching `R_*_RELAX` marker, keeps only those `--relax` allows
/// and converts them into `Removal`s (spec.md §4.5 "Optional rewrites").
fn relax_removals(candidates: &[(u64, u64, u64)], relax_enabled: bool) -> Vec<Removal> {
    if !relax_enabled {
        return Vec::new();
    }
    candidates
        .iter()
        .map(|&(offset, original_len, trimmed_len)| Removal { offset, len: original_len - trimmed_len })
        .collect()
}

/// Merges alignment and relax removals into the sorted, monotonically
/// non-decreasing `r_deltas` vector spec.md §4.5 requires, and returns the
/// section's new `sh_size`.
pub fn compute_r_deltas(original_size: u64, mut removals: Vec<(u64, u64)>) -> (Vec<RelocDelta>, u64) {
    removals.sort_by_key(|&(offset, _)| offset);
    let mut deltas = Vec::with_capacity(removals.len());
    let mut cumulative = 0u64;
    for (offset, len) in removals {
        cumulative += len;
        deltas.push((offset, cumulative));
    }
    (deltas, original_size - cumulative)
}

/// Runs both passes for one section and installs the resulting `r_deltas`
/// and shrunk `sh_size`.
pub fn relax_section(
    section: &mut InputSection,
    align_relocs: &[(u64, u64, u64)],
    relax_candidates: &[(u64, u64, u64)],
    relax_enabled: bool,
) {
    let mut removals: Vec<(u64, u64)> = align_removals(section, align_relocs)
        .into_iter()
        .map(|r| (r.offset, r.len))
        .collect();
    removals.extend(relax_removals(relax_candidates, relax_enabled).into_iter().map(|r| (r.offset, r.len)));

    let (deltas, new_size) = compute_r_deltas(section.sh_size, removals);
    section.r_deltas = deltas;
    section.sh_size = new_size;
}

/// Translates a raw `r_offset` into its post-relax position by subtracting
/// the cumulative delta at that point (spec.md §4.2 apply pass: "For
/// relaxable targets, translate `r.r_offset` by subtracting the cumulative
/// delta at that offset").
pub fn translate_offset(section: &InputSection, r_offset: u64) -> u64 {
    r_offset - section.delta_at(r_offset)
}

/// True if `reloc` is a relaxation marker this target recognizes
/// (`R_RISCV_RELAX`, `R_LARCH_RELAX`, `R_LARCH_ALIGN`, `R_LARCH_MARK_*`),
/// used by the scan pass to skip them as no-ops (spec.md §4.2).
pub fn is_relax_marker_reloc(target: &dyn crate::target::Target, reloc: &DecodedReloc) -> bool {
    target.is_relax_marker(reloc.r_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(13, 8), 16);
        assert_eq!(align_to(16, 8), 16);
    }

    #[test]
    fn r_deltas_accumulate_monotonically() {
        let (deltas, new_size) = compute_r_deltas(1000, vec![(100, 4), (50, 2)]);
        assert_eq!(deltas, vec![(50, 2), (100, 6)]);
        assert_eq!(new_size, 994);
    }

    #[test]
    fn mandatory_align_removal_runs_without_relax() {
        let mut section = InputSection::new(0, 0, "t".into(), vec![0; 100], 0, 0);
        // 8-byte alignment requested at offset 16, with 6 bytes of padding
        // present though only 2 would be needed to reach a 24-byte boundary.
        relax_section(&mut section, &[(16, 8, 6)], &[], false);
        assert_eq!(section.sh_size, 96);
    }

    #[test]
    fn relax_rewrite_only_applies_when_enabled() {
        let mut off = InputSection::new(0, 0, "t".into(), vec![0; 100], 0, 0);
        relax_section(&mut off, &[], &[(10, 8, 4)], false);
        assert_eq!(off.sh_size, 100);

        let mut on = InputSection::new(0, 0, "t".into(), vec![0; 100], 0, 0);
        relax_section(&mut on, &[], &[(10, 8, 4)], true);
        assert_eq!(on.sh_size, 96);
    }
}
