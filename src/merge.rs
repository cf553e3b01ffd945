//! Mergeable-section splitting and dedup (C3, spec.md §4.3): splits
//! `SHF_STRINGS`/fixed-entsize sections into fragments and inserts them
//! into the whole-link `MergedSection` tables owned by `Context`.

use std::sync::atomic::Ordering;

use crate::context::Context;
use crate::section::MergedSection;

const SHF_STRINGS: u64 = 0x20;
const SHF_MERGE: u64 = 0x10;

/// Splits a mergeable section's bytes into fragment slices. For
/// `SHF_STRINGS` sections, a fragment ends at `entsize` consecutive zero
/// bytes aligned to `entsize`; for fixed-size record sections, fragments
/// are exactly `entsize` bytes and `data.len() % entsize != 0` is a hard
/// error (spec.md §4.3).
pub fn split_fragments(data: &[u8], sh_flags: u64, entsize: u64) -> Result<Vec<&[u8]>, String> {
    let entsize = entsize.max(1) as usize;
    if sh_flags & SHF_STRINGS != 0 {
        Ok(split_null_terminated(data, entsize))
    } else {
        if data.len() % entsize != 0 {
            return Err(format!(
                "mergeable section size {} is not a multiple of sh_entsize {entsize}",
                data.len()
            ));
        }
        Ok(data.chunks(entsize).collect())
    }
}

fn split_null_terminated(data: &[u8], entsize: usize) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i + entsize <= data.len() {
        if data[i..i + entsize].iter().all(|&b| b == 0) {
            out.push(&data[start..i + entsize]);
            start = i + entsize;
            i = start;
        } else {
            i += entsize;
        }
    }
    if start < data.len() {
        out.push(&data[start..]);
    }
    out
}

/// HyperLogLog-style cardinality estimator used to pre-size a
/// `MergedSection`'s fragment table before the real dedup pass runs
/// (spec.md §4.3: "pre-sizes the hash set to avoid resizes"). This is a
/// deliberately small fixed-precision sketch (2^P registers), good enough
/// to pick a `dashmap` shard/capacity hint, not a statistics feature.
pub struct HyperLogLog {
    registers: Vec<u8>,
    precision: u32,
}

impl HyperLogLog {
    pub fn new(precision: u32) -> Self {
        HyperLogLog { registers: vec![0; 1 << precision], precision }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        let h = fxhash::hash64(bytes);
        let idx = (h >> (64 - self.precision)) as usize;
        let rest = h << self.precision | (1 << (self.precision - 1));
        let rank = rest.leading_zeros() as u8 + 1;
        self.registers[idx] = self.registers[idx].max(rank);
    }

    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        (alpha * m * m / sum) as u64
    }
}

/// Splits and inserts every fragment of one mergeable input section into
/// its containing `MergedSection`, creating the table on first use.
pub fn merge_section(ctx: &Context, merged_name: &str, data: &[u8], sh_flags: u64, entsize: u64, p2align: u32) -> Result<(), String> {
    if sh_flags & SHF_MERGE == 0 {
        return Err(format!("section {merged_name} is not SHF_MERGE"));
    }
    let fragments = split_fragments(data, sh_flags, entsize)?;
    let align = 1u64 << p2align;

    let mut hll = HyperLogLog::new(10);
    for frag in &fragments {
        hll.add(frag);
    }
    let estimate = hll.estimate();

    let table = ctx
        .merged_sections
        .entry(merged_name.to_string())
        .or_insert_with(|| MergedSection::new(merged_name.to_string()));
    table.estimated_cardinality.fetch_max(estimate, Ordering::AcqRel);
    table.fragments.reserve(estimate as usize / 4);

    for frag in fragments {
        table.insert(frag, align);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_null_terminated_strings() {
        let data = b"hello\0world\0";
        let frags = split_fragments(data, SHF_STRINGS, 1).unwrap();
        assert_eq!(frags, vec![&b"hello\0"[..], &b"world\0"[..]]);
    }

    #[test]
    fn fixed_entsize_must_divide_evenly() {
        let data = [0u8; 10];
        assert!(split_fragments(&data, 0, 4).is_err());
        assert!(split_fragments(&data, 0, 5).is_ok());
    }

    #[test]
    fn hyperloglog_estimates_within_order_of_magnitude() {
        let mut hll = HyperLogLog::new(10);
        for i in 0..5000u32 {
            hll.add(&i.to_le_bytes());
        }
        let est = hll.estimate();
        assert!(est > 2000 && est < 10000, "estimate {est} too far from 5000");
    }
}
