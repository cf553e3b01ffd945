//! Range-extension thunk planner (C6, spec.md §4.4), grounded in
//! `original_source/src/thunks.cc`'s four-pointer sweep
//! (`create_range_extension_thunks`): partitions an executable output
//! section's members into batches, each covered by one thunk large enough
//! to reach every out-of-range call site in its batch.

/// One member of an output section, as seen by the thunk planner: its
/// cumulative size contribution and whether any of its relocations target
/// a symbol outside the section (conservatively "unreachable" on the
/// first, pessimistic pass).
#[derive(Debug, Clone)]
pub struct ThunkMember {
    pub size: u64,
    /// Symbol indices this member calls that might need a thunk.
    pub call_targets: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Thunk {
    /// Position (member index) where the thunk is inserted, just before
    /// member `at_member`.
    pub at_member: usize,
    pub offset: u64,
    /// Target symbols this thunk can reach, sorted by `(file_priority, sym_idx)`
    /// for determinism (spec.md §4.4 step 4).
    pub symbols: Vec<(u32, u32)>,
}

pub const MAX_THUNK_SIZE: u64 = 1024 * 1024;
const THUNK_ALIGN: u64 = 16;

/// True if `target_offset` is reachable from `site_offset` within
/// `branch_distance` (spec.md §4.4's `is_reachable`).
fn is_reachable(site_offset: u64, target_offset: u64, branch_distance: i64) -> bool {
    let delta = target_offset as i64 - site_offset as i64;
    delta.unsigned_abs() as i64 <= branch_distance
}

/// Per-member starting offsets (sum of all earlier members' sizes, i.e.
/// no thunks yet inserted) — used as the pessimistic first-pass distance
/// estimate.
fn member_offsets(members: &[ThunkMember]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(members.len());
    let mut cum = 0u64;
    for m in members {
        offsets.push(cum);
        cum += m.size;
    }
    offsets
}

/// Plans thunks for one executable output section, implementing the
/// four-pointer `a ≤ b ≤ c ≤ d` sweep from spec.md §4.4. `symbol_offset`
/// resolves a call target's symbol index to its (possibly still-estimated)
/// offset within the same coordinate space as `members`; on the first pass
/// this is `None` for any symbol outside this output section (conservatively
/// out of range), on the second pass it is the real address.
pub fn plan_thunks(
    members: &[ThunkMember],
    branch_distance: i64,
    symbol_offset: impl Fn(u32) -> Option<u64>,
    first_pass: bool,
) -> Vec<Thunk> {
    let offsets = member_offsets(members);
    let b_threshold = branch_distance / 5;
    let n = members.len();

    let mut thunks: Vec<Thunk> = Vec::new();
    let mut a = 0usize;
    let mut b = 0usize;
    let mut running_offset = 0u64;

    while b < n {
        // Pin `c` to the first member past `b` whose cumulative size from
        // `b` reaches the batching threshold.
        let mut c = b;
        let mut batch_size = 0u64;
        while c < n && batch_size < b_threshold as u64 {
            batch_size += members[c].size;
            c += 1;
        }
        c = c.min(n);

        // Drop thunks whose batch start (`m[a]`) has fallen out of range
        // of the new insertion point `c`.
        while a < b && !is_reachable(offsets[a], offsets[c.min(n - 1)], branch_distance) {
            thunks.retain(|t| t.at_member != a);
            a += 1;
        }

        // Collect call targets in [b, c) that are not directly reachable
        // from their own site, or whose target is unknown on the first
        // (pessimistic) pass.
        let mut symbols = Vec::new();
        for (member_idx, member) in members.iter().enumerate().take(c).skip(b) {
            for &sym in &member.call_targets {
                let reachable = match symbol_offset(sym) {
                    Some(target_off) => is_reachable(offsets[member_idx], target_off, branch_distance),
                    None => !first_pass,
                };
                if !reachable {
                    symbols.push((0u32, sym));
                }
            }
        }

        if !symbols.is_empty() {
            symbols.sort_by_key(|&(priority, sym_idx)| (priority, sym_idx));
            symbols.dedup();
            let thunk_size = (symbols.len() as u64) * 16;
            assert!(thunk_size <= MAX_THUNK_SIZE, "thunk batch exceeds max thunk size");
            let aligned_offset = (running_offset + THUNK_ALIGN - 1) & !(THUNK_ALIGN - 1);
            thunks.push(Thunk { at_member: b, offset: aligned_offset, symbols });
            running_offset = aligned_offset + thunk_size;
        }

        b = c.max(b + 1);
    }

    thunks
}

/// Gathers, for every symbol appearing in any thunk, the sorted list of
/// thunk entry addresses that can reach it (spec.md §4.4 "Gather thunk
/// addresses"), so the apply pass can binary-search the nearest one.
pub fn gather_thunk_addresses(thunks: &[Thunk], thunk_base: u64) -> std::collections::BTreeMap<u32, Vec<u64>> {
    let mut map: std::collections::BTreeMap<u32, Vec<u64>> = std::collections::BTreeMap::new();
    for thunk in thunks {
        let addr = thunk_base + thunk.offset;
        for &(_, sym_idx) in &thunk.symbols {
            map.entry(sym_idx).or_default().push(addr);
        }
    }
    for addrs in map.values_mut() {
        addrs.sort_unstable();
        addrs.dedup();
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability_is_symmetric_around_zero_delta() {
        assert!(is_reachable(1000, 1000, 0));
        assert!(is_reachable(1000, 1100, 200));
        assert!(!is_reachable(1000, 1300, 200));
    }

    #[test]
    fn plan_thunks_inserts_when_first_pass_assumes_out_of_range() {
        let members = vec![
            ThunkMember { size: 4, call_targets: vec![99] },
            ThunkMember { size: 4, call_targets: vec![] },
        ];
        let thunks = plan_thunks(&members, 1 << 20, |_| None, true);
        assert!(!thunks.is_empty());
    }

    #[test]
    fn plan_thunks_skips_reachable_targets_on_second_pass() {
        let members = vec![
            ThunkMember { size: 4, call_targets: vec![1] },
            ThunkMember { size: 4, call_targets: vec![] },
        ];
        // Target at offset 4, well within any reasonable branch distance.
        let thunks = plan_thunks(&members, 1 << 20, |sym| if sym == 1 { Some(4) } else { None }, false);
        assert!(thunks.is_empty());
    }

    #[test]
    fn gather_addresses_dedups_and_sorts() {
        let thunks = vec![
            Thunk { at_member: 0, offset: 0, symbols: vec![(0, 5)] },
            Thunk { at_member: 10, offset: 16, symbols: vec![(0, 5)] },
        ];
        let map = gather_thunk_addresses(&thunks, 0x1000);
        assert_eq!(map.get(&5).unwrap(), &vec![0x1000, 0x1010]);
    }
}
