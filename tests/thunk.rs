//! Integration coverage chaining `plan_thunks` into `gather_thunk_addresses`
//! the way the apply pass would: plan once, then look up reachable thunk
//! entries for a symbol that only became reachable because of the thunk
//! itself.

use cold::thunk::{gather_thunk_addresses, plan_thunks, ThunkMember};

#[test]
fn far_call_target_gets_a_thunk_and_an_address_entry() {
    // A tiny member at the front calls a symbol far outside branch range;
    // a long run of padding members separates the two.
    let mut members = vec![ThunkMember { size: 4, call_targets: vec![7] }];
    for _ in 0..64 {
        members.push(ThunkMember { size: 4, call_targets: vec![] });
    }

    // Symbol 7 sits far past the end of the section, outside +-256 bytes.
    let section_end = members.iter().map(|m| m.size).sum::<u64>();
    let thunks = plan_thunks(&members, 256, |sym| if sym == 7 { Some(section_end + 10_000) } else { None }, false);

    assert!(!thunks.is_empty(), "an out-of-range call site must get a thunk");

    let addrs = gather_thunk_addresses(&thunks, 0x4000);
    let entries = addrs.get(&7).expect("symbol 7 must have a reachable thunk address");
    assert!(!entries.is_empty());
}

#[test]
fn members_with_no_call_targets_never_produce_thunks() {
    let members = vec![ThunkMember { size: 4, call_targets: vec![] }; 10];
    let thunks = plan_thunks(&members, 1 << 20, |_| None, true);
    assert!(thunks.is_empty());
}

#[test]
fn batched_sweep_produces_fewer_thunks_than_call_sites_when_targets_repeat() {
    // Several members all call the same far-away symbol; they should share
    // a single thunk batch rather than getting one each.
    let mut members = Vec::new();
    for _ in 0..5 {
        members.push(ThunkMember { size: 4, call_targets: vec![42] });
    }
    let thunks = plan_thunks(&members, 1 << 10, |_| None, true);
    let total_symbol_slots: usize = thunks.iter().map(|t| t.symbols.len()).sum();
    assert!(total_symbol_slots < members.len() * members.len());
}
