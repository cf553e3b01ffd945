//! Integration coverage for `.relr.dyn` pack/unpack round-tripping over
//! address sets larger and more irregular than the colocated unit tests in
//! `src/synthetic.rs` exercise.

use cold::synthetic::{pack_relr, unpack_relr};

#[test]
fn round_trips_a_long_contiguous_run_spanning_multiple_bitmap_words() {
    // 200 consecutive word-aligned addresses forces several bitmap words
    // per anchor (each word covers at most 63 addresses past its anchor).
    let addrs: Vec<u64> = (0..200).map(|i| 0x10000 + i * 8).collect();
    let packed = pack_relr(&addrs);
    let roundtrip = unpack_relr(&packed);
    assert_eq!(roundtrip, addrs);
}

#[test]
fn round_trips_several_disjoint_clusters() {
    let mut addrs = Vec::new();
    for cluster in 0..5u64 {
        let base = 0x100000 + cluster * 0x10000;
        addrs.extend((0..20).map(|i| base + i * 8));
    }
    let packed = pack_relr(&addrs);
    let roundtrip = unpack_relr(&packed);
    assert_eq!(roundtrip, addrs);
}

#[test]
fn single_isolated_address_round_trips_as_a_bare_anchor() {
    let addrs = vec![0x20000u64];
    let packed = pack_relr(&addrs);
    assert_eq!(packed, vec![0x20000]);
    assert_eq!(unpack_relr(&packed), addrs);
}

#[test]
fn a_gap_wider_than_63_slots_forces_a_new_anchor() {
    let addrs = vec![0x1000u64, 0x1008, 0x1000 + 8 * 64];
    let packed = pack_relr(&addrs);
    let roundtrip = unpack_relr(&packed);
    assert_eq!(roundtrip, addrs);
    // Two anchors, since the third address is too far from the first.
    let anchors = packed.iter().filter(|&&w| w & 1 == 0).count();
    assert_eq!(anchors, 2);
}
