//! Integration coverage for the relaxation pipeline end-to-end: alignment
//! padding removal feeding into `r_deltas`-based offset translation, as a
//! downstream consumer (the apply pass) would actually use it.

use cold::relax::{relax_section, translate_offset};
use cold::section::InputSection;

#[test]
fn translate_offset_reflects_removed_alignment_padding() {
    let mut section = InputSection::new(0, 0, ".text".into(), vec![0u8; 64], 0x6, 1);
    // A relocation at offset 32 originally needed only 2 bytes of the 8 that
    // were conservatively reserved for 8-byte alignment.
    relax_section(&mut section, &[(16, 8, 8)], &[], false);

    // Anything after the removed padding shifts left by the removed amount.
    let post = translate_offset(&section, 40);
    assert!(post < 40);
}

#[test]
fn offsets_before_any_removal_are_unaffected() {
    let mut section = InputSection::new(0, 0, ".text".into(), vec![0u8; 64], 0x6, 1);
    relax_section(&mut section, &[(32, 8, 6)], &[], false);
    assert_eq!(translate_offset(&section, 10), 10);
}

#[test]
fn relax_pass_is_a_strict_subset_of_mandatory_alignment() {
    let mut without_relax = InputSection::new(0, 0, ".text".into(), vec![0u8; 64], 0x6, 1);
    relax_section(&mut without_relax, &[(16, 8, 8)], &[(40, 8, 2)], false);

    let mut with_relax = InputSection::new(0, 0, ".text".into(), vec![0u8; 64], 0x6, 1);
    relax_section(&mut with_relax, &[(16, 8, 8)], &[(40, 8, 2)], true);

    assert!(with_relax.sh_size < without_relax.sh_size);
}
