//! Integration coverage chaining the full layout pipeline — ordering, VA
//! assignment, file-offset assignment, and segment synthesis — over one
//! realistic section set, the way `driver::link` actually calls them in
//! sequence.

use cold::layout::{assign_file_offsets, assign_virtual_addresses, build_load_segments, order_sections, SegmentKind};
use cold::section::OutputSection;

fn sec(name: &str, flags: u64, sh_type: u32, size: u64, align: u64) -> OutputSection {
    let mut s = OutputSection::new(name.into(), sh_type, flags);
    s.sh_size = size;
    s.sh_addralign = align;
    s.infer_relro();
    s
}

#[test]
fn full_pipeline_produces_consistent_addresses_offsets_and_segments() {
    const SHT_NOBITS: u32 = 8;
    let mut sections = vec![
        sec(".text", 0x6, 1, 0x200, 0x10),   // alloc+exec
        sec(".rodata", 0x2, 1, 0x80, 0x8),   // alloc, read-only
        sec(".data", 0x3, 1, 0x40, 0x8),     // alloc+write
        sec(".bss", 0x3, SHT_NOBITS, 0x100, 0x8),
        sec(".symtab", 0, 2, 0x60, 0x8),     // non-alloc
    ];

    order_sections(&mut sections, None).unwrap();
    assign_virtual_addresses(&mut sections, 0x400000, 0x1000);
    let end_offset = assign_file_offsets(&mut sections, 0x1000, 0);

    for s in sections.iter().filter(|s| s.sh_flags & 0x2 != 0) {
        assert_eq!(s.sh_addr % 0x1000, s.sh_offset % 0x1000, "section {} violates the mmap offset invariant", s.name);
    }

    // The non-allocated .symtab carries no virtual address.
    let symtab = sections.iter().find(|s| s.name == ".symtab").unwrap();
    assert_eq!(symtab.sh_addr, 0);
    assert!(symtab.sh_offset > 0);
    assert!(end_offset >= symtab.sh_offset + symtab.sh_size);

    let segments = build_load_segments(&sections);
    assert!(!segments.is_empty());
    assert!(segments.iter().all(|s| matches!(s.kind, SegmentKind::Load)));

    // .text (exec) and .rodata (read-only) differ in exec bit, so they must
    // land in distinct segments even though both are read-only-or-exec.
    let text_idx = sections.iter().position(|s| s.name == ".text").unwrap();
    let rodata_idx = sections.iter().position(|s| s.name == ".rodata").unwrap();
    let seg_of = |idx: usize| segments.iter().position(|s| idx >= s.start_idx && idx < s.end_idx).unwrap();
    assert_ne!(seg_of(text_idx), seg_of(rodata_idx));
}

#[test]
fn explicit_section_order_is_honored_end_to_end() {
    let mut sections = vec![sec(".data", 0x3, 1, 0x10, 8), sec(".text", 0x6, 1, 0x10, 8)];
    order_sections(&mut sections, Some(&[".text".to_string(), ".data".to_string()])).unwrap();
    assert_eq!(sections[0].name, ".text");
    assert_eq!(sections[1].name, ".data");
}
