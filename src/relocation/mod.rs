//! Scan and apply passes (C4, spec.md §4.2), the driver generic over
//! `&dyn Target` that the teacher's single hard-coded x86-64 `match` in
//! `link.rs::relocate` is generalized into (grounded there for the basic
//! "compute S/A/P, store width-correct bytes" shape, and in
//! `target/mod.rs`'s decision-table functions for the demand-bit logic).

use crate::section::InputSection;
use crate::symbol::SymbolFlags;
use crate::target::{
    classify_absolute_reloc, classify_pcrel_reloc, classify_tlsdesc, AbsRelocAction, OutputMode, RelocContext,
    RelocWidth, SymbolClass, Target, TlsDescConstness, TlsModel, TlsPlan,
};

/// Per-(file, section, reloc-index) undef-symbol error, collected into
/// `Context::diagnostics`'s undef-ref aggregator keyed by symbol name.
pub struct UndefRef {
    pub symbol: String,
    pub referencing_section: String,
}

/// Per-symbol outcome of the scan pass's absolute/PC-relative
/// classification, used by `synthetic.rs` to size `.rela.dyn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Flags(SymbolFlags),
    /// The reloc demands a dynamic relocation entry of this kind.
    Dynamic,
    Error,
}

/// What the apply pass needs to know about a resolved symbol reference,
/// independent of whether that symbol happens to live in this crate's
/// `Symbol` type (keeps this module testable without a full `Context`).
pub struct ResolvedTarget {
    pub class: SymbolClass,
    pub is_ifunc: bool,
    pub has_plt: bool,
    pub plt_addr: i64,
    pub tlsdesc_constness: Option<TlsDescConstness>,
}

/// Runs the scan pass over one section's relocations, returning the set of
/// demand-bit updates keyed by the relocation's symbol index, plus any
/// classification errors (spec.md §4.2's scan contract).
pub fn scan_section(
    target: &dyn Target,
    mode: OutputMode,
    is_static_output: bool,
    relax_enabled: bool,
    section: &InputSection,
    resolved: impl Fn(u32) -> ResolvedTarget,
) -> Vec<(u32, Result<SymbolFlags, String>)> {
    let mut out = Vec::new();
    for reloc in &section.relocations {
        if target.is_relax_marker(reloc.r_type) {
            continue;
        }
        let rt = resolved(reloc.r_sym);
        let mut flags = SymbolFlags::empty();

        if rt.is_ifunc {
            flags.insert(SymbolFlags::NEEDS_GOT | SymbolFlags::NEEDS_PLT);
        }

        if target.needs_got(reloc.r_type) {
            flags.insert(SymbolFlags::NEEDS_GOT);
        }

        if target.is_plt_reloc(reloc.r_type) && matches!(rt.class, SymbolClass::ImportedCode) {
            flags.insert(SymbolFlags::NEEDS_PLT);
        }

        if target.is_absolute_reloc(reloc.r_type) {
            match classify_absolute_reloc(mode, rt.class) {
                AbsRelocAction::None | AbsRelocAction::Dynamic => {}
                AbsRelocAction::Copyrel => flags.insert(SymbolFlags::NEEDS_COPYREL),
                AbsRelocAction::Plt => flags.insert(SymbolFlags::NEEDS_PLT),
                AbsRelocAction::Cplt => flags.insert(SymbolFlags::NEEDS_CPLT),
                AbsRelocAction::Error => {
                    out.push((reloc.r_sym, Err(format!(
                        "relocation {} against {:?} cannot be expressed in mode {:?}",
                        reloc.r_type, rt.class, mode
                    ))));
                    continue;
                }
            }
        } else if target.is_pcrel_reloc(reloc.r_type) {
            match classify_pcrel_reloc(mode, rt.class) {
                AbsRelocAction::None => {}
                AbsRelocAction::Copyrel => flags.insert(SymbolFlags::NEEDS_COPYREL),
                AbsRelocAction::Plt => flags.insert(SymbolFlags::NEEDS_PLT),
                AbsRelocAction::Cplt => flags.insert(SymbolFlags::NEEDS_CPLT),
                AbsRelocAction::Dynamic | AbsRelocAction::Error => {
                    out.push((reloc.r_sym, Err(format!(
                        "PC-relative relocation {} against {:?} cannot produce a dynamic relocation",
                        reloc.r_type, rt.class
                    ))));
                    continue;
                }
            }
        }

        if target.is_tlsdesc_reloc(reloc.r_type) {
            if let Some(constness) = rt.tlsdesc_constness {
                match classify_tlsdesc(is_static_output, relax_enabled, constness) {
                    TlsPlan::RelaxToLe | TlsPlan::RelaxToIe if constness == TlsDescConstness::StartupTimeConstant => {
                        flags.insert(SymbolFlags::NEEDS_GOTTP);
                    }
                    TlsPlan::RelaxToLe => {}
                    TlsPlan::RelaxToIe => flags.insert(SymbolFlags::NEEDS_GOTTP),
                    TlsPlan::KeepTlsDesc => flags.insert(SymbolFlags::NEEDS_TLSDESC),
                }
            } else {
                flags.insert(SymbolFlags::NEEDS_TLSDESC);
            }
        } else if let Some(model) = target.tls_model_of(reloc.r_type) {
            match model {
                TlsModel::GeneralDynamic => flags.insert(SymbolFlags::NEEDS_TLSGD),
                TlsModel::InitialExec => flags.insert(SymbolFlags::NEEDS_GOTTP),
                TlsModel::LocalDynamic | TlsModel::LocalExec | TlsModel::Desc => {}
            }
        }

        out.push((reloc.r_sym, Ok(flags)));
    }
    out
}

/// Applies one relocation into `place`, dispatching to the target's generic
/// word-store path or its instruction encoder, then range-checking (spec.md
/// §4.2's apply contract). `place` must be at least as large as the
/// relocation's natural width.
pub fn apply_one(
    target: &dyn Target,
    r_type: u32,
    place: &mut [u8],
    rc: &RelocContext,
) -> Result<(), String> {
    if let Some((width, value)) = target.apply_generic(r_type, rc) {
        target.range_check(r_type, value).map_err(|(lo, hi)| {
            format!("relocation {r_type} value {value:#x} out of range [{lo:#x}, {hi:#x})")
        })?;
        if width == RelocWidth::Insn || width == RelocWidth::Uleb128 {
            return Err(format!("target claimed generic width for instruction-encoded relocation {r_type}"));
        }
        crate::target::store(place, width, value, target.is_little_endian());
        Ok(())
    } else {
        target.apply_instruction_reloc(r_type, place, rc)
    }
}

/// Non-allocated (debug) sections use the same apply logic, but a
/// reference into a discarded COMDAT writes a tombstone value instead of
/// `S+A` (spec.md §4.2 "Non-allocated sections").
pub fn tombstone_value(is_64: bool) -> i64 {
    if is_64 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::x86_64::X86_64Target;
    use object::elf;

    fn section_with(r_type: u32, r_sym: u32) -> InputSection {
        let mut sec = InputSection::new(0, 0, "t".into(), vec![0; 16], 0, 0);
        sec.relocations.push(crate::target::DecodedReloc { r_offset: 0, r_type, r_sym, r_addend: 0 });
        sec
    }

    #[test]
    fn plt_reloc_against_imported_code_demands_plt() {
        let target = X86_64Target;
        let sec = section_with(elf::R_X86_64_PLT32, 1);
        let results = scan_section(&target, OutputMode::Pde, false, false, &sec, |_| ResolvedTarget {
            class: SymbolClass::ImportedCode,
            is_ifunc: false,
            has_plt: true,
            plt_addr: 0x2000,
            tlsdesc_constness: None,
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, Ok(SymbolFlags::NEEDS_PLT));
    }

    #[test]
    fn dso_local_pcrel_is_an_error() {
        let target = X86_64Target;
        let sec = section_with(elf::R_X86_64_PC32, 1);
        let results = scan_section(&target, OutputMode::Dso, false, false, &sec, |_| ResolvedTarget {
            class: SymbolClass::Local,
            is_ifunc: false,
            has_plt: false,
            plt_addr: 0,
            tlsdesc_constness: None,
        });
        assert!(results[0].1.is_err());
    }

    #[test]
    fn apply_one_stores_absolute_value() {
        let target = X86_64Target;
        let mut place = [0u8; 4];
        let rc = RelocContext { s: 0x1000, a: 4, p: 0, g: 0, got: 0, tp: 0, dtp: 0, has_plt: false, plt_addr: 0 };
        apply_one(&target, elf::R_X86_64_32S, &mut place, &rc).unwrap();
        assert_eq!(i32::from_le_bytes(place), 0x1004);
    }
}
