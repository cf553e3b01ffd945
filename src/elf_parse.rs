//! ELF input parsing (spec.md §3's `ElfRel`/section/symbol model), the
//! `object::read` counterpart to `archive.rs`'s `ArchiveFile::parse` loop:
//! turns one relocatable object's raw bytes into the `InputSection`/
//! `Symbol`/`ComdatGroup` arrays resolution and the later passes operate on.

use object::{
    Object, ObjectComdat, ObjectSection, ObjectSymbol, RelocationFlags, RelocationTarget, SectionFlags, SectionKind,
    SymbolFlags as ObjSymbolFlags, SymbolSection,
};

use crate::input_file::{GlobalSymbolDef, ObjectFile};
use crate::section::{ComdatGroup, InputSection};
use crate::symbol::{Binding, Origin, SymRef, Symbol};
use crate::target::DecodedReloc;

const STT_GNU_IFUNC: u8 = 10;

fn elf_sh_type_for_kind(kind: SectionKind) -> u32 {
    match kind {
        SectionKind::UninitializedData | SectionKind::UninitializedTls => 8, // SHT_NOBITS
        SectionKind::Note => 7,                                             // SHT_NOTE
        _ => 1,                                                             // SHT_PROGBITS
    }
}

/// Parses `obj.content` and populates `obj.sections`, `obj.local_symbols`,
/// `obj.global_symbols`, and `obj.comdat_groups`. Called once per object
/// right after `ObjectFile::new`, before resolution runs.
pub fn parse_object(obj: &mut ObjectFile) -> Result<(), String> {
    let file = object::File::parse(obj.content.as_slice())
        .map_err(|e| format!("{}: malformed ELF: {e}", obj.name))?;

    let mut shndx_of: std::collections::HashMap<object::SectionIndex, u32> = std::collections::HashMap::new();
    for (i, sec) in file.sections().enumerate() {
        shndx_of.insert(sec.index(), i as u32);
    }

    for (i, sec) in file.sections().enumerate() {
        let name = sec.name().unwrap_or("").to_string();
        let sh_flags = match sec.flags() {
            SectionFlags::Elf { sh_flags } => sh_flags,
            _ => 0,
        };
        let sh_type = elf_sh_type_for_kind(sec.kind());
        let data = if matches!(sec.kind(), SectionKind::UninitializedData | SectionKind::UninitializedTls) {
            vec![0u8; sec.size() as usize]
        } else {
            sec.data().map(<[u8]>::to_vec).unwrap_or_default()
        };

        let mut isec = InputSection::new(0, i as u32, name, data, sh_flags, sh_type);
        for (offset, reloc) in sec.relocations() {
            let r_type = match reloc.flags() {
                RelocationFlags::Elf { r_type } => r_type,
                _ => continue,
            };
            let r_sym = match reloc.target() {
                RelocationTarget::Symbol(idx) => idx.0 as u32,
                _ => continue,
            };
            isec.relocations.push(DecodedReloc { r_offset: offset, r_type, r_sym, r_addend: reloc.addend() });
        }
        obj.sections.push(isec);
    }

    for comdat in file.comdats() {
        let Ok(signature) = comdat.symbol().name() else { continue };
        let member_section_indices: Vec<u32> =
            comdat.sections().filter_map(|idx| shndx_of.get(&idx).copied()).collect();
        obj.comdat_groups.push(ComdatGroup { signature: signature.to_string(), member_section_indices });
    }

    let max_index = file.symbols().map(|s| s.index().0).max().unwrap_or(0);
    obj.symtab = vec![SymRef::None; max_index + 1];

    for sym in file.symbols() {
        let index = sym.index().0;
        let Ok(name) = sym.name() else { continue };
        if name.is_empty() {
            continue;
        }
        let st_info = match sym.flags() {
            ObjSymbolFlags::Elf { st_info, .. } => st_info,
            _ => 0,
        };
        let is_local = (st_info >> 4) == 0; // STB_LOCAL

        let binding = if sym.is_undefined() {
            Binding::Undef
        } else if sym.is_common() {
            Binding::Common
        } else if sym.is_weak() {
            Binding::Weak
        } else {
            Binding::Regular
        };

        let section_idx = if let SymbolSection::Section(idx) = sym.section() { shndx_of.get(&idx).copied() } else { None };

        if is_local {
            let origin = match sym.section() {
                SymbolSection::Section(_) => section_idx.map(|section_idx| Origin::InputSection { file_idx: 0, section_idx }),
                SymbolSection::Absolute => Some(Origin::Absolute),
                _ => None,
            };
            let mut local = Symbol::new(name.to_string());
            local.binding = binding;
            local.value = sym.address() as i64;
            local.is_ifunc = (st_info & 0xf) == STT_GNU_IFUNC;
            local.origin = origin;
            obj.symtab[index] = SymRef::Local(obj.local_symbols.len() as u32);
            obj.local_symbols.push(local);
        } else {
            obj.symtab[index] = SymRef::Global(name.to_string());
            obj.global_symbols.push(GlobalSymbolDef {
                name: name.to_string(),
                binding,
                value: sym.address(),
                section_idx,
                is_ifunc: (st_info & 0xf) == STT_GNU_IFUNC,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_content_is_a_reported_error() {
        let mut obj = ObjectFile::new("bad.o".into(), 0, b"not an elf file".to_vec(), None);
        let err = parse_object(&mut obj).unwrap_err();
        assert!(err.contains("bad.o"));
    }
}
