//! x86-64 relocation table, generalizing the teacher's `link.rs::relocate`
//! x86-64 `match` arms (same relocation names, same GOT/PLT/TLS semantics)
//! into this crate's `Target` trait shape.

use object::elf;

use super::{MachineType, RelocContext, RelocWidth, Target, TlsModel};

pub struct X86_64Target;

impl Target for X86_64Target {
    fn machine(&self) -> MachineType {
        MachineType::X86_64
    }

    fn is_little_endian(&self) -> bool {
        true
    }

    fn needs_got(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_X86_64_GOT32
                | elf::R_X86_64_GOT64
                | elf::R_X86_64_GOTPCREL
                | elf::R_X86_64_GOTPCREL64
                | elf::R_X86_64_GOTOFF64
                | elf::R_X86_64_GOTPC32
                | elf::R_X86_64_GOTTPOFF
        )
    }

    fn is_plt_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_X86_64_PLT32 | elf::R_X86_64_PLTOFF64)
    }

    fn is_absolute_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_X86_64_64 | elf::R_X86_64_32 | elf::R_X86_64_32S | elf::R_X86_64_16 | elf::R_X86_64_8
        )
    }

    fn is_pcrel_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_X86_64_PC64 | elf::R_X86_64_PC32 | elf::R_X86_64_PC16 | elf::R_X86_64_PC8 | elf::R_X86_64_PLT32
        )
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        match r_type {
            elf::R_X86_64_TLSGD => Some(TlsModel::GeneralDynamic),
            elf::R_X86_64_TLSLD => Some(TlsModel::LocalDynamic),
            elf::R_X86_64_GOTTPOFF => Some(TlsModel::InitialExec),
            elf::R_X86_64_TPOFF32 | elf::R_X86_64_TPOFF64 => Some(TlsModel::LocalExec),
            _ => None,
        }
    }

    fn is_tlsdesc_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_X86_64_GOTPC32_TLSDESC | elf::R_X86_64_TLSDESC_CALL)
    }

    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)> {
        match r_type {
            elf::R_X86_64_64 => Some((RelocWidth::W64, rc.s + rc.a)),
            elf::R_X86_64_32 | elf::R_X86_64_32S => Some((RelocWidth::W32, rc.s + rc.a)),
            elf::R_X86_64_16 => Some((RelocWidth::W16, rc.s + rc.a)),
            elf::R_X86_64_8 => Some((RelocWidth::W8, rc.s + rc.a)),
            elf::R_X86_64_PC64 => Some((RelocWidth::W64, rc.s + rc.a - rc.p)),
            elf::R_X86_64_PC32 | elf::R_X86_64_PLT32 | elf::R_X86_64_GOTPC32 => {
                let target = if r_type == elf::R_X86_64_PLT32 && rc.has_plt { rc.plt_addr } else { rc.s };
                Some((RelocWidth::W32, target + rc.a - rc.p))
            }
            elf::R_X86_64_PC16 => Some((RelocWidth::W16, rc.s + rc.a - rc.p)),
            elf::R_X86_64_PC8 => Some((RelocWidth::W8, rc.s + rc.a - rc.p)),
            elf::R_X86_64_GOTPCREL | elf::R_X86_64_GOTPCREL64 => Some((RelocWidth::W32, rc.got + rc.g + rc.a - rc.p)),
            elf::R_X86_64_GOTTPOFF => Some((RelocWidth::W32, rc.got + rc.g + rc.a - rc.p)),
            elf::R_X86_64_TPOFF32 => Some((RelocWidth::W32, rc.s + rc.a - rc.tp)),
            elf::R_X86_64_TPOFF64 => Some((RelocWidth::W64, rc.s + rc.a - rc.tp)),
            elf::R_X86_64_DTPOFF32 => Some((RelocWidth::W32, rc.s + rc.a - rc.dtp)),
            elf::R_X86_64_DTPOFF64 => Some((RelocWidth::W64, rc.s + rc.a - rc.dtp)),
            elf::R_X86_64_RELATIVE => Some((RelocWidth::W64, rc.s + rc.a)),
            _ => None,
        }
    }

    fn range_check(&self, r_type: u32, value: i64) -> Result<(), (i64, i64)> {
        match r_type {
            elf::R_X86_64_32 => {
                if !(0..=u32::MAX as i64).contains(&value) {
                    Err((0, u32::MAX as i64))
                } else {
                    Ok(())
                }
            }
            elf::R_X86_64_32S | elf::R_X86_64_PC32 | elf::R_X86_64_PLT32 | elf::R_X86_64_GOTPCREL | elf::R_X86_64_GOTTPOFF => {
                if value < i32::MIN as i64 || value > i32::MAX as i64 {
                    Err((i32::MIN as i64, i32::MAX as i64))
                } else {
                    Ok(())
                }
            }
            elf::R_X86_64_16 => {
                if !(0..=u16::MAX as i64).contains(&value) {
                    Err((0, u16::MAX as i64))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc32_is_recognized_as_pcrel_not_absolute() {
        let t = X86_64Target;
        assert!(t.is_pcrel_reloc(elf::R_X86_64_PC32));
        assert!(!t.is_absolute_reloc(elf::R_X86_64_PC32));
    }

    #[test]
    fn range_check_rejects_oversized_32s() {
        let t = X86_64Target;
        assert!(t.range_check(elf::R_X86_64_32S, (i32::MAX as i64) + 1).is_err());
        assert!(t.range_check(elf::R_X86_64_32S, 0).is_ok());
    }
}
