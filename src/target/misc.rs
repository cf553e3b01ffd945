//! Generic-table-only targets (spec.md §6 lists `EM_386`, `EM_SPARCV9`,
//! `EM_68K` among the supported object machine codes, but mold never gave
//! any of the three a relaxation or thunk engine). No teacher or
//! `original_source/` precedent for any of these three; the relocation
//! constants come straight from `object::elf`. One shared module rather
//! than one file each, matching the density SPEC_FULL.md calls for:
//! "generic-table only", not a full instruction-encoding engine.

use object::elf;

use super::{MachineType, RelocContext, RelocWidth, Target, TlsModel};

pub struct MiscTarget {
    machine: MachineType,
}

impl MiscTarget {
    pub fn new(machine: MachineType) -> Self {
        MiscTarget { machine }
    }
}

impl Target for MiscTarget {
    fn machine(&self) -> MachineType {
        self.machine
    }

    fn is_little_endian(&self) -> bool {
        !matches!(self.machine, MachineType::Sparc64 | MachineType::M68k | MachineType::Ppc)
    }

    fn is_rela(&self) -> bool {
        !matches!(self.machine, MachineType::I386)
    }

    fn needs_got(&self, r_type: u32) -> bool {
        match self.machine {
            MachineType::I386 => matches!(r_type, elf::R_386_GOT32 | elf::R_386_GOT32X | elf::R_386_GOTOFF | elf::R_386_GOTPC),
            MachineType::Sparc64 => matches!(r_type, elf::R_SPARC_GOT10 | elf::R_SPARC_GOT13 | elf::R_SPARC_GOT22),
            MachineType::M68k => matches!(r_type, elf::R_68K_GOT32 | elf::R_68K_GOT16 | elf::R_68K_GOT8),
            _ => false,
        }
    }

    fn is_plt_reloc(&self, r_type: u32) -> bool {
        match self.machine {
            MachineType::I386 => matches!(r_type, elf::R_386_PLT32),
            MachineType::Sparc64 => matches!(r_type, elf::R_SPARC_WPLT30 | elf::R_SPARC_PLT64),
            MachineType::M68k => matches!(r_type, elf::R_68K_PLT32 | elf::R_68K_PLT16 | elf::R_68K_PLT8),
            _ => false,
        }
    }

    fn is_absolute_reloc(&self, r_type: u32) -> bool {
        match self.machine {
            MachineType::I386 => matches!(r_type, elf::R_386_32 | elf::R_386_16 | elf::R_386_8),
            MachineType::Sparc64 => matches!(r_type, elf::R_SPARC_64 | elf::R_SPARC_32 | elf::R_SPARC_UA64 | elf::R_SPARC_UA32),
            MachineType::M68k => matches!(r_type, elf::R_68K_32 | elf::R_68K_16 | elf::R_68K_8),
            _ => false,
        }
    }

    fn is_pcrel_reloc(&self, r_type: u32) -> bool {
        match self.machine {
            MachineType::I386 => matches!(r_type, elf::R_386_PC32 | elf::R_386_PC16 | elf::R_386_PC8 | elf::R_386_PLT32),
            MachineType::Sparc64 => matches!(r_type, elf::R_SPARC_DISP32 | elf::R_SPARC_DISP64 | elf::R_SPARC_WPLT30),
            MachineType::M68k => matches!(r_type, elf::R_68K_PC32 | elf::R_68K_PC16 | elf::R_68K_PC8 | elf::R_68K_PLT32),
            _ => false,
        }
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        match self.machine {
            MachineType::I386 => match r_type {
                elf::R_386_TLS_GD => Some(TlsModel::GeneralDynamic),
                elf::R_386_TLS_LDM => Some(TlsModel::LocalDynamic),
                elf::R_386_TLS_IE | elf::R_386_TLS_GOTIE => Some(TlsModel::InitialExec),
                elf::R_386_TLS_LE | elf::R_386_TLS_LE_32 => Some(TlsModel::LocalExec),
                _ => None,
            },
            _ => None,
        }
    }

    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)> {
        match self.machine {
            MachineType::I386 => match r_type {
                elf::R_386_32 => Some((RelocWidth::W32, rc.s + rc.a)),
                elf::R_386_16 => Some((RelocWidth::W16, rc.s + rc.a)),
                elf::R_386_8 => Some((RelocWidth::W8, rc.s + rc.a)),
                elf::R_386_PC32 | elf::R_386_PLT32 => {
                    let target = if r_type == elf::R_386_PLT32 && rc.has_plt { rc.plt_addr } else { rc.s };
                    Some((RelocWidth::W32, target + rc.a - rc.p))
                }
                elf::R_386_PC16 => Some((RelocWidth::W16, rc.s + rc.a - rc.p)),
                elf::R_386_PC8 => Some((RelocWidth::W8, rc.s + rc.a - rc.p)),
                elf::R_386_GOTOFF => Some((RelocWidth::W32, rc.s + rc.a - rc.got)),
                elf::R_386_GOTPC => Some((RelocWidth::W32, rc.got + rc.a - rc.p)),
                elf::R_386_RELATIVE => Some((RelocWidth::W32, rc.s + rc.a)),
                _ => None,
            },
            MachineType::Sparc64 => match r_type {
                elf::R_SPARC_64 | elf::R_SPARC_UA64 => Some((RelocWidth::W64, rc.s + rc.a)),
                elf::R_SPARC_32 | elf::R_SPARC_UA32 => Some((RelocWidth::W32, rc.s + rc.a)),
                elf::R_SPARC_DISP64 => Some((RelocWidth::W64, rc.s + rc.a - rc.p)),
                elf::R_SPARC_DISP32 => Some((RelocWidth::W32, rc.s + rc.a - rc.p)),
                elf::R_SPARC_RELATIVE => Some((RelocWidth::W64, rc.s + rc.a)),
                _ => None,
            },
            MachineType::M68k => match r_type {
                elf::R_68K_32 => Some((RelocWidth::W32, rc.s + rc.a)),
                elf::R_68K_16 => Some((RelocWidth::W16, rc.s + rc.a)),
                elf::R_68K_8 => Some((RelocWidth::W8, rc.s + rc.a)),
                elf::R_68K_PC32 => Some((RelocWidth::W32, rc.s + rc.a - rc.p)),
                elf::R_68K_PC16 => Some((RelocWidth::W16, rc.s + rc.a - rc.p)),
                elf::R_68K_PC8 => Some((RelocWidth::W8, rc.s + rc.a - rc.p)),
                elf::R_68K_RELATIVE => Some((RelocWidth::W32, rc.s + rc.a)),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i386_is_rel_type() {
        assert!(!MiscTarget::new(MachineType::I386).is_rela());
    }

    #[test]
    fn sparc_and_m68k_are_big_endian() {
        assert!(!MiscTarget::new(MachineType::Sparc64).is_little_endian());
        assert!(!MiscTarget::new(MachineType::M68k).is_little_endian());
    }

    #[test]
    fn i386_plt32_is_both_plt_and_pcrel() {
        let t = MiscTarget::new(MachineType::I386);
        assert!(t.is_plt_reloc(elf::R_386_PLT32));
        assert!(t.is_pcrel_reloc(elf::R_386_PLT32));
    }
}
