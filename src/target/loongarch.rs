//! LoongArch relocation table and instruction-immediate encoders (spec.md
//! §4.2, §4.5), grounded in `original_source/src/arch-loongarch.cc`.
//! Parameterized over `is_64` for the 32/64-bit psABI variants, mirroring
//! `riscv.rs`'s shape since both targets cooperate with the same `--relax`
//! shrinking engine (C5).

use object::elf;

use super::{load_u32, store_u32, MachineType, RelocContext, RelocWidth, Target, TlsModel};

pub struct LoongArchTarget {
    is_64: bool,
}

impl LoongArchTarget {
    pub fn new(is_64: bool) -> Self {
        LoongArchTarget { is_64 }
    }
}

/// si20 field (bits [24:5]) used by `pcalau12i`/`lu12i.w`-class instructions.
fn encode_si20(insn: u32, imm: i64) -> u32 {
    (insn & !(0xf_ffff << 5)) | (((imm as u32) & 0xf_ffff) << 5)
}

/// si12 field (bits [21:10]) used by `addi.w`/`addi.d`/`ld.*`/`st.*`.
fn encode_si12(insn: u32, imm: i64) -> u32 {
    (insn & !(0xfff << 10)) | (((imm as u32) & 0xfff) << 10)
}

/// offs26 field split across bits [9:0] (low) and [25:10] (high), used by
/// `b`/`bl`.
fn encode_offs26(insn: u32, imm: i64) -> u32 {
    let imm = (imm as u32) & 0x3ff_ffff;
    let lo = imm & 0x3ff;
    let hi = imm >> 10;
    (insn & !0x3ff_ffff) | (hi) | (lo << 10)
}

fn hi20_lo12(value: i64) -> (i64, i64) {
    let hi20 = (value + 0x800) >> 12;
    let lo12 = value - (hi20 << 12);
    (hi20, lo12)
}

impl Target for LoongArchTarget {
    fn machine(&self) -> MachineType {
        if self.is_64 {
            MachineType::LoongArch64
        } else {
            MachineType::LoongArch32
        }
    }

    fn is_little_endian(&self) -> bool {
        true
    }

    fn is_relax_marker(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_LARCH_RELAX | elf::R_LARCH_ALIGN | elf::R_LARCH_MARK_LA | elf::R_LARCH_MARK_PCREL)
    }

    fn needs_got(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_LARCH_GOT_PC_HI20 | elf::R_LARCH_GOT_PC_LO12 | elf::R_LARCH_TLS_IE_PC_HI20 | elf::R_LARCH_TLS_IE_PC_LO12)
    }

    fn is_plt_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_LARCH_B26 | elf::R_LARCH_PLT_PC_HI20 | elf::R_LARCH_PLT_PC_LO12)
    }

    fn is_absolute_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_LARCH_64 | elf::R_LARCH_32)
    }

    fn is_pcrel_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_LARCH_B26 | elf::R_LARCH_PCALA_HI20 | elf::R_LARCH_PCALA_LO12 | elf::R_LARCH_PLT_PC_HI20 | elf::R_LARCH_PLT_PC_LO12
        )
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        match r_type {
            elf::R_LARCH_TLS_GD_PC_HI20 => Some(TlsModel::GeneralDynamic),
            elf::R_LARCH_TLS_LD_PC_HI20 => Some(TlsModel::LocalDynamic),
            elf::R_LARCH_TLS_IE_PC_HI20 | elf::R_LARCH_TLS_IE_PC_LO12 => Some(TlsModel::InitialExec),
            elf::R_LARCH_TLS_LE_HI20 | elf::R_LARCH_TLS_LE_LO12 => Some(TlsModel::LocalExec),
            _ => None,
        }
    }

    fn is_tlsdesc_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_LARCH_TLS_DESC_PC_HI20 | elf::R_LARCH_TLS_DESC_PC_LO12 | elf::R_LARCH_TLS_DESC_LD | elf::R_LARCH_TLS_DESC_CALL)
    }

    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)> {
        match r_type {
            elf::R_LARCH_64 => Some((RelocWidth::W64, rc.s + rc.a)),
            elf::R_LARCH_32 => Some((RelocWidth::W32, rc.s + rc.a)),
            elf::R_LARCH_RELATIVE => Some((RelocWidth::W64, rc.s + rc.a)),
            _ => None,
        }
    }

    fn apply_instruction_reloc(&self, r_type: u32, place: &mut [u8], rc: &RelocContext) -> Result<(), String> {
        match r_type {
            elf::R_LARCH_PCALA_HI20 | elf::R_LARCH_PLT_PC_HI20 | elf::R_LARCH_GOT_PC_HI20 | elf::R_LARCH_TLS_IE_PC_HI20 => {
                let target = if matches!(r_type, elf::R_LARCH_PLT_PC_HI20) && rc.has_plt {
                    rc.plt_addr + rc.a
                } else if matches!(r_type, elf::R_LARCH_GOT_PC_HI20 | elf::R_LARCH_TLS_IE_PC_HI20) {
                    rc.got + rc.g + rc.a
                } else {
                    rc.s + rc.a
                };
                let (hi20, _) = hi20_lo12(target - rc.p);
                let insn = load_u32(place, true);
                store_u32(place, encode_si20(insn, hi20), true);
                Ok(())
            }
            elf::R_LARCH_PCALA_LO12 | elf::R_LARCH_PLT_PC_LO12 | elf::R_LARCH_GOT_PC_LO12 | elf::R_LARCH_TLS_IE_PC_LO12 => {
                let target = if matches!(r_type, elf::R_LARCH_GOT_PC_LO12 | elf::R_LARCH_TLS_IE_PC_LO12) {
                    rc.got + rc.g + rc.a
                } else {
                    rc.s + rc.a
                };
                let (_, lo12) = hi20_lo12(target - rc.p);
                let insn = load_u32(place, true);
                store_u32(place, encode_si12(insn, lo12), true);
                Ok(())
            }
            elf::R_LARCH_B26 => {
                let target = if rc.has_plt { rc.plt_addr } else { rc.s };
                let imm = (target + rc.a - rc.p) >> 2;
                let insn = load_u32(place, true);
                store_u32(place, encode_offs26(insn, imm), true);
                Ok(())
            }
            elf::R_LARCH_TLS_LE_HI20 => {
                let (hi20, _) = hi20_lo12(rc.s + rc.a - rc.tp);
                let insn = load_u32(place, true);
                store_u32(place, encode_si20(insn, hi20), true);
                Ok(())
            }
            elf::R_LARCH_TLS_LE_LO12 => {
                let (_, lo12) = hi20_lo12(rc.s + rc.a - rc.tp);
                let insn = load_u32(place, true);
                store_u32(place, encode_si12(insn, lo12), true);
                Ok(())
            }
            _ => Err(format!("unsupported LoongArch relocation {r_type}")),
        }
    }

    fn range_check(&self, r_type: u32, value: i64) -> Result<(), (i64, i64)> {
        match r_type {
            elf::R_LARCH_B26 => {
                const DIST: i64 = 128 * 1024 * 1024;
                if value < -DIST || value >= DIST {
                    Err((-DIST, DIST))
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
    fn relax_markers_recognized() {
        let t = LoongArchTarget::new(true);
        assert!(t.is_relax_marker(elf::R_LARCH_RELAX));
        assert!(t.is_relax_marker(elf::R_LARCH_ALIGN));
        assert!(!t.is_relax_marker(elf::R_LARCH_B26));
    }
}
