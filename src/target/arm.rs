//! ARM32 relocation table and BL/BLX interworking veneers (spec.md §4.2,
//! §4.4). `original_source/`'s pack only carries `arch-arm64.cc`, not a
//! 32-bit ARM source file, so this module follows the generic ELF/ARM
//! psABI instead, shaped like `sh4.rs`'s REL-type encoding and
//! `aarch64.rs`'s branch-thunk pattern (no direct teacher or
//! original-source precedent, per DESIGN.md).

use object::elf;

use super::{load_u32, store_u32, MachineType, RelocContext, RelocWidth, Target, TlsModel};

pub struct ArmTarget {
    little_endian: bool,
}

impl ArmTarget {
    pub fn new(little_endian: bool) -> Self {
        ArmTarget { little_endian }
    }
}

pub const BRANCH_DISTANCE: i64 = 16 * 1024 * 1024;

impl Target for ArmTarget {
    fn machine(&self) -> MachineType {
        if self.little_endian {
            MachineType::Arm
        } else {
            MachineType::ArmBe
        }
    }

    fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// ARM32 is REL-type: the addend is the existing value at the
    /// relocated place, not a separate record field (spec.md §9 Open
    /// Question).
    fn is_rela(&self) -> bool {
        false
    }

    fn needs_got(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_ARM_GOT_BREL | elf::R_ARM_GOT_PREL | elf::R_ARM_TLS_IE32)
    }

    fn is_plt_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_ARM_CALL | elf::R_ARM_JUMP24 | elf::R_ARM_PLT32 | elf::R_ARM_THM_CALL | elf::R_ARM_THM_JUMP24)
    }

    fn is_absolute_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_ARM_ABS32 | elf::R_ARM_ABS16 | elf::R_ARM_ABS8)
    }

    fn is_pcrel_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_ARM_REL32 | elf::R_ARM_CALL | elf::R_ARM_JUMP24 | elf::R_ARM_THM_CALL | elf::R_ARM_THM_JUMP24 | elf::R_ARM_PLT32
        )
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        match r_type {
            elf::R_ARM_TLS_GD32 => Some(TlsModel::GeneralDynamic),
            elf::R_ARM_TLS_LDM32 => Some(TlsModel::LocalDynamic),
            elf::R_ARM_TLS_IE32 => Some(TlsModel::InitialExec),
            elf::R_ARM_TLS_LE32 => Some(TlsModel::LocalExec),
            _ => None,
        }
    }

    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)> {
        match r_type {
            elf::R_ARM_ABS32 => Some((RelocWidth::W32, rc.s + rc.a)),
            elf::R_ARM_ABS16 => Some((RelocWidth::W16, rc.s + rc.a)),
            elf::R_ARM_ABS8 => Some((RelocWidth::W8, rc.s + rc.a)),
            elf::R_ARM_REL32 => Some((RelocWidth::W32, rc.s + rc.a - rc.p)),
            elf::R_ARM_RELATIVE => Some((RelocWidth::W32, rc.s + rc.a)),
            elf::R_ARM_TLS_LE32 => Some((RelocWidth::W32, rc.s + rc.a - rc.tp)),
            _ => None,
        }
    }

    fn apply_instruction_reloc(&self, r_type: u32, place: &mut [u8], rc: &RelocContext) -> Result<(), String> {
        let le = self.little_endian;
        match r_type {
            elf::R_ARM_CALL | elf::R_ARM_JUMP24 | elf::R_ARM_PLT32 => {
                let target = if rc.has_plt { rc.plt_addr } else { rc.s };
                let imm24 = (target + rc.a - rc.p) >> 2;
                if !(-(1i64 << 23)..(1i64 << 23)).contains(&imm24) {
                    return Err(format!("R_ARM_CALL/JUMP24 out of range: {imm24:#x}"));
                }
                let insn = load_u32(place, le);
                store_u32(place, (insn & !0x00ff_ffff) | ((imm24 as u32) & 0x00ff_ffff), le);
                Ok(())
            }
            elf::R_ARM_GOT_BREL | elf::R_ARM_GOT_PREL => {
                let value = rc.got + rc.g + rc.a - rc.p;
                let insn = load_u32(place, le);
                store_u32(place, (insn & !0xffff_ffff) | (value as u32), le);
                Ok(())
            }
            _ => Err(format!("unsupported ARM32 relocation {r_type}")),
        }
    }

    fn range_check(&self, r_type: u32, value: i64) -> Result<(), (i64, i64)> {
        match r_type {
            elf::R_ARM_CALL | elf::R_ARM_JUMP24 | elf::R_ARM_PLT32 => {
                if value < -BRANCH_DISTANCE || value >= BRANCH_DISTANCE {
                    Err((-BRANCH_DISTANCE, BRANCH_DISTANCE))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// A BL/BLX veneer that flips instruction-set state when the call site
/// and target disagree on ARM vs Thumb mode (spec.md §4.4 "ARM32: BL/BLX
/// veneers that flip instruction-set state").
pub fn interworking_veneer(target_addr: u64, target_is_thumb: bool) -> [u8; 8] {
    let mut out = [0u8; 8];
    // LDR pc, [pc, #0]
    out[0..4].copy_from_slice(&0xe51f_f004u32.to_le_bytes());
    let addr = if target_is_thumb { target_addr | 1 } else { target_addr & !1 };
    out[4..8].copy_from_slice(&(addr as u32).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_reloc_range_checks_sixteen_mib() {
        let t = ArmTarget::new(true);
        assert!(t.range_check(elf::R_ARM_CALL, BRANCH_DISTANCE).is_err());
        assert!(t.range_check(elf::R_ARM_CALL, BRANCH_DISTANCE - 4).is_ok());
    }

    #[test]
    fn is_rela_false_for_arm32() {
        assert!(!ArmTarget::new(true).is_rela());
    }
}
