//! AArch64 relocation table and range-extension thunk encoders (spec.md
//! §4.2, §4.4), grounded in `original_source/src/arch-arm64.cc`'s
//! relocation switch and `RangeExtensionThunk` byte templates — the
//! teacher has no AArch64 support at all, so this module has no direct
//! teacher precedent.

use object::elf;

use super::{load_u32, store_u32, MachineType, RelocContext, RelocWidth, Target, TlsModel};

pub struct AArch64Target {
    little_endian: bool,
}

impl AArch64Target {
    pub fn new(little_endian: bool) -> Self {
        AArch64Target { little_endian }
    }
}

/// CALL26/JUMP26 branch immediate range: ±128 MiB (spec.md §4.4).
pub const BRANCH_DISTANCE: i64 = 128 * 1024 * 1024;

fn page(addr: i64) -> i64 {
    addr & !0xfff
}

/// Encodes the 21-bit split immediate ADRP/ADR use: bits [30:29] hold the
/// low 2 bits, bits [23:5] hold the high 19 bits.
fn encode_adr_imm(insn: u32, imm21: i64) -> u32 {
    let imm = imm21 as u32 & 0x1f_ffff;
    let immlo = imm & 0x3;
    let immhi = (imm >> 2) & 0x7_ffff;
    (insn & !(0x3 << 29) & !(0x7_ffff << 5)) | (immlo << 29) | (immhi << 5)
}

fn encode_movw_imm16(insn: u32, imm16: u64) -> u32 {
    (insn & !(0xffff << 5)) | (((imm16 & 0xffff) as u32) << 5)
}

fn encode_branch_imm26(insn: u32, imm26: i64) -> u32 {
    (insn & !0x3ff_ffff) | ((imm26 as u32) & 0x3ff_ffff)
}

fn encode_condbr_imm19(insn: u32, imm19: i64) -> u32 {
    (insn & !(0x7_ffff << 5)) | (((imm19 as u32) & 0x7_ffff) << 5)
}

impl Target for AArch64Target {
    fn machine(&self) -> MachineType {
        if self.little_endian {
            MachineType::AArch64
        } else {
            MachineType::AArch64Be
        }
    }

    fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    fn needs_got(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_AARCH64_ADR_GOT_PAGE
                | elf::R_AARCH64_LD64_GOT_LO12_NC
                | elf::R_AARCH64_TLSIE_ADR_GOTTPREL_PAGE21
                | elf::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC
                | elf::R_AARCH64_TLSDESC_ADR_PAGE21
                | elf::R_AARCH64_TLSDESC_LD64_LO12
        )
    }

    fn is_plt_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_AARCH64_CALL26 | elf::R_AARCH64_JUMP26)
    }

    fn is_absolute_reloc(&self, r_type: u32) -> bool {
        matches!(r_type, elf::R_AARCH64_ABS64 | elf::R_AARCH64_ABS32 | elf::R_AARCH64_ABS16)
    }

    fn is_pcrel_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_AARCH64_PREL64
                | elf::R_AARCH64_PREL32
                | elf::R_AARCH64_PREL16
                | elf::R_AARCH64_ADR_PREL_PG_HI21
                | elf::R_AARCH64_CALL26
                | elf::R_AARCH64_JUMP26
                | elf::R_AARCH64_CONDBR19
                | elf::R_AARCH64_LD_PREL_LO19
        )
    }

    fn is_tlsdesc_reloc(&self, r_type: u32) -> bool {
        matches!(
            r_type,
            elf::R_AARCH64_TLSDESC_ADR_PAGE21
                | elf::R_AARCH64_TLSDESC_LD64_LO12
                | elf::R_AARCH64_TLSDESC_ADD_LO12_NC
                | elf::R_AARCH64_TLSDESC_CALL
        )
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        match r_type {
            elf::R_AARCH64_TLSGD_ADR_PAGE21 | elf::R_AARCH64_TLSGD_ADD_LO12_NC => Some(TlsModel::GeneralDynamic),
            elf::R_AARCH64_TLSLD_ADR_PAGE21 => Some(TlsModel::LocalDynamic),
            elf::R_AARCH64_TLSIE_ADR_GOTTPREL_PAGE21 | elf::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC => Some(TlsModel::InitialExec),
            elf::R_AARCH64_TLSLE_ADD_TPREL_HI12 | elf::R_AARCH64_TLSLE_ADD_TPREL_LO12_NC => Some(TlsModel::LocalExec),
            _ => None,
        }
    }

    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)> {
        match r_type {
            elf::R_AARCH64_ABS64 => Some((RelocWidth::W64, rc.s + rc.a)),
            elf::R_AARCH64_ABS32 => Some((RelocWidth::W32, rc.s + rc.a)),
            elf::R_AARCH64_ABS16 => Some((RelocWidth::W16, rc.s + rc.a)),
            elf::R_AARCH64_PREL64 => Some((RelocWidth::W64, rc.s + rc.a - rc.p)),
            elf::R_AARCH64_PREL32 => Some((RelocWidth::W32, rc.s + rc.a - rc.p)),
            elf::R_AARCH64_PREL16 => Some((RelocWidth::W16, rc.s + rc.a - rc.p)),
            elf::R_AARCH64_RELATIVE => Some((RelocWidth::W64, rc.s + rc.a)),
            _ => None,
        }
    }

    fn apply_instruction_reloc(&self, r_type: u32, place: &mut [u8], rc: &RelocContext) -> Result<(), String> {
        let le = self.little_endian;
        match r_type {
            elf::R_AARCH64_ADR_PREL_PG_HI21 | elf::R_AARCH64_TLSDESC_ADR_PAGE21 | elf::R_AARCH64_TLSGD_ADR_PAGE21 | elf::R_AARCH64_TLSLD_ADR_PAGE21 => {
                let imm = (page(rc.s + rc.a) - page(rc.p)) >> 12;
                let insn = load_u32(place, le);
                store_u32(place, encode_adr_imm(insn, imm), le);
                Ok(())
            }
            elf::R_AARCH64_ADR_GOT_PAGE | elf::R_AARCH64_TLSIE_ADR_GOTTPREL_PAGE21 => {
                let imm = (page(rc.got + rc.g + rc.a) - page(rc.p)) >> 12;
                let insn = load_u32(place, le);
                store_u32(place, encode_adr_imm(insn, imm), le);
                Ok(())
            }
            elf::R_AARCH64_ADD_ABS_LO12_NC
            | elf::R_AARCH64_LD64_GOT_LO12_NC
            | elf::R_AARCH64_TLSIE_LD64_GOTTPREL_LO12_NC
            | elf::R_AARCH64_TLSDESC_LD64_LO12
            | elf::R_AARCH64_TLSDESC_ADD_LO12_NC => {
                let lo12 = (rc.s + rc.a) & 0xfff;
                let insn = load_u32(place, le);
                store_u32(place, (insn & !(0xfff << 10)) | ((lo12 as u32) << 10), le);
                Ok(())
            }
            elf::R_AARCH64_CALL26 | elf::R_AARCH64_JUMP26 => {
                let target = if r_type == elf::R_AARCH64_CALL26 && rc.has_plt { rc.plt_addr } else { rc.s };
                let imm26 = (target + rc.a - rc.p) >> 2;
                if !(-(1i64 << 25)..(1i64 << 25)).contains(&imm26) {
                    return Err(format!("R_AARCH64_CALL26/JUMP26 out of range: {imm26:#x}"));
                }
                let insn = load_u32(place, le);
                store_u32(place, encode_branch_imm26(insn, imm26), le);
                Ok(())
            }
            elf::R_AARCH64_CONDBR19 | elf::R_AARCH64_LD_PREL_LO19 => {
                let imm19 = (rc.s + rc.a - rc.p) >> 2;
                let insn = load_u32(place, le);
                store_u32(place, encode_condbr_imm19(insn, imm19), le);
                Ok(())
            }
            elf::R_AARCH64_TLSLE_ADD_TPREL_HI12 => {
                let imm = ((rc.s + rc.a - rc.tp) >> 12) & 0xfff;
                let insn = load_u32(place, le);
                store_u32(place, (insn & !(0xfff << 10)) | ((imm as u32) << 10), le);
                Ok(())
            }
            elf::R_AARCH64_TLSLE_ADD_TPREL_LO12_NC | elf::R_AARCH64_TLSGD_ADD_LO12_NC => {
                let imm = (rc.s + rc.a - rc.tp) & 0xfff;
                let insn = load_u32(place, le);
                store_u32(place, (insn & !(0xfff << 10)) | ((imm as u32) << 10), le);
                Ok(())
            }
            elf::R_AARCH64_MOVW_UABS_G0 | elf::R_AARCH64_MOVW_UABS_G0_NC => {
                let insn = load_u32(place, le);
                store_u32(place, encode_movw_imm16(insn, (rc.s + rc.a) as u64), le);
                Ok(())
            }
            elf::R_AARCH64_MOVW_UABS_G1 | elf::R_AARCH64_MOVW_UABS_G1_NC => {
                let insn = load_u32(place, le);
                store_u32(place, encode_movw_imm16(insn, ((rc.s + rc.a) as u64) >> 16), le);
                Ok(())
            }
            elf::R_AARCH64_MOVW_UABS_G2 | elf::R_AARCH64_MOVW_UABS_G2_NC => {
                let insn = load_u32(place, le);
                store_u32(place, encode_movw_imm16(insn, ((rc.s + rc.a) as u64) >> 32), le);
                Ok(())
            }
            elf::R_AARCH64_MOVW_UABS_G3 => {
                let insn = load_u32(place, le);
                store_u32(place, encode_movw_imm16(insn, ((rc.s + rc.a) as u64) >> 48), le);
                Ok(())
            }
            _ => Err(format!("unsupported AArch64 relocation {r_type}")),
        }
    }

    fn range_check(&self, r_type: u32, value: i64) -> Result<(), (i64, i64)> {
        match r_type {
            elf::R_AARCH64_CALL26 | elf::R_AARCH64_JUMP26 => {
                if value < -BRANCH_DISTANCE || value >= BRANCH_DISTANCE {
                    Err((-BRANCH_DISTANCE, BRANCH_DISTANCE))
                } else {
                    Ok(())
                }
            }
            elf::R_AARCH64_CONDBR19 | elf::R_AARCH64_LD_PREL_LO19 => {
                const DIST: i64 = 1024 * 1024;
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

/// 16-byte "short" range-extension thunk: `ADRP+ADD` rematerializes the
/// full target address, `BR` jumps, `BRK` pads (spec.md §4.4).
pub fn short_thunk(thunk_addr: u64, target_addr: u64) -> [u8; 16] {
    let imm21 = (page(target_addr as i64) - page(thunk_addr as i64)) >> 12;
    let lo12 = (target_addr & 0xfff) as u32;
    let adrp = encode_adr_imm(0x9000_0010, imm21); // ADRP x16, #imm
    let add = 0x9100_0210 | (lo12 << 10); // ADD x16, x16, #lo12
    let br = 0xd61f_0200u32; // BR x16
    let brk = 0xd420_0000u32; // BRK #0
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&adrp.to_le_bytes());
    out[4..8].copy_from_slice(&add.to_le_bytes());
    out[8..12].copy_from_slice(&br.to_le_bytes());
    out[12..16].copy_from_slice(&brk.to_le_bytes());
    out
}

/// 32-byte "long" range-extension thunk: `ADR+MOVZ+MOVK+MOVK+ADD+BR` for
/// targets too far even for the page-relative short form, padded with
/// `BRK` (spec.md §4.4).
pub fn long_thunk(target_addr: u64) -> [u8; 32] {
    let imm = target_addr;
    let adr = 0x1000_0010u32; // ADR x16, #0 (placeholder base)
    let movz = encode_movw_imm16(0xd280_0010, imm); // MOVZ x16, #imm[15:0]
    let movk1 = encode_movw_imm16(0xf2a0_0010, imm >> 16) | (1 << 21); // MOVK x16, lsl #16
    let movk2 = encode_movw_imm16(0xf2c0_0010, imm >> 32) | (2 << 21); // MOVK x16, lsl #32
    let br = 0xd61f_0200u32;
    let brk = 0xd420_0000u32;
    let mut out = [0u8; 32];
    out[0..4].copy_from_slice(&adr.to_le_bytes());
    out[4..8].copy_from_slice(&movz.to_le_bytes());
    out[8..12].copy_from_slice(&movk1.to_le_bytes());
    out[12..16].copy_from_slice(&movk2.to_le_bytes());
    out[16..20].copy_from_slice(&br.to_le_bytes());
    out[20..24].copy_from_slice(&brk.to_le_bytes());
    out[24..28].copy_from_slice(&brk.to_le_bytes());
    out[28..32].copy_from_slice(&brk.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call26_roundtrips_identity_for_aligned_displacements() {
        let t = AArch64Target::new(true);
        let mut place = [0u8; 4];
        let rc = RelocContext { s: 0x10_0000, a: 0, p: 0x1000, g: 0, got: 0, tp: 0, dtp: 0, has_plt: false, plt_addr: 0 };
        t.apply_instruction_reloc(elf::R_AARCH64_CALL26, &mut place, &rc).unwrap();
        let insn = load_u32(&place, true);
        let imm26 = (insn & 0x3ff_ffff) as i32;
        // sign-extend 26 bits
        let imm26 = (imm26 << 6) >> 6;
        assert_eq!((imm26 as i64) << 2, rc.s - rc.p);
    }

    #[test]
    fn call26_out_of_range_errors() {
        let t = AArch64Target::new(true);
        assert!(t.range_check(elf::R_AARCH64_CALL26, BRANCH_DISTANCE).is_err());
        assert!(t.range_check(elf::R_AARCH64_CALL26, BRANCH_DISTANCE - 4).is_ok());
    }

    #[test]
    fn short_thunk_is_sixteen_bytes_aligned_sequence() {
        let bytes = short_thunk(0x1000, 0x9000_0000);
        assert_eq!(bytes.len(), 16);
    }
}
