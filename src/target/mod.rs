//! Target psABI abstraction (spec.md §9): a closed enum of machine types
//! plus a trait exposing per-psABI width, endian, relocation tables, and
//! instruction helpers, generalizing the teacher's single inline x86-64
//! `match r_type` switch (`link.rs::relocate`) spec.md §9 names directly:
//! "Represent targets as a small enum of machine types plus a trait ...
//! Each target is one module implementing the trait; the driver is generic
//! over it."

pub mod aarch64;
pub mod arm;
pub mod loongarch;
pub mod misc;
pub mod powerpc64;
pub mod riscv;
pub mod s390x;
pub mod sh4;
pub mod x86_64;

/// One relocation record decoded from an object file's `.rela`/`.rel`
/// section (spec.md §3 `ElfRel`), already endian/class-normalized to a
/// signed 64-bit addend regardless of the source psABI's native width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedReloc {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_sym: u32,
    pub r_addend: i64,
}

/// Closed set of supported object machine codes (spec.md §6). The variant
/// set is closed and known at build time, per spec.md §9's guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    X86_64,
    I386,
    AArch64,
    AArch64Be,
    Arm,
    ArmBe,
    RiscV32,
    RiscV64,
    Ppc,
    Ppc64V1,
    Ppc64V2,
    S390x,
    Sparc64,
    M68k,
    Sh4,
    LoongArch32,
    LoongArch64,
}

/// Output file kind, drives the absolute/PC-relative decision tables
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Dso,
    Pie,
    Pde,
}

/// Symbol class as seen by the relocation scan's decision tables (spec.md
/// §4.2: "parameterized by output mode ... x symbol class (absolute /
/// local / imported-data / imported-code)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Absolute,
    Local,
    ImportedData,
    ImportedCode,
}

/// What the absolute/PC-relative decision tables dictate for one
/// relocation (spec.md §4.2: "do nothing, emit a dynamic relocation,
/// request NEEDS_COPYREL, request NEEDS_PLT, request a canonical
/// NEEDS_CPLT, or error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsRelocAction {
    None,
    Dynamic,
    Copyrel,
    Plt,
    Cplt,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsModel {
    GeneralDynamic,
    LocalDynamic,
    InitialExec,
    LocalExec,
    Desc,
}

/// TP-relative constness classification for a TLSDESC relocation (spec.md
/// §4.2 "classify the TP-relative constness").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsDescConstness {
    LinkTimeConstant,
    StartupTimeConstant,
    NotConstant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPlan {
    RelaxToLe,
    RelaxToIe,
    KeepTlsDesc,
}

/// The natural write width for a relocation handled by the generic
/// load/store path; `Insn` and `Uleb128` are handled by
/// `Target::apply_instruction_reloc` instead (spec.md §4.2: "never modify
/// opcode/register fields except during relaxation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocWidth {
    W8,
    W16,
    W32,
    W64,
    Insn,
    Uleb128,
}

/// Inputs the apply pass's psABI formulas need (spec.md §4.2): `S`
/// (symbol address), `A` (addend), `P` (place address), `G` (GOT slot
/// offset), `GOT` (`.got` base address), `TP`/`DTP` (thread-pointer
/// bases), plus whatever the symbol's PLT slot looks like.
#[derive(Debug, Clone, Copy)]
pub struct RelocContext {
    pub s: i64,
    pub a: i64,
    pub p: i64,
    pub g: i64,
    pub got: i64,
    pub tp: i64,
    pub dtp: i64,
    pub has_plt: bool,
    pub plt_addr: i64,
}

/// The absolute-relocation decision table (spec.md §4.2). Word-size
/// absolute relocations may legally produce a dynamic relocation (the
/// dynamic linker can express `R_*_RELATIVE`/`R_*_GLOB_DAT` at a fixed
/// memory word), so this table never returns `Error`.
pub fn classify_absolute_reloc(mode: OutputMode, class: SymbolClass) -> AbsRelocAction {
    match (mode, class) {
        (_, SymbolClass::Absolute) => AbsRelocAction::None,
        (OutputMode::Pde, SymbolClass::Local) => AbsRelocAction::None,
        (OutputMode::Pde, SymbolClass::ImportedData) => AbsRelocAction::Copyrel,
        (OutputMode::Pde, SymbolClass::ImportedCode) => AbsRelocAction::Cplt,
        (OutputMode::Pie | OutputMode::Dso, SymbolClass::Local) => AbsRelocAction::Dynamic,
        (OutputMode::Pie | OutputMode::Dso, SymbolClass::ImportedData) => AbsRelocAction::Dynamic,
        (OutputMode::Pie | OutputMode::Dso, SymbolClass::ImportedCode) => AbsRelocAction::Cplt,
    }
}

/// The PC-relative decision table (spec.md §4.2): "use a stricter table
/// that forbids producing dynamic relocations (because the dynamic linker
/// cannot express them)". A PC-relative reference to a symbol that is not
/// known at link time (imported data, or — per this crate's Open Question
/// decision recorded in DESIGN.md — a `Local` symbol once the output
/// itself may be loaded at a different base than its definer, i.e. `Pie`/
/// `Dso`) therefore surfaces as `Dynamic`/`Error` rather than a usable
/// action, and the caller turns both into a hard error.
pub fn classify_pcrel_reloc(mode: OutputMode, class: SymbolClass) -> AbsRelocAction {
    match (mode, class) {
        (_, SymbolClass::Absolute) => AbsRelocAction::None,
        (OutputMode::Pde, SymbolClass::Local) => AbsRelocAction::None,
        (OutputMode::Pde, SymbolClass::ImportedData) => AbsRelocAction::Copyrel,
        (_, SymbolClass::ImportedCode) => AbsRelocAction::Plt,
        (OutputMode::Pie | OutputMode::Dso, SymbolClass::Local) => AbsRelocAction::Dynamic,
        (OutputMode::Pie | OutputMode::Dso, SymbolClass::ImportedData) => AbsRelocAction::Dynamic,
    }
}

/// TLSDESC transition table (spec.md §4.2 "TLS model transitions": "always
/// direction-preserving, the linker never strengthens the model").
pub fn classify_tlsdesc(is_static_output: bool, relax_enabled: bool, constness: TlsDescConstness) -> TlsPlan {
    if is_static_output || (relax_enabled && constness == TlsDescConstness::LinkTimeConstant) {
        TlsPlan::RelaxToLe
    } else if relax_enabled && constness == TlsDescConstness::StartupTimeConstant {
        TlsPlan::RelaxToIe
    } else {
        TlsPlan::KeepTlsDesc
    }
}

/// Per-psABI relocation engine (C4, spec.md §4.2) and, where applicable,
/// the relaxation-marker/thunk-encoder hooks C5/C6 dispatch through.
/// Closed over the machine-type enum; the driver and every pass that
/// needs to be machine-agnostic (`relax.rs`, `thunk.rs`,
/// `relocation::mod`) takes `&dyn Target` instead of hardcoding a single
/// architecture, per spec.md §9.
pub trait Target: Send + Sync {
    fn machine(&self) -> MachineType;
    fn is_little_endian(&self) -> bool;

    /// REL vs RELA: whether the addend lives in a separate relocation
    /// record field (`true`, the common case) or must be read from/written
    /// to the relocated bytes themselves (`false`). Per spec.md §9's Open
    /// Question, this predicate (and the analogous "does this target copy
    /// REL-type sections first" ordering in §4.9) is taken directly from
    /// each architecture's own source file rather than inferred from the
    /// spec text; ARM32 and SH-4 are the two REL-type targets in this pack.
    fn is_rela(&self) -> bool {
        true
    }

    /// True for target-specific relax/align markers the scan pass treats
    /// as no-ops (spec.md §4.2: "treat as no-op during scanning").
    fn is_relax_marker(&self, r_type: u32) -> bool {
        let _ = r_type;
        false
    }

    fn needs_got(&self, r_type: u32) -> bool;
    fn is_plt_reloc(&self, r_type: u32) -> bool;
    fn is_absolute_reloc(&self, r_type: u32) -> bool;
    fn is_pcrel_reloc(&self, r_type: u32) -> bool;

    fn is_tlsdesc_reloc(&self, r_type: u32) -> bool {
        let _ = r_type;
        false
    }

    fn tls_model_of(&self, r_type: u32) -> Option<TlsModel> {
        let _ = r_type;
        None
    }

    /// Generic word-size store path: returns the natural width and the
    /// value to write, for relocations that are a plain psABI formula
    /// (`S+A`, `S+A-P`, ...) rather than an instruction-encoded immediate.
    /// Returns `None` when `r_type` needs `apply_instruction_reloc` instead.
    fn apply_generic(&self, r_type: u32, rc: &RelocContext) -> Option<(RelocWidth, i64)>;

    /// Instruction-encoded immediates (AArch64 ADRP/ADR/LDR, RISC-V
    /// U/I/S/B/J/CI/CB/CJ forms, LoongArch pc-relative groups, s390x
    /// 12/16/20/24/32/DBL variants, PPC64 ha/lo/34-bit splits): masks the
    /// immediate bits and ORs the encoded value in, never touching
    /// opcode/register fields except during relaxation (spec.md §4.2).
    /// Called when `apply_generic` returns `None`.
    fn apply_instruction_reloc(&self, r_type: u32, place: &mut [u8], rc: &RelocContext) -> Result<(), String> {
        let _ = (place, rc);
        Err(format!("unsupported relocation type {r_type} for {:?}", self.machine()))
    }

    /// Range-checks a computed value before it is written, returning the
    /// allowed `[lo, hi)` on overflow for the diagnostic (spec.md §4.2:
    /// "on overflow, emit an error with the offending (... value,
    /// allowed-range)"). The default performs no check (used by targets/
    /// relocations whose natural word width can never overflow).
    fn range_check(&self, r_type: u32, value: i64) -> Result<(), (i64, i64)> {
        let _ = (r_type, value);
        Ok(())
    }
}

/// Writes `value` into `place` at the given natural width and byte order
/// (spec.md §4.2: "Write the fixed-up bytes using endian-correct loads/
/// stores of the exact width, never byte-wise on multi-byte immediates").
pub fn store(place: &mut [u8], width: RelocWidth, value: i64, little_endian: bool) {
    match width {
        RelocWidth::W8 => place[0] = value as u8,
        RelocWidth::W16 => {
            let bytes = if little_endian { (value as u16).to_le_bytes() } else { (value as u16).to_be_bytes() };
            place[..2].copy_from_slice(&bytes);
        }
        RelocWidth::W32 => {
            let bytes = if little_endian { (value as u32).to_le_bytes() } else { (value as u32).to_be_bytes() };
            place[..4].copy_from_slice(&bytes);
        }
        RelocWidth::W64 => {
            let bytes = if little_endian { (value as u64).to_le_bytes() } else { (value as u64).to_be_bytes() };
            place[..8].copy_from_slice(&bytes);
        }
        RelocWidth::Insn | RelocWidth::Uleb128 => {
            unreachable!("instruction/ULEB128 widths are written by apply_instruction_reloc")
        }
    }
}

/// Reads a 32-bit word at `place[..4]` honoring byte order; the shared
/// "load the instruction, mask bits, OR in the immediate, store it back"
/// helper every instruction-encoding target module uses.
pub fn load_u32(place: &[u8], little_endian: bool) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&place[..4]);
    if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    }
}

pub fn store_u32(place: &mut [u8], value: u32, little_endian: bool) {
    let bytes = if little_endian { value.to_le_bytes() } else { value.to_be_bytes() };
    place[..4].copy_from_slice(&bytes);
}

pub fn read_insn32_le(place: &[u8]) -> u32 {
    load_u32(place, true)
}

pub fn read_insn32_be(place: &[u8]) -> u32 {
    load_u32(place, false)
}

pub fn write_insn32_le(place: &mut [u8], insn: u32) {
    store_u32(place, insn, true)
}

pub fn write_insn32_be(place: &mut [u8], insn: u32) {
    store_u32(place, insn, false)
}

/// The single `MachineType -> Box<dyn Target>` factory `Context::target()`
/// calls through (spec.md §9: "Each target is one module implementing the
/// trait; the driver is generic over it").
pub fn target_for(machine: MachineType) -> Box<dyn Target> {
    match machine {
        MachineType::X86_64 => Box::new(x86_64::X86_64Target),
        MachineType::I386 => Box::new(misc::MiscTarget::new(MachineType::I386)),
        MachineType::AArch64 => Box::new(aarch64::AArch64Target::new(true)),
        MachineType::AArch64Be => Box::new(aarch64::AArch64Target::new(false)),
        MachineType::Arm => Box::new(arm::ArmTarget::new(true)),
        MachineType::ArmBe => Box::new(arm::ArmTarget::new(false)),
        MachineType::RiscV32 => Box::new(riscv::RiscVTarget::new(false)),
        MachineType::RiscV64 => Box::new(riscv::RiscVTarget::new(true)),
        MachineType::Ppc => Box::new(misc::MiscTarget::new(MachineType::Ppc)),
        MachineType::Ppc64V1 => Box::new(powerpc64::PowerPc64Target::new(false)),
        MachineType::Ppc64V2 => Box::new(powerpc64::PowerPc64Target::new(true)),
        MachineType::S390x => Box::new(s390x::S390xTarget),
        MachineType::Sparc64 => Box::new(misc::MiscTarget::new(MachineType::Sparc64)),
        MachineType::M68k => Box::new(misc::MiscTarget::new(MachineType::M68k)),
        MachineType::Sh4 => Box::new(sh4::Sh4Target),
        MachineType::LoongArch32 => Box::new(loongarch::LoongArchTarget::new(false)),
        MachineType::LoongArch64 => Box::new(loongarch::LoongArchTarget::new(true)),
    }
}

/// Maps a GNU-ld `-m <emulation>` name to a `MachineType` (spec.md §6:
/// "`-m <emulation>`" is part of the tool's external CLI ABI).
pub fn machine_from_emulation(name: &str) -> Option<MachineType> {
    Some(match name {
        "elf_x86_64" => MachineType::X86_64,
        "elf_i386" => MachineType::I386,
        "aarch64linux" | "aarch64elf" => MachineType::AArch64,
        "aarch64linuxb" | "aarch64elfb" => MachineType::AArch64Be,
        "armelf_linux_eabi" | "armelf" => MachineType::Arm,
        "armelfb_linux_eabi" | "armelfb" => MachineType::ArmBe,
        "elf32lriscv" => MachineType::RiscV32,
        "elf64lriscv" => MachineType::RiscV64,
        "elf32ppclinux" => MachineType::Ppc,
        "elf64ppc" => MachineType::Ppc64V1,
        "elf64lppc" => MachineType::Ppc64V2,
        "elf_s390" => MachineType::S390x,
        "elf64_sparc" => MachineType::Sparc64,
        "m68kelf" => MachineType::M68k,
        "shlelf_linux" | "shelf_linux" => MachineType::Sh4,
        "elf32loongarch" => MachineType::LoongArch32,
        "elf64loongarch" => MachineType::LoongArch64,
        _ => return None,
    })
}

/// Gates C5 (relaxation only applies to RISC-V / LoongArch, spec.md §4.5).
pub fn supports_relaxation(machine: MachineType) -> bool {
    matches!(machine, MachineType::RiscV32 | MachineType::RiscV64 | MachineType::LoongArch32 | MachineType::LoongArch64)
}

/// Gates C6 (range-extension thunks only apply to AArch64/ARM/PPC, spec.md
/// §4.4).
pub fn supports_thunks(machine: MachineType) -> bool {
    matches!(
        machine,
        MachineType::AArch64 | MachineType::AArch64Be | MachineType::Arm | MachineType::ArmBe | MachineType::Ppc64V1 | MachineType::Ppc64V2
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_class_is_always_none() {
        for mode in [OutputMode::Pde, OutputMode::Pie, OutputMode::Dso] {
            assert_eq!(classify_absolute_reloc(mode, SymbolClass::Absolute), AbsRelocAction::None);
        }
    }

    #[test]
    fn pde_imported_data_wants_copyrel() {
        assert_eq!(classify_absolute_reloc(OutputMode::Pde, SymbolClass::ImportedData), AbsRelocAction::Copyrel);
    }

    #[test]
    fn pic_local_absolute_wants_dynamic_reloc() {
        assert_eq!(classify_absolute_reloc(OutputMode::Pie, SymbolClass::Local), AbsRelocAction::Dynamic);
        assert_eq!(classify_absolute_reloc(OutputMode::Dso, SymbolClass::Local), AbsRelocAction::Dynamic);
    }

    #[test]
    fn pcrel_never_permits_dynamic_local_in_pde() {
        assert_eq!(classify_pcrel_reloc(OutputMode::Pde, SymbolClass::Local), AbsRelocAction::None);
    }

    #[test]
    fn tlsdesc_static_output_always_relaxes_to_le() {
        assert_eq!(classify_tlsdesc(true, false, TlsDescConstness::NotConstant), TlsPlan::RelaxToLe);
    }

    #[test]
    fn tlsdesc_without_relax_keeps_full_desc() {
        assert_eq!(classify_tlsdesc(false, false, TlsDescConstness::LinkTimeConstant), TlsPlan::KeepTlsDesc);
    }

    #[test]
    fn tlsdesc_relax_and_startup_constant_wants_ie() {
        assert_eq!(classify_tlsdesc(false, true, TlsDescConstness::StartupTimeConstant), TlsPlan::RelaxToIe);
    }

    #[test]
    fn machine_from_emulation_knows_common_names() {
        assert_eq!(machine_from_emulation("elf_x86_64"), Some(MachineType::X86_64));
        assert_eq!(machine_from_emulation("aarch64linux"), Some(MachineType::AArch64));
        assert_eq!(machine_from_emulation("bogus"), None);
    }

    #[test]
    fn relaxation_and_thunks_are_mutually_exclusive_gates() {
        assert!(supports_relaxation(MachineType::RiscV64));
        assert!(!supports_thunks(MachineType::RiscV64));
        assert!(supports_thunks(MachineType::AArch64));
        assert!(!supports_relaxation(MachineType::AArch64));
    }
}
