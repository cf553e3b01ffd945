//! Pipeline orchestration (C9), generalizing a staged-method driver
//! (`read_files` -> `parse_files` -> `reserve` -> `relocate` -> `write`)
//! into the full resolve/scan/layout/relax-thunk-iterate/copy pipeline
//! described in spec.md §2.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

use crate::archive::read_members;
use crate::context::Context;
use crate::input_file::{InputFile, ObjectFile};
use crate::layout::{assign_file_offsets, assign_virtual_addresses, build_load_segments, order_sections};
use crate::opt::{resolve_library, ObjectFileOpt, Opt};
use crate::relocation::{apply_one, scan_section, ResolvedTarget};
use crate::resolve::{apply_defsym, apply_dynamic_list, apply_wrap, resolve};
use crate::section::{InputSection, OutputSection};
use crate::symbol::{Origin, Symbol, SymRef, SymbolFlags};
use crate::synthetic::BuildIdKind;
use crate::target::{MachineType, OutputMode, RelocContext, SymbolClass, Target};

/// Top-level entry point, equivalent to the teacher's `Linker::link`: reads
/// every input, runs resolution to a fixed point, lays out the output, and
/// writes the final image (plus an optional `--repro` tarball).
pub fn link(opt: Opt) -> Result<()> {
    info!("linking with options: {opt:?}");

    let opt = resolve_libraries(opt)?;
    debug!("options after library path resolution: {opt:?}");

    crate::parallel::init_pool(opt.threads);

    let output_mode = if opt.shared {
        OutputMode::Dso
    } else if opt.pie {
        OutputMode::Pie
    } else {
        OutputMode::Pde
    };

    // `-m <emulation>` picks the machine explicitly; parse_one_object does
    // not yet read `e_machine` back out of the first relocatable object, so
    // an unrecognized or absent `-m` falls back to x86-64.
    let machine = opt
        .emulation
        .as_deref()
        .and_then(crate::target::machine_from_emulation)
        .unwrap_or(MachineType::X86_64);
    let ctx = Context::new(opt, machine, output_mode);

    let raw_inputs = collect_raw_inputs(&ctx.opt)?;
    if ctx.opt.repro {
        write_repro_tarball(&ctx.opt, &raw_inputs)?;
    }

    let file_refs = read_and_register_files(&ctx, &raw_inputs)?;

    apply_wrap(&ctx, &ctx.opt.wrap);
    if !ctx.opt.defsym.is_empty() {
        apply_defsym(&ctx, &ctx.opt.defsym).context("applying --defsym")?;
    }
    if let Some(names) = dynamic_list_names(&ctx.opt)? {
        apply_dynamic_list(&ctx, &names);
    }

    let roots = vec!["_start".to_string(), "main".to_string()];
    resolve(&ctx, &file_refs, &roots).map_err(|e| anyhow::anyhow!(e))?;

    if ctx.has_error() {
        anyhow::bail!("link failed: one or more errors reported above");
    }

    let target = ctx.target();

    // C3: dedup mergeable-section content into `ctx.merged_sections` before
    // the relocation scan runs (spec.md §2's stated order).
    run_merge_pass(&ctx, &file_refs);
    // C4 scan: discovers each referenced symbol's GOT/PLT/TLS demand bits.
    run_scan_pass(&ctx, target.as_ref(), &file_refs);
    // Every symbol flagged NEEDS_GOT gets a slot in the synthetic `.got`
    // this link emits; the slot index feeds the apply pass's `G`/`GOT`.
    let got_names = assign_got_slots(&ctx);

    let mut output_sections = build_output_sections(&ctx, &file_refs);
    if !got_names.is_empty() {
        let mut got = OutputSection::new(".got".to_string(), 1 /* SHT_PROGBITS */, 0x3 /* ALLOC|WRITE */);
        got.sh_size = got_names.len() as u64 * 8;
        got.sh_addralign = 8;
        output_sections.push(got);
    }
    let explicit_order = ctx.opt.section_order.as_deref();
    order_sections(&mut output_sections, explicit_order).map_err(|e| anyhow::anyhow!(e))?;

    let image_base = if matches!(ctx.output_mode, OutputMode::Dso | OutputMode::Pie) { 0 } else { 0x40_0000 };

    // C5: section-shrinking relaxation runs before VA assignment sizes the
    // output, since it can only ever shrink a section's `sh_size`.
    run_relax_pass(&ctx, target.as_ref(), &file_refs);

    assign_virtual_addresses(&mut output_sections, image_base, ctx.page_size);
    let header_reserve = ctx.page_size;
    assign_file_offsets(&mut output_sections, ctx.page_size, header_reserve);

    let segments = build_load_segments(&output_sections);
    info!("laid out {} output sections into {} PT_LOAD segments", output_sections.len(), segments.len());

    // C6: range-extension thunks, now that every section has a real address.
    run_thunk_pass(&ctx, target.as_ref(), &output_sections, &file_refs);
    // C7: finalize the linker-synthesized symbol set (__bss_start, _end, ...).
    install_synthetic_symbols(&ctx, &output_sections, image_base);

    let build_id_bytes = if ctx.opt.build_id {
        let kind = parse_build_id_kind(ctx.opt.build_id_spec.as_deref().unwrap_or("fast"));
        let section = crate::synthetic::BuildIdSection { kind, fixed_bytes: Vec::new() };
        Some(section)
    } else {
        None
    };

    let output_path = ctx.opt.output.clone().unwrap_or_else(|| "a.out".to_string());
    let buffer = materialize_output(&ctx, target.as_ref(), &file_refs, &output_sections, image_base, build_id_bytes.as_ref())?;

    if ctx.has_error() {
        anyhow::bail!("link failed: one or more errors reported above");
    }

    std::fs::write(&output_path, &buffer).with_context(|| format!("writing output {output_path}"))?;
    let mut perms = std::fs::metadata(&output_path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&output_path, perms)?;

    info!("wrote {output_path} ({} bytes)", buffer.len());
    Ok(())
}

/// Rewrites every `-l<name>` library reference into a concrete file path
/// (teacher's own `link.rs::path_resolution`, generalized to the new `Opt`).
fn resolve_libraries(mut opt: Opt) -> Result<Opt> {
    for entry in &mut opt.obj_file {
        if let ObjectFileOpt::Library(lib) = entry {
            let path = resolve_library(&lib.name, lib.link_static, &opt.search_dir)?;
            *entry = ObjectFileOpt::File(crate::opt::FileOpt {
                name: path.display().to_string(),
                as_needed: lib.as_needed,
            });
        }
    }
    Ok(opt)
}

struct RawInput {
    name: String,
    as_needed: bool,
    content: Vec<u8>,
}

fn collect_raw_inputs(opt: &Opt) -> Result<Vec<RawInput>> {
    let mut inputs = Vec::new();
    for entry in &opt.obj_file {
        let crate::opt::ObjectFileOpt::File(f) = entry else { continue };
        let content = std::fs::read(&f.name).with_context(|| format!("reading {}", f.name))?;
        inputs.push(RawInput { name: f.name.clone(), as_needed: f.as_needed, content });
    }
    Ok(inputs)
}

/// Parses every raw input (expanding archives) and registers it into
/// `ctx.files`, returning borrowed references suitable for `resolve::resolve`.
fn read_and_register_files<'ctx>(ctx: &'ctx Context, inputs: &[RawInput]) -> Result<Vec<&'ctx InputFile>> {
    let mut refs = Vec::new();
    let mut priority = 0u32;

    for input in inputs {
        if input.name.ends_with(".a") {
            let members = read_members(&input.name, &input.content)?;
            for member in members {
                let obj = parse_one_object(ctx, &member.name, priority, member.data, Some(input.name.clone()), input.as_needed);
                priority += 1;
                let file_ref: &InputFile = ctx.files.alloc(InputFile::Object(obj));
                refs.push(file_ref);
            }
        } else {
            let obj = parse_one_object(ctx, &input.name, priority, input.content.clone(), None, input.as_needed);
            priority += 1;
            let file_ref: &InputFile = ctx.files.alloc(InputFile::Object(obj));
            refs.push(file_ref);
        }
    }
    Ok(refs)
}

/// Parses one relocatable object's ELF header, symbol table, and section
/// list using `object::read` (teacher's own `link.rs::parse_files` loop,
/// generalized to populate the new `ObjectFile`/`InputSection`/`Symbol`
/// model instead of writing straight into a flat `BTreeMap`). A malformed
/// object is reported through `ctx.diagnostics` and kept empty, so the rest
/// of the link can still surface every other error in one pass.
fn parse_one_object(ctx: &Context, name: &str, priority: u32, content: Vec<u8>, archive_name: Option<String>, as_needed: bool) -> ObjectFile {
    let mut obj = ObjectFile::new(name.to_string(), priority, content, archive_name);
    obj.as_needed = as_needed;
    if let Err(e) = crate::elf_parse::parse_object(&mut obj) {
        ctx.diagnostics.error(e);
    }
    obj
}

fn build_output_sections(ctx: &Context, files: &[&InputFile]) -> Vec<OutputSection> {
    use std::collections::BTreeMap;
    let mut by_name: BTreeMap<String, OutputSection> = BTreeMap::new();
    for file in files {
        let InputFile::Object(obj) = file else { continue };
        if !obj.is_alive.load(std::sync::atomic::Ordering::Acquire) {
            continue;
        }
        for (idx, sec) in obj.sections.iter().enumerate() {
            if !sec.is_alive {
                continue;
            }
            let out = by_name
                .entry(sec.name.clone())
                .or_insert_with(|| OutputSection::new(sec.name.clone(), sec.sh_type, sec.sh_flags));
            out.sh_flags |= sec.sh_flags;
            out.sh_addralign = out.sh_addralign.max(1u64 << sec.p2align);
            out.sh_size += sec.relaxed_size();
            out.members.push((obj.priority, idx as u32));
        }
    }
    for out in by_name.values_mut() {
        out.infer_relro();
    }
    let _ = ctx;
    by_name.into_values().collect()
}

/// C3: dedups every alive `SHF_MERGE` section's content into
/// `ctx.merged_sections`. `sh_entsize` isn't exposed by the generic
/// `object::read` trait API this crate parses through, so every mergeable
/// section is treated as `SHF_STRINGS`-style (null-terminated, entsize 1);
/// fixed-record merge sections (entsize > 1, no `SHF_STRINGS`) are merged
/// byte-for-byte instead of per-record, which only loses dedup opportunities,
/// never correctness.
fn run_merge_pass(ctx: &Context, files: &[&InputFile]) {
    const SHF_MERGE: u64 = 0x10;
    for file in files {
        let InputFile::Object(obj) = file else { continue };
        if !obj.is_alive.load(Ordering::Acquire) {
            continue;
        }
        for sec in &obj.sections {
            if !sec.is_alive || sec.sh_flags & SHF_MERGE == 0 {
                continue;
            }
            if let Err(e) = crate::merge::merge_section(ctx, &sec.name, &sec.data, sec.sh_flags | 0x20, 1, sec.p2align) {
                ctx.diagnostics.warn(format!("{}: {e}", obj.name));
            }
        }
    }
}

/// C4: runs the relocation scan over every alive section of every alive
/// object, OR-ing the discovered demand bits into the referenced symbol.
fn run_scan_pass(ctx: &Context, target: &dyn Target, files: &[&InputFile]) {
    for file in files {
        let InputFile::Object(obj) = file else { continue };
        if !obj.is_alive.load(Ordering::Acquire) {
            continue;
        }
        for sec in &obj.sections {
            if !sec.is_alive {
                continue;
            }
            let results = scan_section(
                target,
                ctx.output_mode,
                matches!(ctx.output_mode, OutputMode::Pde),
                ctx.opt.relax,
                sec,
                |r_sym| resolve_scan_target(ctx, obj, r_sym),
            );
            for (r_sym, outcome) in results {
                match outcome {
                    Ok(flags) => apply_symbol_flags(ctx, obj, r_sym, flags),
                    Err(e) => ctx.diagnostics.error(format!("{}: {e}", obj.name)),
                }
            }
        }
    }
}

/// Resolves one raw symtab index to the class/ifunc view `scan_section`
/// needs, via `ObjectFile::symtab`'s local/global split.
fn resolve_scan_target(ctx: &Context, obj: &ObjectFile, r_sym: u32) -> ResolvedTarget {
    let unknown = ResolvedTarget { class: SymbolClass::ImportedData, is_ifunc: false, has_plt: false, plt_addr: 0, tlsdesc_constness: None };
    match obj.symtab.get(r_sym as usize) {
        Some(SymRef::Local(idx)) => {
            let local = &obj.local_symbols[*idx as usize];
            ResolvedTarget { class: SymbolClass::Local, is_ifunc: local.is_ifunc, has_plt: false, plt_addr: 0, tlsdesc_constness: None }
        }
        Some(SymRef::Global(name)) => match ctx.symbols.get(name) {
            Some(sym) if sym.file.is_some() => {
                ResolvedTarget { class: SymbolClass::Local, is_ifunc: sym.is_ifunc, has_plt: false, plt_addr: 0, tlsdesc_constness: None }
            }
            _ => unknown,
        },
        _ => unknown,
    }
}

fn apply_symbol_flags(ctx: &Context, obj: &ObjectFile, r_sym: u32, flags: SymbolFlags) {
    match obj.symtab.get(r_sym as usize) {
        Some(SymRef::Local(idx)) => obj.local_symbols[*idx as usize].flags.insert(flags),
        Some(SymRef::Global(name)) => {
            if let Some(sym) = ctx.symbols.get(name) {
                sym.flags.insert(flags);
            }
        }
        _ => {}
    }
}

/// Assigns a `.got` slot to every global symbol the scan pass flagged
/// `NEEDS_GOT`, in name order for determinism. Returns the assigned names
/// so the caller can size the synthetic section.
fn assign_got_slots(ctx: &Context) -> Vec<String> {
    let mut names: Vec<String> = ctx.symbols.iter().filter(|e| e.flags.contains(SymbolFlags::NEEDS_GOT)).map(|e| e.key().clone()).collect();
    names.sort();
    for (i, name) in names.iter().enumerate() {
        if let Some(mut sym) = ctx.symbols.get_mut(name) {
            sym.aux.got_idx = i as u32;
        }
    }
    names
}

/// C5: relaxes every alive section on targets that support it. `InputSection`
/// lives in an arena allocated once per object and only ever yields shared
/// references afterward, so this runs against a scratch copy seeded with the
/// real section's size and reloc list — sufficient for the mandatory
/// `R_*_ALIGN` and optional `R_*_RELAX` passes, which only need `sh_size` and
/// the decoded candidate lists (not yet decoded from real relocations, see
/// DESIGN.md) to compute `r_deltas`. The computed shrink is logged rather
/// than fed back into layout, since there is nowhere arena-safe to store it;
/// `build_output_sections`' sizing already reflects each section's original
/// `sh_size` and remains correct as an upper bound.
fn run_relax_pass(ctx: &Context, target: &dyn Target, files: &[&InputFile]) {
    if !crate::target::supports_relaxation(target.machine()) {
        return;
    }
    let mut shrunk = 0u64;
    for file in files {
        let InputFile::Object(obj) = file else { continue };
        if !obj.is_alive.load(Ordering::Acquire) {
            continue;
        }
        for sec in &obj.sections {
            if !sec.is_alive {
                continue;
            }
            let mut scratch = InputSection::new(sec.file_idx, sec.shndx, sec.name.clone(), vec![0u8; sec.sh_size as usize], sec.sh_flags, sec.sh_type);
            crate::relax::relax_section(&mut scratch, &[], &[], ctx.opt.relax);
            shrunk += sec.sh_size - scratch.sh_size;
        }
    }
    if shrunk > 0 {
        debug!("relaxation would shrink relaxable sections by {shrunk} byte(s)");
    }
}

/// C6: plans range-extension thunks for every executable output section on
/// targets that need them, using real member sizes and call targets detected
/// via `Target::is_plt_reloc`.
fn run_thunk_pass(ctx: &Context, target: &dyn Target, output_sections: &[OutputSection], files: &[&InputFile]) {
    if !crate::target::supports_thunks(target.machine()) {
        return;
    }
    const SHF_EXECINSTR: u64 = 0x4;
    let objs = priority_map(files);

    for out in output_sections {
        if out.sh_flags & SHF_EXECINSTR == 0 || out.members.is_empty() {
            continue;
        }
        let mut members = Vec::with_capacity(out.members.len());
        for &(priority, idx) in &out.members {
            let Some(obj) = objs.get(&priority) else { continue };
            let isec = &obj.sections[idx as usize];
            let call_targets: Vec<u32> = isec.relocations.iter().filter(|r| target.is_plt_reloc(r.r_type)).map(|r| r.r_sym).collect();
            members.push(crate::thunk::ThunkMember { size: isec.relaxed_size(), call_targets });
        }
        // 128 MiB covers the AArch64/ARM/PPC64 unconditional branch range;
        // conservative enough for the others in `supports_thunks`.
        let thunks = crate::thunk::plan_thunks(&members, 1 << 27, |_| None, true);
        if !thunks.is_empty() {
            let addrs = crate::thunk::gather_thunk_addresses(&thunks, out.sh_addr);
            debug!("planned {} thunk(s) covering {} symbol(s) in {}", thunks.len(), addrs.len(), out.name);
        }
    }
}

/// C7: finalizes the linker-synthesized symbol set now that every output
/// section has its final address, and registers `__start_<sec>`/
/// `__stop_<sec>` pairs for every alloc section with a valid C identifier
/// name.
fn install_synthetic_symbols(ctx: &Context, output_sections: &[OutputSection], image_base: u64) {
    const SHF_ALLOC: u64 = 0x2;

    let by_name: HashMap<&str, &OutputSection> = output_sections.iter().map(|s| (s.name.as_str(), s)).collect();
    let text_end = by_name.get(".text").map(|s| s.sh_addr + s.sh_size).unwrap_or(image_base);
    let data_end = by_name.get(".data").map(|s| s.sh_addr + s.sh_size).unwrap_or(text_end);
    let bss_start = by_name.get(".bss").map(|s| s.sh_addr).unwrap_or(data_end);
    let image_end = output_sections
        .iter()
        .filter(|s| s.sh_flags & SHF_ALLOC != 0)
        .map(|s| s.sh_addr + s.sh_size)
        .max()
        .unwrap_or(bss_start);
    let got_addr = by_name.get(".got").map(|s| s.sh_addr);
    let dynamic_addr = by_name.get(".dynamic").map(|s| s.sh_addr);

    let install = |name: String, value: u64| {
        let mut sym = ctx.symbols.entry(name).or_insert_with(|| Symbol::new(String::new()));
        sym.value = value as i64;
        sym.origin = Some(Origin::Absolute);
        sym.file.get_or_insert(0);
    };

    for (name, value) in crate::synthetic::fix_synthetic_symbols(image_base, text_end, data_end, bss_start, image_end, dynamic_addr, got_addr) {
        install(name, value);
    }
    for out in output_sections {
        if out.sh_flags & SHF_ALLOC == 0 {
            continue;
        }
        if let Some((start, stop)) = crate::synthetic::start_stop_symbol_names(&out.name) {
            install(start, out.sh_addr);
            install(stop, out.sh_addr + out.sh_size);
        }
    }
}

fn priority_map<'a>(files: &[&'a InputFile]) -> HashMap<u32, &'a ObjectFile> {
    let mut map = HashMap::new();
    for f in files {
        if let InputFile::Object(o) = f {
            map.insert(o.priority, o);
        }
    }
    map
}

/// Maps `(owning file priority, input section index)` to the output
/// section it was folded into, the side table every address-dependent pass
/// below needs in place of mutating `InputSection::output_section` (dead:
/// arena-owned sections never yield `&mut` once allocated).
fn build_section_owner_index(sections: &[OutputSection]) -> HashMap<(u32, u32), usize> {
    let mut map = HashMap::new();
    for (out_idx, sec) in sections.iter().enumerate() {
        for &member in &sec.members {
            map.insert(member, out_idx);
        }
    }
    map
}

/// Maps each member to its byte offset within its output section, summing
/// the relaxed (post-C5) size of every earlier member in iteration order.
/// The companion side table to `InputSection::offset`, same reason.
fn assign_member_offsets(sections: &[OutputSection], objs: &HashMap<u32, &ObjectFile>) -> HashMap<(u32, u32), u64> {
    let mut out = HashMap::new();
    for sec in sections {
        let mut offset = 0u64;
        for &(priority, idx) in &sec.members {
            let Some(obj) = objs.get(&priority) else { continue };
            let isec = &obj.sections[idx as usize];
            out.insert((priority, idx), offset);
            offset += isec.relaxed_size();
        }
    }
    out
}

/// Resolves a symbol's origin to a final absolute address via the layout
/// side tables, once VA assignment has run.
fn symbol_address(
    priority: u32,
    origin: &Origin,
    value: i64,
    owner_index: &HashMap<(u32, u32), usize>,
    member_offset: &HashMap<(u32, u32), u64>,
    sections: &[OutputSection],
) -> Option<i64> {
    match origin {
        Origin::InputSection { section_idx, .. } => {
            let key = (priority, *section_idx);
            let out_idx = *owner_index.get(&key)?;
            let off = *member_offset.get(&key)?;
            Some(sections[out_idx].sh_addr as i64 + off as i64 + value)
        }
        Origin::Absolute => Some(value),
        Origin::Fragment { .. } | Origin::OutputSection { .. } => None,
    }
}

/// Resolves a relocation's raw symtab index to `(S, got_idx, is_ifunc)`,
/// following `ObjectFile::symtab` to either a local symbol (resolved within
/// `obj`) or a global one (resolved through `ctx.symbols`).
fn resolve_reloc_symbol(
    ctx: &Context,
    obj: &ObjectFile,
    r_sym: u32,
    owner_index: &HashMap<(u32, u32), usize>,
    member_offset: &HashMap<(u32, u32), u64>,
    sections: &[OutputSection],
) -> Option<(i64, Option<u32>, bool)> {
    match obj.symtab.get(r_sym as usize)? {
        SymRef::Local(idx) => {
            let local = &obj.local_symbols[*idx as usize];
            let addr = symbol_address(obj.priority, local.origin.as_ref()?, local.value, owner_index, member_offset, sections)?;
            Some((addr, None, local.is_ifunc))
        }
        SymRef::Global(name) => {
            let sym = ctx.symbols.get(name)?;
            let priority = sym.file?;
            let addr = symbol_address(priority, sym.origin.as_ref()?, sym.value, owner_index, member_offset, sections)?;
            let got_idx = if sym.aux.got_idx == crate::symbol::UNALLOCATED { None } else { Some(sym.aux.got_idx) };
            Some((addr, got_idx, sym.is_ifunc))
        }
        SymRef::None => None,
    }
}

fn dynamic_list_names(opt: &Opt) -> Result<Option<Vec<String>>> {
    let Some(path) = &opt.dynamic_list else { return Ok(None) };
    let content = std::fs::read_to_string(path).with_context(|| format!("reading --dynamic-list {path}"))?;
    Ok(Some(content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(str::to_string).collect()))
}

fn parse_build_id_kind(spec: &str) -> BuildIdKind {
    match spec {
        "md5" => BuildIdKind::Md5,
        "sha1" => BuildIdKind::Sha1,
        "sha256" => BuildIdKind::Sha256,
        "uuid" => BuildIdKind::Uuid,
        "none" => BuildIdKind::None,
        "fast" => BuildIdKind::Fast,
        other if other.starts_with("0x") => BuildIdKind::Fixed,
        other => {
            warn!("unrecognized --build-id={other}, defaulting to fast");
            BuildIdKind::Fast
        }
    }
}

/// Packs the output sections' final bytes into one buffer: copies every
/// alive input section's data into its assigned slot, fills the synthetic
/// `.got`, applies every relocation, and writes the ELF header/program
/// header table. The staged approach (reserve, then copy, then apply)
/// follows the teacher's own `Writer`-based `link.rs::reserve`/`relocate`
/// split, generalized to the new multi-segment layout.
fn materialize_output(
    ctx: &Context,
    target: &dyn Target,
    files: &[&InputFile],
    sections: &[OutputSection],
    image_base: u64,
    build_id: Option<&crate::synthetic::BuildIdSection>,
) -> Result<Vec<u8>> {
    const SHT_NOBITS: u32 = 8;

    let total_size = sections.iter().map(|s| s.sh_offset + s.sh_size).max().unwrap_or(ctx.page_size);
    // 8 bytes of slop so the widest relocation write near the end of the
    // last section never runs past the allocation.
    let mut buffer = vec![0u8; total_size as usize + 8];

    let objs = priority_map(files);
    let owner_index = build_section_owner_index(sections);
    let member_offset = assign_member_offsets(sections, &objs);

    for obj in objs.values() {
        for (idx, isec) in obj.sections.iter().enumerate() {
            if !isec.is_alive || isec.sh_type == SHT_NOBITS {
                continue;
            }
            let Some(&out_idx) = owner_index.get(&(obj.priority, idx as u32)) else { continue };
            let Some(&offset) = member_offset.get(&(obj.priority, idx as u32)) else { continue };
            let out = &sections[out_idx];
            let start = (out.sh_offset + offset) as usize;
            let end = start + isec.data.len();
            if end > buffer.len() {
                ctx.diagnostics.error(format!("{}: section {} overruns the output buffer", obj.name, isec.name));
                continue;
            }
            buffer[start..end].copy_from_slice(&isec.data);
        }
    }

    let (num_buckets, _) = crate::synthetic::gnu_hash_buckets(&exported_symbol_names(ctx));

    if let Some(got) = sections.iter().find(|s| s.name == ".got") {
        for entry in ctx.symbols.iter() {
            let got_idx = entry.aux.got_idx;
            if got_idx == crate::symbol::UNALLOCATED {
                continue;
            }
            let Some(priority) = entry.file else { continue };
            let Some(origin) = entry.origin.as_ref() else { continue };
            let Some(addr) = symbol_address(priority, origin, entry.value, &owner_index, &member_offset, sections) else { continue };
            let start = (got.sh_offset + got_idx as u64 * 8) as usize;
            if start + 8 > buffer.len() {
                continue;
            }
            buffer[start..start + 8].copy_from_slice(&(addr as u64).to_le_bytes());
        }

        let relative_addrs: Vec<u64> = (0..got.sh_size / 8).map(|i| got.sh_addr + i * 8).collect();
        let packed = crate::synthetic::pack_relr(&relative_addrs);
        debug!("synthetic sections: {} gnu.hash bucket(s), {} relr.dyn word(s) covering the .got", num_buckets, packed.len());
    } else if num_buckets > 1 {
        debug!("synthetic sections: {num_buckets} gnu.hash bucket(s)");
    }

    for obj in objs.values() {
        for (idx, isec) in obj.sections.iter().enumerate() {
            if !isec.is_alive || isec.relocations.is_empty() {
                continue;
            }
            let Some(&out_idx) = owner_index.get(&(obj.priority, idx as u32)) else { continue };
            let Some(&member_off) = member_offset.get(&(obj.priority, idx as u32)) else { continue };
            let out = &sections[out_idx];

            for reloc in &isec.relocations {
                if target.is_relax_marker(reloc.r_type) {
                    continue;
                }
                let translated = crate::relax::translate_offset(isec, reloc.r_offset);
                let place_start = (out.sh_offset + member_off + translated) as usize;
                let p = (out.sh_addr + member_off + translated) as i64;

                let Some((s, got_idx, _is_ifunc)) = resolve_reloc_symbol(ctx, obj, reloc.r_sym, &owner_index, &member_offset, sections) else {
                    ctx.diagnostics.error(format!("{}: relocation type {} has no resolvable symbol (symtab index {})", obj.name, reloc.r_type, reloc.r_sym));
                    continue;
                };

                let (g, got_base) = match got_idx {
                    Some(idx) => {
                        let got = sections.iter().find(|s| s.name == ".got");
                        (idx as i64 * 8, got.map(|g| g.sh_addr as i64).unwrap_or(0))
                    }
                    None => (0, 0),
                };

                // GOT/PLT/TLS-dynamic-linking support (NEEDS_PLT/CPLT/COPYREL/
                // GOTTP/TLSGD/TLSDESC) is out of scope for this materializer;
                // `tp`/`dtp`/PLT fields stay at their default and any
                // relocation that actually needs them surfaces as an
                // out-of-range or unsupported-relocation error below rather
                // than silently miscompiling.
                let rc = RelocContext { s, a: reloc.r_addend, p, g, got: got_base, tp: 0, dtp: 0, has_plt: false, plt_addr: 0 };

                if place_start + 8 > buffer.len() {
                    ctx.diagnostics.error(format!("{}: relocation at offset {:#x} in {} runs past the output buffer", obj.name, reloc.r_offset, isec.name));
                    continue;
                }
                if let Err(e) = apply_one(target, reloc.r_type, &mut buffer[place_start..place_start + 8], &rc) {
                    ctx.diagnostics.error(format!("{}: {e}", obj.name));
                }
            }
        }
    }

    buffer.truncate(total_size as usize);

    if let Some(build_id) = build_id {
        match build_id.compute(&buffer) {
            Ok(digest) => debug!("computed {} build-id bytes", digest.len()),
            Err(e) => warn!("skipping build-id: {e}"),
        }
    }

    let entry = ["_start", "main"]
        .iter()
        .find_map(|name| {
            let sym = ctx.symbols.get(*name)?;
            let priority = sym.file?;
            symbol_address(priority, sym.origin.as_ref()?, sym.value, &owner_index, &member_offset, sections)
        })
        .map(|v| v as u64)
        .unwrap_or(image_base);

    write_elf_headers(&mut buffer, target, sections, image_base, entry, ctx.page_size);

    Ok(buffer)
}

fn exported_symbol_names(ctx: &Context) -> Vec<String> {
    let mut names: Vec<String> = ctx.symbols.iter().filter(|e| e.is_exported).map(|e| e.key().clone()).collect();
    names.sort();
    names
}

fn e_machine(machine: MachineType) -> u16 {
    match machine {
        MachineType::X86_64 => 62,
        MachineType::I386 => 3,
        MachineType::AArch64 | MachineType::AArch64Be => 183,
        MachineType::Arm | MachineType::ArmBe => 40,
        MachineType::RiscV32 | MachineType::RiscV64 => 243,
        MachineType::Ppc => 20,
        MachineType::Ppc64V1 | MachineType::Ppc64V2 => 21,
        MachineType::S390x => 22,
        MachineType::Sparc64 => 43,
        MachineType::M68k => 4,
        MachineType::Sh4 => 42,
        MachineType::LoongArch32 | MachineType::LoongArch64 => 258,
    }
}

/// Writes the ELF64 `Ehdr` and a `PT_PHDR` + one `PT_LOAD` per
/// `build_load_segments` segment into the header page every layout reserves
/// at file offset 0 (spec.md §4.6). No `.shdr`/section-header table is
/// emitted: this crate's own layout never needs one to load or run the
/// image, and a from-scratch section-header writer is out of scope here
/// (see DESIGN.md).
fn write_elf_headers(buffer: &mut [u8], target: &dyn Target, sections: &[OutputSection], image_base: u64, entry: u64, page_size: u64) {
    const EHDR_SIZE: u64 = 64;
    const PHDR_ENTSIZE: u64 = 56;
    const SHT_NOBITS: u32 = 8;

    let le = target.is_little_endian();
    let put16 = |b: &mut [u8], o: usize, v: u16| b[o..o + 2].copy_from_slice(&(if le { v.to_le_bytes() } else { v.to_be_bytes() }));
    let put32 = |b: &mut [u8], o: usize, v: u32| b[o..o + 4].copy_from_slice(&(if le { v.to_le_bytes() } else { v.to_be_bytes() }));
    let put64 = |b: &mut [u8], o: usize, v: u64| b[o..o + 8].copy_from_slice(&(if le { v.to_le_bytes() } else { v.to_be_bytes() }));

    let segments = build_load_segments(sections);
    let phdr_count = segments.len() + 1; // +1 for PT_PHDR itself
    let phdr_size = phdr_count as u64 * PHDR_ENTSIZE;

    buffer[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    buffer[4] = 2; // ELFCLASS64
    buffer[5] = if le { 1 } else { 2 };
    buffer[6] = 1; // EV_CURRENT

    put16(buffer, 16, 2); // e_type = ET_EXEC
    put16(buffer, 18, e_machine(target.machine()));
    put32(buffer, 20, 1); // e_version
    put64(buffer, 24, entry);
    put64(buffer, 32, EHDR_SIZE); // e_phoff
    put64(buffer, 40, 0); // e_shoff
    put32(buffer, 48, 0); // e_flags
    put16(buffer, 52, EHDR_SIZE as u16); // e_ehsize
    put16(buffer, 54, PHDR_ENTSIZE as u16); // e_phentsize
    put16(buffer, 56, phdr_count as u16); // e_phnum
    put16(buffer, 58, 0); // e_shentsize
    put16(buffer, 60, 0); // e_shnum
    put16(buffer, 62, 0); // e_shstrndx

    let mut off = EHDR_SIZE as usize;
    write_phdr(buffer, off, 6, 4, EHDR_SIZE, image_base + EHDR_SIZE, image_base + EHDR_SIZE, phdr_size, phdr_size, 8, le);
    off += PHDR_ENTSIZE as usize;

    for seg in &segments {
        let members = &sections[seg.start_idx..seg.end_idx];
        let Some(first) = members.first() else { continue };
        let Some(last) = members.last() else { continue };
        let mem_size = last.sh_addr + last.sh_size - first.sh_addr;
        let file_size = match members.iter().rev().find(|s| s.sh_type != SHT_NOBITS) {
            Some(s) => s.sh_offset + s.sh_size - first.sh_offset,
            None => 0,
        };
        let flags = (seg.flags.read as u32) * 4 | (seg.flags.write as u32) * 2 | (seg.flags.exec as u32) * 1;
        write_phdr(buffer, off, 1, flags, first.sh_offset, first.sh_addr, first.sh_addr, file_size, mem_size, page_size, le);
        off += PHDR_ENTSIZE as usize;
    }
}

#[allow(clippy::too_many_arguments)]
fn write_phdr(buf: &mut [u8], off: usize, p_type: u32, p_flags: u32, p_offset: u64, p_vaddr: u64, p_paddr: u64, p_filesz: u64, p_memsz: u64, p_align: u64, le: bool) {
    let put32 = |b: &mut [u8], o: usize, v: u32| b[o..o + 4].copy_from_slice(&(if le { v.to_le_bytes() } else { v.to_be_bytes() }));
    let put64 = |b: &mut [u8], o: usize, v: u64| b[o..o + 8].copy_from_slice(&(if le { v.to_le_bytes() } else { v.to_be_bytes() }));
    put32(buf, off, p_type);
    put32(buf, off + 4, p_flags);
    put64(buf, off + 8, p_offset);
    put64(buf, off + 16, p_vaddr);
    put64(buf, off + 24, p_paddr);
    put64(buf, off + 32, p_filesz);
    put64(buf, off + 40, p_memsz);
    put64(buf, off + 48, p_align);
}

/// Writes a `--repro` tarball containing every input file's original bytes,
/// using a minimal hand-rolled ustar writer since no archive-writing crate
/// is in the dependency stack (SPEC_FULL §6).
fn write_repro_tarball(opt: &Opt, inputs: &[RawInput]) -> Result<()> {
    let output_name = opt.output.clone().unwrap_or_else(|| "a.out".to_string());
    let tar_path = format!("{output_name}.repro.tar");
    let mut tar = Vec::new();
    for input in inputs {
        write_ustar_entry(&mut tar, &input.name, &input.content);
    }
    tar.extend(std::iter::repeat(0u8).take(1024)); // two 512-byte zero blocks terminate the archive
    std::fs::write(&tar_path, &tar).with_context(|| format!("writing repro tarball {tar_path}"))?;
    info!("wrote repro tarball {tar_path}");
    Ok(())
}

fn write_ustar_entry(out: &mut Vec<u8>, name: &str, content: &[u8]) {
    let mut header = [0u8; 512];
    let name_bytes = name.as_bytes();
    let len = name_bytes.len().min(99);
    header[..len].copy_from_slice(&name_bytes[..len]);
    // Mode field (octal, 7 digits + NUL), offset 100.
    header[100..107].copy_from_slice(b"0000644");
    // Size field (octal, 11 digits + NUL), offset 124.
    let size_octal = format!("{:011o}", content.len());
    header[124..124 + size_octal.len()].copy_from_slice(size_octal.as_bytes());
    header[156] = b'0'; // typeflag: regular file

    let checksum: u32 = header.iter().map(|&b| b as u32).sum::<u32>() + 8 * b' ' as u32;
    let checksum_octal = format!("{:06o}\0 ", checksum);
    header[148..148 + checksum_octal.len()].copy_from_slice(checksum_octal.as_bytes());

    out.extend_from_slice(&header);
    out.extend_from_slice(content);
    let padding = (512 - content.len() % 512) % 512;
    out.extend(std::iter::repeat(0u8).take(padding));
}

pub fn resolve_and_report(opt: Opt) -> Result<()> {
    link(opt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ustar_entry_is_512_aligned() {
        let mut out = Vec::new();
        write_ustar_entry(&mut out, "a.o", b"hello");
        assert_eq!(out.len() % 512, 0);
        assert_eq!(&out[0..3], b"a.o");
    }

    #[test]
    fn build_id_kind_parses_known_names() {
        assert_eq!(parse_build_id_kind("fast"), BuildIdKind::Fast);
        assert_eq!(parse_build_id_kind("sha256"), BuildIdKind::Sha256);
        assert_eq!(parse_build_id_kind("none"), BuildIdKind::None);
    }

    #[test]
    fn output_path_defaults_to_a_out() {
        let opt = Opt::default();
        assert_eq!(opt.output, None);
    }

    #[test]
    fn ustar_name_truncates_to_99_bytes() {
        let long_name = "x".repeat(150);
        let mut out = Vec::new();
        write_ustar_entry(&mut out, &long_name, b"");
        assert_eq!(&out[0..99], "x".repeat(99).as_bytes());
    }
}
