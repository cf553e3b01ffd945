//! Integration coverage for symbol resolution across multiple input files,
//! exercising the cross-file provisional/liveness interaction that the
//! colocated unit tests in `src/resolve.rs` don't (those only cover a
//! single phase each).

use cold::context::Context;
use cold::input_file::{GlobalSymbolDef, InputFile, ObjectFile};
use cold::opt::Opt;
use cold::resolve::resolve;
use cold::symbol::Binding;
use cold::target::{MachineType, OutputMode};

fn obj_with_globals(name: &str, priority: u32, globals: &[&str]) -> ObjectFile {
    let mut obj = ObjectFile::new(name.to_string(), priority, vec![], None);
    obj.global_symbols = globals
        .iter()
        .map(|s| GlobalSymbolDef { name: s.to_string(), binding: Binding::Regular, value: 0, section_idx: None, is_ifunc: false })
        .collect();
    obj
}

#[test]
fn lower_priority_file_wins_a_tie() {
    let ctx = Context::new(Opt::default(), MachineType::X86_64, OutputMode::Pde);
    let a = ctx.files.alloc(InputFile::Object(obj_with_globals("a.o", 0, &["f"])));
    let b = ctx.files.alloc(InputFile::Object(obj_with_globals("b.o", 1, &["f"])));
    let files: Vec<&InputFile> = vec![a, b];

    resolve(&ctx, &files, &["f".to_string()]).unwrap();

    let sym = ctx.symbols.get("f").unwrap();
    assert_eq!(sym.file, Some(0));
}

#[test]
fn root_symbol_keeps_its_owning_file_alive() {
    let ctx = Context::new(Opt::default(), MachineType::X86_64, OutputMode::Pde);
    let main_obj = ctx.files.alloc(InputFile::Object(obj_with_globals("main.o", 0, &["main"])));
    let unused_obj = ctx.files.alloc(InputFile::Object(obj_with_globals("unused.o", 1, &["dead_fn"])));
    let files: Vec<&InputFile> = vec![main_obj, unused_obj];

    resolve(&ctx, &files, &["main".to_string()]).unwrap();

    assert!(files[0].is_alive());
}

#[test]
fn resolution_is_idempotent_across_repeated_calls() {
    let ctx = Context::new(Opt::default(), MachineType::X86_64, OutputMode::Pde);
    let a = ctx.files.alloc(InputFile::Object(obj_with_globals("a.o", 0, &["f"])));
    let files: Vec<&InputFile> = vec![a];

    resolve(&ctx, &files, &["f".to_string()]).unwrap();
    let first_owner = ctx.symbols.get("f").unwrap().file;
    resolve(&ctx, &files, &["f".to_string()]).unwrap();
    let second_owner = ctx.symbols.get("f").unwrap().file;

    assert_eq!(first_owner, second_owner);
    assert_eq!(first_owner, Some(0));
    let _ = Binding::Regular;
}
