//! Bootstrap behavior over real archive layouts.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use shopfloor_boot::{BootState, Bootstrap, StartupError};
use zip::write::SimpleFileOptions;

fn build_archive(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    for (entry, bytes) in entries {
        writer.start_file(*entry, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// Builds a real entry module from C source, or `None` when the host has no
/// C compiler.
fn compile_entry_module(dir: &Path, source: &str) -> Option<PathBuf> {
    let src = dir.join("entry.c");
    let out = dir.join("entry_module.bin");
    std::fs::write(&src, source).unwrap();
    let status = std::process::Command::new("cc")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-o")
        .arg(&out)
        .arg(&src)
        .status();
    match status {
        Ok(s) if s.success() => Some(out),
        _ => None,
    }
}

#[test]
fn delegated_exit_code_propagates_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    // returns 7 only when argv carries the entry name plus one argument
    let source = "int shopfloor_service_main(int argc, const char* const* argv) {\n\
                  (void)argv;\n\
                  return argc == 2 ? 7 : 99;\n\
                  }\n";
    let Some(module) = compile_entry_module(dir.path(), source) else {
        eprintln!("no C compiler on this host, skipping");
        return;
    };
    let bytes = std::fs::read(&module).unwrap();
    let core = build_archive(dir.path(), "core.zip", &[("svc/main.so", bytes.as_slice())]);

    let mut boot = Bootstrap::new(vec![core], "svc.main", vec!["alpha".into()]);
    let scratch = dir.path().join("scratch");
    assert_eq!(boot.execute(&scratch).unwrap(), 7);
    assert_eq!(*boot.state(), BootState::Exited(7));
}

#[test]
fn missing_archive_fails_before_any_loader_is_built() {
    let dir = tempfile::tempdir().unwrap();
    let core = build_archive(dir.path(), "core.zip", &[("svc/main.so", b"core")]);
    let gone = dir.path().join("gone.zip");

    let mut boot = Bootstrap::new(vec![core, gone.clone()], "svc.main", Vec::new());
    let err = boot.load_archives().unwrap_err();
    match &err {
        StartupError::MissingArchive { path } => assert_eq!(path, &gone),
        other => panic!("expected MissingArchive, got {}", other),
    }
    assert_eq!(err.exit_code(), 121);
    assert!(matches!(boot.state(), BootState::StartupFailed(_)));
    // the delegated entry is never loaded
    assert!(boot.chain().is_none());
}

#[test]
fn later_archives_override_earlier_ones() {
    let dir = tempfile::tempdir().unwrap();
    let core = build_archive(dir.path(), "core.zip", &[("svc/main.so", b"from-core")]);
    let service = build_archive(dir.path(), "service.zip", &[("svc/main.so", b"from-service")]);

    let mut boot = Bootstrap::new(vec![core, service], "svc.main", Vec::new());
    boot.load_archives().unwrap();
    boot.load_entry().unwrap();
    assert_eq!(*boot.state(), BootState::EntryLoaded);

    let chain = boot.chain().unwrap();
    assert_eq!(chain.depth(), 2);
    assert_eq!(chain.load_unit("svc.main").unwrap().bytes(), b"from-service");
}

#[test]
fn unresolved_entry_reports_chain_depth() {
    let dir = tempfile::tempdir().unwrap();
    let core = build_archive(dir.path(), "core.zip", &[("svc/other.so", b"x")]);
    let service = build_archive(dir.path(), "service.zip", &[("svc/extra.so", b"y")]);

    let mut boot = Bootstrap::new(vec![core, service], "svc.main", Vec::new());
    boot.load_archives().unwrap();
    let err = boot.load_entry().unwrap_err();
    match &err {
        StartupError::EntryUnresolved { name, depth } => {
            assert_eq!(name, "svc.main");
            assert_eq!(*depth, 2);
        }
        other => panic!("expected EntryUnresolved, got {}", other),
    }
    assert_eq!(err.exit_code(), 122);
    assert!(matches!(boot.state(), BootState::StartupFailed(_)));
}

#[test]
fn sidecar_index_takes_precedence_over_rescan() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(
        dir.path(),
        "core.zip",
        &[("svc/main.so", b"main"), ("svc/hidden.so", b"hidden")],
    );
    // the prebuilt index only declares svc.main, with a relative location
    let mut builder = shopfloor_core::index::ArchiveIndexBuilder::new();
    builder.add_unit("svc.main", "core.zip");
    builder.finish().write_file(&dir.path().join("core.idx")).unwrap();

    let mut boot = Bootstrap::new(vec![dir.path().join("core.zip")], "svc.main", Vec::new());
    boot.load_archives().unwrap();
    let chain = boot.chain().unwrap();
    assert_eq!(chain.load_unit("svc.main").unwrap().bytes(), b"main");
    // svc.hidden is in the archive but not in the shipped index
    assert!(chain.load_unit("svc.hidden").is_err());
}

#[test]
fn invoking_a_non_module_entry_fails_in_the_startup_range() {
    let dir = tempfile::tempdir().unwrap();
    let core = build_archive(dir.path(), "core.zip", &[("svc/main.so", b"not a real module")]);

    let mut boot = Bootstrap::new(vec![core], "svc.main", Vec::new());
    boot.load_archives().unwrap();
    boot.load_entry().unwrap();

    let scratch = dir.path().join("scratch");
    let err = boot.run(&scratch).unwrap_err();
    assert!(matches!(err, StartupError::EntryInvocation { .. }));
    assert_eq!(err.exit_code(), 123);
    assert!(matches!(boot.state(), BootState::StartupFailed(_)));
}

#[test]
fn descriptor_file_drives_the_classpath() {
    let dir = tempfile::tempdir().unwrap();
    build_archive(dir.path(), "core.zip", &[("svc/main.so", b"main")]);
    let descriptor = dir.path().join("classpath");
    std::fs::write(&descriptor, "# layout\ncore.zip\n").unwrap();

    let mut boot = Bootstrap::from_descriptor(&descriptor, "svc.main", Vec::new()).unwrap();
    boot.load_archives().unwrap();
    boot.load_entry().unwrap();
    assert_eq!(*boot.state(), BootState::EntryLoaded);
}
