//! Standard-mode import-list emission scenarios, driven against the
//! synthetic DLLs under `tests/fixtures/` rather than real system DLLs.

use std::path::PathBuf;

use crinkler_import_core::dll_image::DllCache;
use crinkler_import_core::hunk::{Hunk, HunkList, SymbolFlags};
use crinkler_import_core::resolve_standard_with_cache;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn cache() -> DllCache {
    DllCache::with_search_dirs(vec![fixtures_dir()])
}

#[test]
fn minimal_standard_two_imports() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "kernel32", "ExitProcess"));
    hunks.push_back(Hunk::new_import("h2", "user32", "MessageBoxA"));

    let result = resolve_standard_with_cache(&hunks, &[], &mut cache()).expect("resolves");
    assert!(!result.enable_range_import);

    let import_list = result.hunks.iter().find(|h| h.name == "_ImportList").unwrap();
    let h1 = import_list.symbols.iter().find(|s| s.name == "h1").unwrap();
    let h2 = import_list.symbols.iter().find(|s| s.name == "h2").unwrap();
    assert_eq!(h1.value, 0);
    assert_eq!(h2.value, 4);
    assert!(h1.flags.contains(SymbolFlags::IS_RELOCATEABLE));

    let dll_names = result.hunks.iter().find(|h| h.name == "_DLLNames").unwrap();
    assert_eq!(dll_names.raw_data, b"user32\0\x01\xFF");

    assert_eq!(result.hash_hunk.raw_data.len(), 8);
    let hashes: Vec<u32> = result
        .hash_hunk
        .raw_data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(hashes, vec![crinkler_import_core::hash::h32("ExitProcess"), crinkler_import_core::hash::h32("MessageBoxA")]);
}

#[test]
fn range_import_absorbs_contiguous_ordinals() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("g100", "opengl32", "glFunc100"));
    hunks.push_back(Hunk::new_import("g101", "opengl32", "glFunc101"));
    hunks.push_back(Hunk::new_import("g103", "opengl32", "glFunc103"));

    let range_dlls = vec!["opengl32".to_string()];
    let result = resolve_standard_with_cache(&hunks, &range_dlls, &mut cache()).expect("resolves");
    assert!(result.enable_range_import);

    let import_list = result.hunks.iter().find(|h| h.name == "_ImportList").unwrap();
    let offset = |name: &str| import_list.symbols.iter().find(|s| s.name == name).unwrap().value;
    assert_eq!(offset("g100"), 0);
    assert_eq!(offset("g101"), 4);
    assert_eq!(offset("g103"), 12);

    let dll_names = result.hunks.iter().find(|h| h.name == "_DLLNames").unwrap();
    // "opengl32\0" + one hash-counter byte (one group) + one range-span byte (4) + sentinel.
    assert_eq!(dll_names.raw_data, b"opengl32\x00\x01\x04\xFF");
}

#[test]
fn forward_is_chased_and_replaces_the_import() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "kernel32", "HeapAlloc"));

    let result = resolve_standard_with_cache(&hunks, &[], &mut cache()).expect("resolves");
    assert_eq!(result.warnings.len(), 1);
    match &result.warnings[0] {
        crinkler_import_core::collector::Warning::ForwardedImportReplaced { resolved_dll, resolved_function, .. } => {
            assert_eq!(resolved_dll, "ntdll");
            assert_eq!(resolved_function, "RtlAllocateHeap");
        }
        other => panic!("expected a forward warning, got {other:?}"),
    }

    let import_list = result.hunks.iter().find(|h| h.name == "_ImportList").unwrap();
    assert!(import_list.symbols.iter().any(|s| s.name == "h1"));
}

#[test]
fn unused_range_dll_is_reported() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "kernel32", "ExitProcess"));

    let range_dlls = vec!["opengl32".to_string()];
    let result = resolve_standard_with_cache(&hunks, &range_dlls, &mut cache()).expect("resolves");
    assert!(!result.enable_range_import);
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, crinkler_import_core::collector::Warning::UnusedRangeDll { dll } if dll == "opengl32")));
}
