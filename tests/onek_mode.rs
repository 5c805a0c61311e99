//! 1K-mode hash-family search scenarios, driven against the synthetic
//! DLLs under `tests/fixtures/`.

use std::path::PathBuf;

use crinkler_import_core::collector;
use crinkler_import_core::dll_image::DllCache;
use crinkler_import_core::error::CoreError;
use crinkler_import_core::hash::h1k;
use crinkler_import_core::hunk::{Hunk, HunkList, SymbolFlags};
use crinkler_import_core::resolve_1k_with_cache;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn cache() -> DllCache {
    DllCache::with_search_dirs(vec![fixtures_dir()])
}

#[test]
fn onek_success_on_fixture_dlls() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "kernel32", "ExitProcess"));
    hunks.push_back(Hunk::new_import("h2", "user32", "MessageBoxA"));

    let mut cache = cache();
    let imports = collector::collect_1k(&hunks, &mut cache).expect("collects");
    let result = resolve_1k_with_cache(&imports, &mut cache).expect("search succeeds on a two-DLL toy set");

    assert!((1..=16).contains(&result.hash_bits));

    let import_list = result.hunks.iter().find(|h| h.name == "_ImportList").unwrap();
    let family_sym = import_list.symbols.iter().find(|s| s.name == "_HashFamily").unwrap();
    assert_eq!(family_sym.value, result.family as i64);
    assert!(!family_sym.flags.contains(SymbolFlags::IS_RELOCATEABLE));
    assert_eq!(result.family & 0xFF, 1, "family's low byte is fixed to 0x01");

    for imp in &imports {
        let expected_offset = h1k(&imp.function, result.family, result.hash_bits) as i64 * 4;
        let sym = import_list
            .symbols
            .iter()
            .find(|s| s.name == imp.hunk_name)
            .unwrap_or_else(|| panic!("missing import symbol for {}", imp.hunk_name));
        assert_eq!(sym.value, expected_offset);
        assert!(sym.flags.contains(SymbolFlags::IS_RELOCATEABLE));
    }

    // kernel32 always resolves first among the DLLs the stub scans.
    let dll_names = result.hunks.iter().find(|h| h.name == "_DLLNames").unwrap();
    assert!(dll_names.raw_data.len() >= result.max_dll_name_length);
}

#[test]
fn onek_rejects_missing_kernel32() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "user32", "MessageBoxA"));

    let mut cache = cache();
    let result = collector::collect_1k(&hunks, &mut cache);
    assert!(matches!(result, Err(CoreError::MissingKernel32)));
}

#[test]
fn onek_rejects_forwarded_imports() {
    let mut hunks = HunkList::new();
    hunks.push_back(Hunk::new_import("h1", "kernel32", "HeapAlloc"));

    let mut cache = cache();
    let result = collector::collect_1k(&hunks, &mut cache);
    assert!(matches!(result, Err(CoreError::ForwardNotSupported { .. })));
}
