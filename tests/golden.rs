//! Golden-file regression test: parses each synthetic fixture DLL under
//! `tests/fixtures/` (built by `make_fixtures.py`) and checks the export
//! tables `DllImage::parse` recovers against what the generator encoded,
//! the same "parse real files, check known-good properties" shape as the
//! teacher crate's own `pe-parser.rs` gauntlet.

use std::path::Path;

use datatest_stable::Result;

use crinkler_import_core::dll_image::DllImage;

fn exports_match_fixture(path: &Path) -> Result<()> {
    let binary = std::fs::read(path)?;
    let image = DllImage::parse(&binary)?;

    match path.file_name().and_then(|n| n.to_str()) {
        Some("kernel32") => {
            assert_eq!(image.ordinal_of("ExitProcess"), Some(1));
            assert_eq!(image.ordinal_of("HeapAlloc"), Some(2));
            assert_eq!(image.ordinal_of("GetProcAddress"), Some(3));
            assert_eq!(image.ordinal_of("VirtualAlloc"), Some(4));
            assert_eq!(image.ordinal_of("NoSuchExport"), None);

            let rva = image.rva_of(2).expect("HeapAlloc has a function RVA");
            assert!(image.is_forwarded_rva(rva), "HeapAlloc is encoded as a forward to ntdll");
            let forwarder = image.read_forwarder_string(&binary, rva).expect("forwarder string reads back");
            assert_eq!(forwarder, "ntdll.RtlAllocateHeap");

            let exit_rva = image.rva_of(1).expect("ExitProcess has a function RVA");
            assert!(!image.is_forwarded_rva(exit_rva), "ExitProcess is real code, not a forward");
        }
        Some("ntdll.dll") => {
            assert_eq!(image.ordinal_of("RtlAllocateHeap"), Some(1));
        }
        Some("user32") => {
            assert_eq!(image.ordinal_of("MessageBoxA"), Some(1));
            assert_eq!(image.ordinal_of("GetWindowTextA"), Some(2));
            assert_eq!(image.ordinal_of("ShowWindow"), Some(3));
        }
        Some("opengl32") => {
            assert_eq!(image.ordinal_of("glFunc100"), Some(100));
            assert_eq!(image.ordinal_of("glFunc101"), Some(101));
            assert_eq!(image.ordinal_of("glFunc103"), Some(103));
            assert_eq!(image.base_ordinal, 100);
        }
        other => panic!("unexpected fixture file under tests/fixtures: {other:?}"),
    }

    Ok(())
}

datatest_stable::harness! {
    { test = exports_match_fixture, root = "tests/fixtures", pattern = r"(kernel32|user32|opengl32|ntdll\.dll)$" },
}
