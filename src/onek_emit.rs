//! 1K Emitter: lays out the solver's chosen DLL order and hash
//! family into the two hunks the 1K runtime stub expects — a fixed-stride
//! `_DLLNames` buffer it walks while rescanning every DLL's exports, and a
//! sparse `_ImportList` hunk indexed directly by `H1K(name) * 4`.

use crate::hunk::{Hunk, HunkFlags, HunkList, ImportRef, Symbol, SymbolFlags};
use crate::onek_search::HashFamily;

/// The stub always indexes a 16-bit hash into a 4-byte-stride table; the
/// buffer is sparse (virtual size only, zero actual bytes) so its size
/// doesn't grow with the number of imports.
const IMPORT_LIST_VIRTUAL_SIZE: usize = 65536 * 256;

/// Everything the 1K emitter hands back beyond the hunk list itself.
pub struct OnekOutput {
    pub hunks: HunkList,
    pub hash_bits: u8,
    pub max_dll_name_length: usize,
}

/// Emits the 1K-mode hunks. `dll_names` must already be in solver order
/// (index 0 is `kernel32`); `imports` is the full referenced-import list,
/// in any order.
pub fn emit_1k(imports: &[ImportRef], dll_names: &[String], hash: &HashFamily) -> OnekOutput {
    let max_dll_name_length = dll_names
        .iter()
        .map(|d| d.len() + 1)
        .max()
        .unwrap_or(1);

    let mut names_buf: Vec<u8> = Vec::new();
    for name in dll_names {
        if name.eq_ignore_ascii_case("kernel32") {
            continue;
        }
        while names_buf.len() % max_dll_name_length != 0 {
            names_buf.push(0);
        }
        names_buf.extend_from_slice(name.to_ascii_lowercase().as_bytes());
    }

    let mut dll_names_hunk = Hunk::new_writeable("_DLLNames", 1);
    dll_names_hunk.raw_data = names_buf;
    dll_names_hunk.virtual_size = dll_names_hunk.raw_data.len();
    dll_names_hunk.add_symbol(Symbol::new("_DLLNames", 0, SymbolFlags::IS_RELOCATEABLE));
    dll_names_hunk.add_symbol(Symbol::section(0, SymbolFlags::IS_SECTION | SymbolFlags::IS_RELOCATEABLE, ".data"));

    let mut import_list = Hunk::new_writeable("_ImportList", 4);
    import_list.virtual_size = IMPORT_LIST_VIRTUAL_SIZE;
    import_list.flags |= HunkFlags::IS_WRITEABLE;
    import_list.add_symbol(Symbol::new("_ImportList", 0, SymbolFlags::IS_RELOCATEABLE));
    import_list.add_symbol(Symbol::section(0, SymbolFlags::IS_SECTION | SymbolFlags::IS_RELOCATEABLE, ".bss"));
    import_list.add_symbol(Symbol::new("_HashFamily", hash.family as i64, SymbolFlags::empty()));

    for imp in imports {
        let offset = crate::hash::h1k(&imp.function, hash.family, hash.bits) as i64 * 4;
        import_list.add_symbol(Symbol::new(imp.hunk_name.clone(), offset, SymbolFlags::IS_RELOCATEABLE));
    }

    let mut hunks = HunkList::new();
    hunks.push_back(dll_names_hunk);
    hunks.push_back(import_list);

    OnekOutput { hunks, hash_bits: hash.bits, max_dll_name_length }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel32_contributes_no_bytes_to_the_names_buffer() {
        let imports = vec![ImportRef::new("h1", "kernel32", "ExitProcess")];
        let hash = HashFamily { family: 0x00C0_AB01, bits: 8 };
        let out = emit_1k(&imports, &["kernel32".to_string()], &hash);
        let names_hunk = out.hunks.iter().find(|h| h.name == "_DLLNames").unwrap();
        assert!(names_hunk.raw_data.is_empty());
    }

    #[test]
    fn names_are_padded_to_max_stride() {
        let imports = vec![
            ImportRef::new("h1", "kernel32", "ExitProcess"),
            ImportRef::new("h2", "user32", "MessageBoxA"),
            ImportRef::new("h3", "opengl32", "glBegin"),
        ];
        let hash = HashFamily { family: 0x00C0_AB01, bits: 8 };
        let order = vec!["kernel32".to_string(), "opengl32".to_string(), "user32".to_string()];
        let out = emit_1k(&imports, &order, &hash);
        // max len is "opengl32" (8) + 1 = 9. opengl32 lands at offset 0
        // (already stride-aligned); user32 needs one pad byte first since
        // "opengl32" alone isn't a multiple of 9, and — being the last
        // entry — gets no trailing pad of its own.
        assert_eq!(out.max_dll_name_length, 9);
        let names_hunk = out.hunks.iter().find(|h| h.name == "_DLLNames").unwrap();
        assert_eq!(names_hunk.raw_data.len(), 9 + 6);
        assert_eq!(&names_hunk.raw_data[0..8], b"opengl32");
        assert_eq!(&names_hunk.raw_data[9..15], b"user32");
    }

    #[test]
    fn hash_family_symbol_is_absolute_and_import_offsets_match_h1k() {
        let imports = vec![ImportRef::new("h1", "kernel32", "ExitProcess")];
        let hash = HashFamily { family: 0x00C0_AB01, bits: 10 };
        let out = emit_1k(&imports, &["kernel32".to_string()], &hash);
        let import_list = out.hunks.iter().find(|h| h.name == "_ImportList").unwrap();
        let family_sym = import_list.symbols.iter().find(|s| s.name == "_HashFamily").unwrap();
        assert!(!family_sym.flags.contains(SymbolFlags::IS_RELOCATEABLE));
        assert_eq!(family_sym.value, 0x00C0_AB01);

        let expected_offset = crate::hash::h1k("ExitProcess", hash.family, hash.bits) as i64 * 4;
        let import_sym = import_list.symbols.iter().find(|s| s.name == "h1").unwrap();
        assert_eq!(import_sym.value, expected_offset);
        assert!(import_sym.flags.contains(SymbolFlags::IS_RELOCATEABLE));
    }

    #[test]
    fn hunk_order_is_names_then_import_list() {
        let imports = vec![ImportRef::new("h1", "kernel32", "ExitProcess")];
        let hash = HashFamily { family: 0x00C0_AB01, bits: 8 };
        let out = emit_1k(&imports, &["kernel32".to_string()], &hash);
        assert_eq!(out.hunks.iter().map(|h| h.name.clone()).collect::<Vec<_>>(), vec!["_DLLNames", "_ImportList"]);
    }
}
