//! Standard Emitter: lays out a resolved [`ImportRef`] list into the
//! three hunks the linker's runtime stub expects — `_ImportList` (one
//! relocatable symbol per import, at a 4-byte slot keyed by ordinal), the
//! `_DLLNames` buffer (lowercase NUL-terminated DLL names, each followed by
//! a running import count, with range DLLs instead getting one byte per
//! absorbed ordinal-contiguous group), and a raw `H32` hash array returned
//! separately as `HashHunk`.

use std::collections::HashMap;

use crate::dll_image::DllCache;
use crate::hash::h32;
use crate::hunk::{Hunk, HunkList, HunkFlags, ImportRef, Symbol, SymbolFlags};

/// Maximum ordinal span a single range group may absorb; beyond this
/// the group is closed and a new one starts even within the same DLL.
const MAX_RANGE_SPAN: u32 = 254;

/// Everything the standard emitter hands back beyond the hunk list itself.
pub struct StandardOutput {
    pub hunks: HunkList,
    pub hash_hunk: Hunk,
}

/// Total order over imports: `kernel32` first, then `user32`, then
/// lexicographic DLL name; within a DLL, ascending resolved ordinal.
fn sort_key<'a>(imp: &'a ImportRef, ordinals: &HashMap<(String, String), u32>) -> (u8, &'a str, u32) {
    let dll_rank = if imp.dll.eq_ignore_ascii_case("kernel32") {
        0
    } else if imp.dll.eq_ignore_ascii_case("user32") {
        1
    } else {
        2
    };
    let ordinal = *ordinals.get(&(imp.dll.clone(), imp.function.clone())).unwrap_or(&0);
    (dll_rank, imp.dll.as_str(), ordinal)
}

/// Emits the standard-mode import hunks for an already-collected,
/// already-forward-resolved list of imports.
///
/// `enable_range_import` (from [`crate::collector::StandardCollection`])
/// gates whether range-count bytes are written into the names buffer at
/// all; `pos` bookkeeping advances unconditionally regardless, preserving
/// the slot numbering a real runtime stub expects even when range bytes
/// are suppressed.
pub fn emit_standard(
    imports: &[ImportRef],
    range_dlls: &[String],
    enable_range_import: bool,
    cache: &mut DllCache,
) -> Result<StandardOutput, crate::error::CoreError> {
    let range_dlls_lower: Vec<String> = range_dlls.iter().map(|d| d.to_ascii_lowercase()).collect();

    let mut ordinals = HashMap::with_capacity(imports.len());
    for imp in imports {
        let image = cache.get_or_open(&imp.dll)?;
        let ordinal = image
            .ordinal_of(&imp.function)
            .ok_or_else(|| crate::error::CoreError::ExportNotFound { dll: imp.dll.clone(), function: imp.function.clone() })?;
        ordinals.insert((imp.dll.clone(), imp.function.clone()), ordinal);
    }

    let mut sorted: Vec<&ImportRef> = imports.iter().collect();
    sorted.sort_by(|a, b| sort_key(a, &ordinals).cmp(&sort_key(b, &ordinals)));

    let mut import_list = Hunk::new_writeable("_ImportList", 16);
    let mut dll_names: Vec<u8> = Vec::new();
    let mut hashes: Vec<u32> = Vec::new();
    let mut hash_counter_pos: Option<usize> = None;
    let mut current_dll: Option<String> = None;
    let mut pos: u32 = 0;

    let mut i = 0usize;
    while i < sorted.len() {
        let imp = sorted[i];
        let is_new_dll = current_dll.as_deref() != Some(imp.dll.as_str());

        if is_new_dll {
            if !imp.dll.eq_ignore_ascii_case("kernel32") {
                dll_names.extend_from_slice(imp.dll.to_ascii_lowercase().as_bytes());
                dll_names.push(0);
                dll_names.push(0);
                hash_counter_pos = Some(dll_names.len() - 1);
            } else {
                hash_counter_pos = None;
            }
            current_dll = Some(imp.dll.clone());
        }

        if let Some(counter_pos) = hash_counter_pos {
            dll_names[counter_pos] = dll_names[counter_pos].wrapping_add(1);
        }

        hashes.push(h32(&imp.function));
        let start_ordinal = *ordinals.get(&(imp.dll.clone(), imp.function.clone())).expect("resolved above");
        let mut ordinal = start_ordinal;

        import_list.add_symbol(Symbol::new(imp.hunk_name.clone(), (pos * 4) as i64, SymbolFlags::IS_RELOCATEABLE));
        i += 1;

        let use_range = range_dlls_lower.iter().any(|d| d.eq_ignore_ascii_case(&imp.dll));
        while use_range && i < sorted.len() && sorted[i].dll.eq_ignore_ascii_case(&imp.dll) {
            let next = sorted[i];
            let o = *ordinals.get(&(next.dll.clone(), next.function.clone())).expect("resolved above");
            if o.saturating_sub(start_ordinal) >= MAX_RANGE_SPAN {
                break;
            }
            ordinal = o;
            import_list.add_symbol(Symbol::new(next.hunk_name.clone(), ((pos + ordinal - start_ordinal) * 4) as i64, SymbolFlags::IS_RELOCATEABLE));
            i += 1;
        }

        if enable_range_import {
            dll_names.push((ordinal - start_ordinal + 1) as u8);
        }
        pos += ordinal - start_ordinal + 1;
    }

    dll_names.push(0xFF);

    import_list.virtual_size = (pos * 4) as usize;
    import_list.flags |= HunkFlags::IS_WRITEABLE;
    import_list.add_symbol(Symbol::new("_ImportList", 0, SymbolFlags::IS_RELOCATEABLE));
    import_list.add_symbol(Symbol::section(0, SymbolFlags::IS_SECTION | SymbolFlags::IS_RELOCATEABLE, ".bss"));

    let mut dll_names_hunk = Hunk::new_writeable("_DLLNames", 1);
    dll_names_hunk.raw_data = dll_names;
    dll_names_hunk.virtual_size = dll_names_hunk.raw_data.len();
    dll_names_hunk.add_symbol(Symbol::new("_DLLNames", 0, SymbolFlags::IS_RELOCATEABLE));
    dll_names_hunk.add_symbol(Symbol::section(0, SymbolFlags::IS_SECTION | SymbolFlags::IS_RELOCATEABLE, ".data"));

    let mut hash_bytes = Vec::with_capacity(hashes.len() * 4);
    for h in &hashes {
        hash_bytes.extend_from_slice(&h.to_le_bytes());
    }
    let hash_hunk = Hunk {
        name: "HashHunk".to_string(),
        flags: HunkFlags::empty(),
        virtual_size: hash_bytes.len(),
        raw_data: hash_bytes,
        alignment: 4,
        symbols: Vec::new(),
        import_dll: None,
        import_name: None,
    };

    let mut hunks = HunkList::new();
    hunks.push_back(import_list);
    hunks.push_back(dll_names_hunk);

    Ok(StandardOutput { hunks, hash_hunk })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_orders_kernel32_then_user32_then_lexicographic() {
        let ordinals = HashMap::new();
        let k = ImportRef::new("h1", "kernel32", "ExitProcess");
        let u = ImportRef::new("h2", "user32", "MessageBoxA");
        let a = ImportRef::new("h3", "advapi32", "RegOpenKeyA");
        assert!(sort_key(&k, &ordinals) < sort_key(&u, &ordinals));
        assert!(sort_key(&u, &ordinals) < sort_key(&a, &ordinals));
    }
}
