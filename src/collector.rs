//! Import Collector: scans the linker's hunk list for import-flagged
//! hunks and turns them into a flat, resolved [`ImportRef`] list. Standard
//! mode chases forwards transparently (each hop is a recorded warning); 1K
//! mode treats a forward as fatal and additionally requires `kernel32` to
//! be among the imports, since the runtime stub it emits for has no code
//! path for anything else.

use tracing::warn;

use crate::dll_image::DllCache;
use crate::error::CoreError;
use crate::forward::{resolve_chain, resolve_once, ForwardResolution};
use crate::hunk::{HunkList, ImportRef};

/// A non-fatal diagnostic recorded alongside a successful collection, so
/// callers (and tests) can assert on it without scraping log output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// A standard-mode import was forwarded; the chain was followed and the
    /// final `(dll, function)` substituted in its place.
    ForwardedImportReplaced { hunk_name: String, original_dll: String, original_function: String, resolved_dll: String, resolved_function: String },
    /// A caller-supplied range DLL received no imports at all.
    UnusedRangeDll { dll: String },
}

/// The result of collecting imports in standard mode.
pub struct StandardCollection {
    pub imports: Vec<ImportRef>,
    /// Set if any collected import's DLL is (case-insensitively) in the
    /// caller-supplied range-DLL set; threaded through to the emitter so it
    /// knows whether to reserve range-count bytes at all.
    pub enable_range_import: bool,
    pub warnings: Vec<Warning>,
}

/// Walks `hunks`, collecting every import-flagged hunk, chasing forwards
/// until each lands on real code. `range_dlls` is matched case-insensitively.
pub fn collect_standard(
    hunks: &HunkList,
    range_dlls: &[String],
    cache: &mut DllCache,
) -> Result<StandardCollection, CoreError> {
    let range_dlls_lower: Vec<String> = range_dlls.iter().map(|d| d.to_ascii_lowercase()).collect();
    let mut imports = Vec::new();
    let mut warnings = Vec::new();
    let mut enable_range_import = false;
    let mut dlls_used: Vec<String> = Vec::new();

    for hunk in hunks {
        if !hunk.is_import() {
            continue;
        }
        let original_dll = hunk.import_dll.clone().expect("import hunk always names a dll");
        let original_function = hunk.import_name.clone().expect("import hunk always names a function");

        let (resolved_dll, resolved_function) = resolve_chain(cache, &original_dll, &original_function)?;
        if resolved_dll != original_dll || resolved_function != original_function {
            warn!(
                hunk = %hunk.name,
                original = %format!("{original_dll}.{original_function}"),
                resolved = %format!("{resolved_dll}.{resolved_function}"),
                "import was forwarded"
            );
            warnings.push(Warning::ForwardedImportReplaced {
                hunk_name: hunk.name.clone(),
                original_dll,
                original_function,
                resolved_dll: resolved_dll.clone(),
                resolved_function: resolved_function.clone(),
            });
        }

        let lower = resolved_dll.to_ascii_lowercase();
        if range_dlls_lower.contains(&lower) {
            enable_range_import = true;
        }
        if !dlls_used.iter().any(|d| d.eq_ignore_ascii_case(&lower)) {
            dlls_used.push(lower);
        }

        imports.push(ImportRef::new(hunk.name.clone(), resolved_dll, resolved_function));
    }

    for range_dll in range_dlls {
        let lower = range_dll.to_ascii_lowercase();
        if !dlls_used.contains(&lower) {
            warn!(dll = %range_dll, "range DLL declared but unused");
            warnings.push(Warning::UnusedRangeDll { dll: range_dll.clone() });
        }
    }

    Ok(StandardCollection { imports, enable_range_import, warnings })
}

/// Collects imports for 1K mode: any forward is fatal, and `kernel32` must
/// be among the referenced imports (the stub the 1K emitter targets always
/// resolves its own entry points through it).
pub fn collect_1k(hunks: &HunkList, cache: &mut DllCache) -> Result<Vec<ImportRef>, CoreError> {
    let mut imports = Vec::new();
    let mut saw_kernel32 = false;

    for hunk in hunks {
        if !hunk.is_import() {
            continue;
        }
        let dll = hunk.import_dll.clone().expect("import hunk always names a dll");
        let function = hunk.import_name.clone().expect("import hunk always names a function");

        match resolve_once(cache, &dll, &function)? {
            ForwardResolution::NotForwarded => {}
            ForwardResolution::NotFound => {
                return Err(CoreError::ExportNotFound { dll, function });
            }
            ForwardResolution::Forwarded(..) => {
                return Err(CoreError::ForwardNotSupported { dll, function });
            }
        }

        if dll.eq_ignore_ascii_case("kernel32") || dll.eq_ignore_ascii_case("kernel32.dll") {
            saw_kernel32 = true;
        }

        imports.push(ImportRef::new(hunk.name.clone(), dll, function));
    }

    if !saw_kernel32 {
        return Err(CoreError::MissingKernel32);
    }

    Ok(imports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hunk::Hunk;

    #[test]
    fn collect_1k_rejects_missing_kernel32() {
        let mut hunks = HunkList::new();
        hunks.push_back(Hunk::new_import("h1", "user32", "MessageBoxA"));
        let mut cache = DllCache::new();
        // This will fail earlier at DllNotFound on a non-Windows test host
        // without user32 present, but MissingKernel32 is the property under
        // test once an import set lacking kernel32 reaches the check; an
        // empty hunk list exercises that path without touching the DLL
        // cache at all.
        let empty = HunkList::new();
        let result = collect_1k(&empty, &mut cache);
        assert!(matches!(result, Err(CoreError::MissingKernel32)));
        let _ = hunks;
    }
}
