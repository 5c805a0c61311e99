//! # crinkler-import-core
//!
//! Import resolution and packing core for a tiny-executable compressor's
//! 32-bit PE output: given a set of unresolved external symbols, produces
//! the data structures its runtime stub uses to resolve them at load time
//! by scanning the target DLLs' export tables.
//!
//! Two independent strategies are implemented, each its own entry point:
//!
//! - [`resolve_standard`]: an explicit, ordinal-sorted import list with
//!   range-compressed contiguous ordinals and a precomputed `H32` name-hash
//!   table.
//! - [`resolve_1k`]: a collision-free `H1K` hash family search plus a
//!   DLL-order constraint solver, for outputs too small to afford an
//!   explicit import list at all.
//!
//! PE parsing (`coff`, `optional`, `section`, `scribe`, `dll_image`) is kept
//! general enough to run against any 32-bit PE, including the synthetic
//! fixtures this crate's own test suite builds, not only real system DLLs.

#![warn(missing_docs)]

/// COFF file header definitions and helper functions.
pub mod coff;
/// Optional header definitions and helper functions.
pub mod optional;
/// Section header definitions and helper functions.
pub mod section;
/// Raw little-endian field access over byte buffers.
pub mod scribe;

/// Every fatal failure mode of the import-resolution core.
pub mod error;
/// The narrow hunk/symbol interface this core consumes and produces.
pub mod hunk;
/// The two name-hashing functions consumed by the emitters.
pub mod hash;
/// The PE export-table reader and its per-run DLL cache.
pub mod dll_image;
/// Forwarded-RVA chain resolution.
pub mod forward;
/// Scans a hunk list into a resolved import list, per mode.
pub mod collector;
/// Standard-mode emitter: ordinal/range grouping, DLL priority ordering.
pub mod standard;
/// 1K-mode collision-free hash-family search and DLL-order constraint solver.
pub mod onek_search;
/// 1K-mode emitter: sparse hash-indexed import list, fixed-stride DLL names.
pub mod onek_emit;

use std::collections::HashSet;

use tracing::instrument;

use collector::Warning;
use dll_image::DllCache;
use error::CoreError;
use hunk::{Hunk, HunkList, ImportRef};
use onek_search::{DllExportSet, SearchResult};

/// Output of a successful standard-mode run.
pub struct StandardResolution {
    /// `_ImportList` then `_DLLNames`.
    pub hunks: HunkList,
    /// The raw `H32` array, returned separately from the main hunk list.
    pub hash_hunk: Hunk,
    /// Whether any collected import's DLL was a declared range DLL.
    pub enable_range_import: bool,
    /// Non-fatal diagnostics collected along the way.
    pub warnings: Vec<Warning>,
}

/// Output of a successful 1K-mode run.
pub struct OnekResolution {
    /// `_DLLNames` then `_ImportList`.
    pub hunks: HunkList,
    /// The bit width the search settled on.
    pub hash_bits: u8,
    /// The stride of each entry in `_DLLNames`.
    pub max_dll_name_length: usize,
    /// The chosen `H1K` multiplier.
    pub family: u32,
}

/// Resolves `hunks`' import-flagged entries in standard mode: chases
/// forwards, sorts by (DLL priority, ordinal), range-compresses contiguous
/// ordinals within `range_dlls`, and emits the resulting import list, DLL
/// name buffer, and hash array.
#[instrument(skip(hunks))]
pub fn resolve_standard(hunks: &HunkList, range_dlls: &[String]) -> Result<StandardResolution, CoreError> {
    let mut cache = DllCache::new();
    resolve_standard_with_cache(hunks, range_dlls, &mut cache)
}

/// The part of [`resolve_standard`] that takes an existing [`DllCache`],
/// split out so tests can supply one pointed at synthetic fixtures instead
/// of [`resolve_standard`]'s host DLL search.
pub fn resolve_standard_with_cache(
    hunks: &HunkList,
    range_dlls: &[String],
    cache: &mut DllCache,
) -> Result<StandardResolution, CoreError> {
    let collected = collector::collect_standard(hunks, range_dlls, cache)?;
    let emitted = standard::emit_standard(&collected.imports, range_dlls, collected.enable_range_import, cache)?;

    Ok(StandardResolution {
        hunks: emitted.hunks,
        hash_hunk: emitted.hash_hunk,
        enable_range_import: collected.enable_range_import,
        warnings: collected.warnings,
    })
}

/// Resolves `hunks`' import-flagged entries in 1K mode: rejects forwards,
/// requires `kernel32` among the imports, searches for a collision-free
/// `(family, bits)` pair across every DLL's full export table, and
/// emits the sparse hash-indexed import list.
#[instrument(skip(hunks))]
pub fn resolve_1k(hunks: &HunkList) -> Result<OnekResolution, CoreError> {
    let mut cache = DllCache::new();
    let imports = collector::collect_1k(hunks, &mut cache)?;
    resolve_1k_with_cache(&imports, &mut cache)
}

/// The part of [`resolve_1k`] after collection, split out so tests can
/// supply a [`DllCache`] pointed at synthetic fixtures instead of the real
/// `collect_1k`'s host DLL search.
pub fn resolve_1k_with_cache(imports: &[ImportRef], cache: &mut DllCache) -> Result<OnekResolution, CoreError> {
    let dllinfos = build_dll_export_sets(imports, cache)?;
    let SearchResult { hash, order } = onek_search::search(&dllinfos)?;

    let dll_names: Vec<String> = order.iter().map(|&i| dllinfos[i].name.clone()).collect();
    let emitted = onek_emit::emit_1k(imports, &dll_names, &hash);

    Ok(OnekResolution {
        hunks: emitted.hunks,
        hash_bits: emitted.hash_bits,
        max_dll_name_length: emitted.max_dll_name_length,
        family: hash.family,
    })
}

/// Builds one [`DllExportSet`] per DLL referenced by `imports`, with
/// `kernel32` forced to index 0, since the search always orders it first. Every export
/// name of every referenced DLL is hashed during the search, not just the
/// names actually imported.
fn build_dll_export_sets(imports: &[ImportRef], cache: &mut DllCache) -> Result<Vec<DllExportSet>, CoreError> {
    let mut dll_names: Vec<String> = Vec::new();
    for imp in imports {
        let lower = imp.dll.to_ascii_lowercase();
        if !dll_names.iter().any(|d| d == &lower) {
            dll_names.push(lower);
        }
    }

    if let Some(pos) = dll_names.iter().position(|d| d.eq_ignore_ascii_case("kernel32")) {
        dll_names.swap(0, pos);
    } else {
        return Err(CoreError::MissingKernel32);
    }

    let mut sets = Vec::with_capacity(dll_names.len());
    for dll in &dll_names {
        let referenced_names: HashSet<String> = imports
            .iter()
            .filter(|imp| imp.dll.eq_ignore_ascii_case(dll))
            .map(|imp| imp.function.clone())
            .collect();

        let image = cache.get_or_open(dll)?;
        let exported_names: Vec<String> = image.exported_names().map(str::to_string).collect();

        sets.push(DllExportSet { name: dll.clone(), exported_names, referenced_names });
    }

    Ok(sets)
}
