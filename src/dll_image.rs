//! DLL Image Reader: loads a named DLL from the host search path as a plain
//! read-only mapping ("as a data file with unresolved references" — raw
//! bytes, not relocated, `DllMain` never runs) and exposes its export
//! directory as three parallel tables plus the RVA range the export
//! directory itself occupies, which is what tells [`crate::forward`] a given
//! function RVA is actually a `"DLL.Function"` forwarder string rather than
//! code.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use bytemuck::checked::try_from_bytes;
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use tracing::{debug, trace};

use crate::coff::CoffFileHeader;
use crate::error::CoreError;
use crate::optional::{Magic, Optional, OptionalHeader32};
use crate::scribe::{read_cstr, Scribe};
use crate::section::{parse_section_table, SectionHeader};

const DOS_E_LFANEW_OFFSET: usize = 0x3C;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";

/// `IMAGE_EXPORT_DIRECTORY`, read directly out of the mapped file.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct ExportDirectory {
    characteristics: u32,
    time_date_stamp: u32,
    major_version: u16,
    minor_version: u16,
    name: u32,
    base: u32,
    number_of_functions: u32,
    number_of_names: u32,
    address_of_functions: u32,
    address_of_names: u32,
    address_of_name_ordinals: u32,
}

/// A parsed export directory: the tables an import resolver actually needs,
/// already detached from the mapped bytes they were read from.
pub struct DllImage {
    pub dll_name: String,
    /// `Base` from the export directory; `ordinal_to_rva` is keyed by the
    /// real ordinal (already offset by this), not by table index.
    pub base_ordinal: u32,
    pub name_to_ordinal: HashMap<String, u32>,
    pub ordinal_to_rva: HashMap<u32, u32>,
    /// `[start, end)` RVA range spanned by the export directory and its
    /// subtables; a function RVA falling inside this range is a forwarder
    /// string, not code. See the forward resolution module.
    export_dir_range: (u32, u32),
    /// Kept so forwarder strings (which live in arbitrary sections, not
    /// necessarily the one holding the export directory) can be translated
    /// from RVA to file offset after parsing.
    sections: Vec<SectionHeader>,
}

impl DllImage {
    /// Parses a mapped (or otherwise owned) 32-bit PE image's export table.
    /// `binary` is the raw file content; no relocation or loader fixups are
    /// applied; all addresses handed back stay RVAs.
    pub fn parse(binary: &[u8]) -> Result<Self, CoreError> {
        if binary.len() < DOS_E_LFANEW_OFFSET + 4 {
            return Err(CoreError::OffsetOutOfRange);
        }
        let e_lfanew = binary.read_u32(DOS_E_LFANEW_OFFSET) as usize;

        let sig = binary
            .get(e_lfanew..e_lfanew + 4)
            .ok_or(CoreError::OffsetOutOfRange)?;
        if sig != PE_SIGNATURE {
            return Err(CoreError::MissingPeHeader);
        }

        let mut offset = e_lfanew + 4;
        let coff_size = core::mem::size_of::<CoffFileHeader>();
        let coff_slice = binary
            .get(offset..offset + coff_size)
            .ok_or(CoreError::MissingCoffHeader)?;
        let coff = *try_from_bytes::<CoffFileHeader>(coff_slice)
            .map_err(|_| CoreError::MissingCoffHeader)?;
        offset += coff_size;

        let magic = binary.read_u16(offset);
        match magic {
            m if m == Magic::PE32 as u16 => {}
            m if m == Magic::PE64 as u16 => {
                return Err(CoreError::UnsupportedBitness(String::new()));
            }
            _ => return Err(CoreError::MissingMagicNumber),
        }
        let optional = OptionalHeader32::parse_optional_header(binary, &mut offset)?;

        let section_table_offset = e_lfanew + 4 + coff_size + coff.size_of_optional_header as usize;
        let sections = parse_section_table(binary, section_table_offset, coff.number_of_sections);

        let export_dir = &optional.data_directories.export_table;
        if export_dir.virtual_address == 0 || export_dir.size == 0 {
            return Err(CoreError::MalformedPe(
                String::new(),
                "no export directory".to_string(),
            ));
        }

        let rva_to_offset = |rva: u32| -> Result<usize, CoreError> {
            translate_rva(&sections, rva).ok_or(CoreError::OffsetOutOfRange)
        };

        let dir_off = rva_to_offset(export_dir.virtual_address)?;
        let dir_size = core::mem::size_of::<ExportDirectory>();
        let dir_slice = binary
            .get(dir_off..dir_off + dir_size)
            .ok_or(CoreError::OffsetOutOfRange)?;
        let dir = *try_from_bytes::<ExportDirectory>(dir_slice)
            .map_err(|_| CoreError::OffsetOutOfRange)?;

        let name_off = rva_to_offset(dir.name)?;
        let dll_name = read_cstr(binary, name_off).ok_or(CoreError::OffsetOutOfRange)?;

        let functions_off = rva_to_offset(dir.address_of_functions)?;
        let names_off = rva_to_offset(dir.address_of_names)?;
        let ordinals_off = rva_to_offset(dir.address_of_name_ordinals)?;

        let mut ordinal_to_rva = HashMap::with_capacity(dir.number_of_functions as usize);
        for i in 0..dir.number_of_functions {
            let rva = binary.read_u32(functions_off + (i as usize) * 4);
            if rva != 0 {
                ordinal_to_rva.insert(dir.base + i, rva);
            }
        }

        let mut name_to_ordinal = HashMap::with_capacity(dir.number_of_names as usize);
        for i in 0..dir.number_of_names {
            let name_rva = binary.read_u32(names_off + (i as usize) * 4);
            let ordinal_index = binary.read_u16(ordinals_off + (i as usize) * 2) as u32;
            let name_off = rva_to_offset(name_rva)?;
            let name = read_cstr(binary, name_off).ok_or(CoreError::OffsetOutOfRange)?;
            name_to_ordinal.insert(name, dir.base + ordinal_index);
        }

        trace!(dll = %dll_name, exports = dir.number_of_names, "parsed export directory");

        Ok(DllImage {
            dll_name,
            base_ordinal: dir.base,
            name_to_ordinal,
            ordinal_to_rva,
            export_dir_range: (
                export_dir.virtual_address,
                export_dir.virtual_address + export_dir.size,
            ),
            sections,
        })
    }

    pub fn ordinal_of(&self, function: &str) -> Option<u32> {
        self.name_to_ordinal.get(function).copied()
    }

    pub fn rva_of(&self, ordinal: u32) -> Option<u32> {
        self.ordinal_to_rva.get(&ordinal).copied()
    }

    /// Every exported name this DLL declares, in arbitrary order. Used by
    /// the 1K hash search, which must hash every export, not just the ones
    /// referenced as imports.
    pub fn exported_names(&self) -> impl Iterator<Item = &str> {
        self.name_to_ordinal.keys().map(String::as_str)
    }

    /// True when `rva` falls inside the export directory's own address
    /// range, meaning it is a `"DLL.Function"` forwarder string rather than
    /// executable code.
    pub fn is_forwarded_rva(&self, rva: u32) -> bool {
        rva >= self.export_dir_range.0 && rva < self.export_dir_range.1
    }

    /// Reads the forwarder string at `rva` (only meaningful when
    /// [`Self::is_forwarded_rva`] returned `true` for it) out of `binary`,
    /// the same buffer this image was parsed from. A forwarder string has
    /// the form `"DLL.Function"` or `"DLL.#123"` (forwarding to an ordinal).
    pub fn read_forwarder_string(&self, binary: &[u8], rva: u32) -> Option<String> {
        let offset = translate_rva(&self.sections, rva)?;
        read_cstr(binary, offset)
    }
}

fn translate_rva(sections: &[SectionHeader], rva: u32) -> Option<usize> {
    for section in sections {
        let start = section.virtual_address;
        let extent = section.virtual_size.max(section.size_of_raw_data);
        if rva >= start && rva < start + extent {
            let delta = rva - start;
            return Some((section.pointer_to_raw_data + delta) as usize);
        }
    }
    None
}

/// Resolves a bare DLL name to a path on the host: the bare name
/// first (so an explicit path or a file in the working directory wins),
/// then every caller-supplied extra search directory (used by tests to
/// point at checked-in synthetic fixtures instead of real system DLLs),
/// then `%SystemRoot%\System32`, then every directory on `PATH`. This lets
/// the reader run on non-Windows hosts given a local copy of the DLL.
pub fn resolve_dll_path(name: &str) -> Option<PathBuf> {
    resolve_dll_path_in(name, &[])
}

/// The filenames to try for a bare DLL name like `"kernel32"`: the bare name
/// itself (so extensionless fixtures keep working), then, if `name` didn't
/// already carry an extension, the same name with `.dll` appended — the
/// fallback `LoadLibraryEx` performs implicitly and this reader must do
/// explicitly since it never calls into the Windows loader.
fn dll_filename_candidates(name: &str) -> Vec<String> {
    if Path::new(name).extension().is_none() {
        vec![name.to_string(), format!("{name}.dll")]
    } else {
        vec![name.to_string()]
    }
}

/// As [`resolve_dll_path`], additionally checking `extra_dirs` (searched in
/// order) before falling back to the host environment.
pub fn resolve_dll_path_in(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    let candidates = dll_filename_candidates(name);

    for candidate_name in &candidates {
        let bare = Path::new(candidate_name);
        if bare.is_file() {
            return Some(bare.to_path_buf());
        }
    }

    for dir in extra_dirs {
        for candidate_name in &candidates {
            let candidate = dir.join(candidate_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    if let Ok(system_root) = std::env::var("SystemRoot") {
        let system32 = Path::new(&system_root).join("System32");
        for candidate_name in &candidates {
            let candidate = system32.join(candidate_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for candidate_name in &candidates {
                let candidate = dir.join(candidate_name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    None
}

/// Owns every DLL mapping opened during one core run, mapping each DLL once
/// regardless of how many imports reference it. Dropped (and its mappings
/// unmapped) at the end of the run.
#[derive(Default)]
pub struct DllCache {
    mmaps: HashMap<String, Mmap>,
    images: HashMap<String, DllImage>,
    /// Extra directories searched before the host environment; empty in
    /// production, populated by tests with a fixtures directory so the
    /// suite never touches real system DLLs.
    extra_search_dirs: Vec<PathBuf>,
}

impl DllCache {
    pub fn new() -> Self {
        DllCache::default()
    }

    /// A cache that additionally searches `dirs` (in order) before falling
    /// back to `%SystemRoot%\System32` and `PATH`.
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        DllCache { extra_search_dirs: dirs, ..DllCache::default() }
    }

    /// Returns the parsed export directory for `dll`, opening and mapping it
    /// on first use. `dll` is matched case-insensitively, as Windows DLL
    /// names are.
    pub fn get_or_open(&mut self, dll: &str) -> Result<&DllImage, CoreError> {
        let key = dll.to_ascii_lowercase();
        if !self.images.contains_key(&key) {
            let path = resolve_dll_path_in(dll, &self.extra_search_dirs)
                .ok_or_else(|| CoreError::DllNotFound(dll.to_string()))?;
            debug!(dll, path = %path.display(), "mapping host DLL");
            let file = File::open(&path).map_err(CoreError::Io)?;
            // SAFETY: the mapping is read-only and the file is not
            // concurrently truncated by this process; a raced external
            // modification can only produce a read error or garbage bytes
            // that downstream parsing rejects, never unsoundness.
            let mmap = unsafe { Mmap::map(&file) }.map_err(CoreError::Io)?;
            let image = DllImage::parse(&mmap).map_err(|e| {
                CoreError::MalformedPe(dll.to_string(), e.to_string())
            })?;
            self.mmaps.insert(key.clone(), mmap);
            self.images.insert(key.clone(), image);
        }
        Ok(self.images.get(&key).expect("just inserted"))
    }

    /// The raw mapped bytes backing `dll`'s [`DllImage`], needed to read
    /// forwarder strings that live outside the export directory's own
    /// tables. Panics if `dll` was not already opened via
    /// [`Self::get_or_open`].
    pub fn bytes_of(&self, dll: &str) -> &[u8] {
        let key = dll.to_ascii_lowercase();
        &self.mmaps[&key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffers_too_small_for_a_dos_header() {
        let err = DllImage::parse(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CoreError::OffsetOutOfRange));
    }

    #[test]
    fn rejects_missing_pe_signature() {
        let mut binary = vec![0u8; 0x40];
        binary[DOS_E_LFANEW_OFFSET..DOS_E_LFANEW_OFFSET + 4].copy_from_slice(&0x38u32.to_le_bytes());
        let err = DllImage::parse(&binary).unwrap_err();
        assert!(matches!(err, CoreError::MissingPeHeader));
    }

    #[test]
    fn translate_rva_maps_into_the_owning_section() {
        let mut section = SectionHeader::default();
        section.virtual_address = 0x1000;
        section.virtual_size = 0x200;
        section.pointer_to_raw_data = 0x400;
        let sections = vec![section];
        assert_eq!(translate_rva(&sections, 0x1010), Some(0x410));
        assert_eq!(translate_rva(&sections, 0x2000), None);
    }
}
