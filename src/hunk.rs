//! The narrow slice of a linker's hunk/symbol model this core consumes and
//! produces. The full hunk list,
//! relocation model and section merging rules belong to the surrounding
//! linker; this module only carries what import resolution needs: a named,
//! flagged byte blob that may declare itself an import of a given
//! `(dll, function)`, and a place to attach output symbols.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags carried on a [`Hunk`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HunkFlags: u32 {
        /// This hunk is an unresolved import; `import_dll`/`import_name`
        /// name the external function it refers to.
        const IS_IMPORT = 0x0001;
        /// This hunk's bytes are writeable at runtime (placed in `.bss`/`.data`
        /// rather than a read-only section).
        const IS_WRITEABLE = 0x0002;
    }
}

bitflags! {
    /// Flags carried on a [`Symbol`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SymbolFlags: u32 {
        /// The symbol's value must be relocated against the hunk's final
        /// load address; without this flag the value is absolute (as used
        /// for `_HashFamily`).
        const IS_RELOCATEABLE = 0x0001;
        /// The symbol additionally marks a section for linker placement
        /// (`.bss`, `.data`).
        const IS_SECTION = 0x0002;
    }
}

/// A named value attached to a hunk: either a relocatable offset into it, or
/// (when not [`SymbolFlags::IS_RELOCATEABLE`]) an absolute constant such as
/// the chosen 1K hash family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: i64,
    pub flags: SymbolFlags,
    /// For a section symbol, the section it places the hunk into (`.bss`, `.data`).
    pub section: Option<&'static str>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, value: i64, flags: SymbolFlags) -> Self {
        Symbol { name: name.into(), value, flags, section: None }
    }

    /// A section-placement symbol: its name is literally the section
    /// (`.bss`, `.data`), not the hunk's own base-symbol name — the linker
    /// reads the name itself to decide where to place the hunk.
    pub fn section(value: i64, flags: SymbolFlags, section: &'static str) -> Self {
        Symbol { name: section.to_string(), value, flags, section: Some(section) }
    }
}

/// An opaque object-fragment produced by an emitter and handed back to the
/// linker: bytes (or a declared virtual size for bytes the linker zero-fills),
/// placement flags, alignment, and the symbols it exports.
#[derive(Clone, Debug, Default)]
pub struct Hunk {
    pub name: String,
    pub flags: HunkFlags,
    pub raw_data: Vec<u8>,
    pub virtual_size: usize,
    pub alignment: u32,
    pub symbols: Vec<Symbol>,
    /// Present only on import hunks: the DLL and function this hunk resolves.
    pub import_dll: Option<String>,
    pub import_name: Option<String>,
}

impl Hunk {
    /// A fresh, empty, writeable hunk meant to be filled in by an emitter.
    pub fn new_writeable(name: impl Into<String>, alignment: u32) -> Self {
        Hunk {
            name: name.into(),
            flags: HunkFlags::IS_WRITEABLE,
            raw_data: Vec::new(),
            virtual_size: 0,
            alignment,
            symbols: Vec::new(),
            import_dll: None,
            import_name: None,
        }
    }

    /// An import-flagged hunk naming the external function it refers to.
    /// This is what the Import Collector scans for; the surrounding linker
    /// is responsible for creating one per unresolved external reference.
    pub fn new_import(name: impl Into<String>, dll: impl Into<String>, function: impl Into<String>) -> Self {
        Hunk {
            name: name.into(),
            flags: HunkFlags::IS_IMPORT,
            raw_data: Vec::new(),
            virtual_size: 0,
            alignment: 0,
            symbols: Vec::new(),
            import_dll: Some(dll.into()),
            import_name: Some(function.into()),
        }
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub fn is_import(&self) -> bool {
        self.flags.contains(HunkFlags::IS_IMPORT)
    }
}

/// An ordered collection of hunks, the unit both consumed (as the linker's
/// existing hunk list) and produced (as the new import hunks) by this core.
#[derive(Clone, Debug, Default)]
pub struct HunkList {
    hunks: Vec<Hunk>,
}

impl HunkList {
    pub fn new() -> Self {
        HunkList { hunks: Vec::new() }
    }

    pub fn push_back(&mut self, hunk: Hunk) {
        self.hunks.push(hunk);
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hunk> {
        self.hunks.iter()
    }
}

impl std::ops::Index<usize> for HunkList {
    type Output = Hunk;
    fn index(&self, i: usize) -> &Hunk {
        &self.hunks[i]
    }
}

impl<'a> IntoIterator for &'a HunkList {
    type Item = &'a Hunk;
    type IntoIter = std::slice::Iter<'a, Hunk>;
    fn into_iter(self) -> Self::IntoIter {
        self.hunks.iter()
    }
}

impl FromIterator<Hunk> for HunkList {
    fn from_iter<I: IntoIterator<Item = Hunk>>(iter: I) -> Self {
        HunkList { hunks: iter.into_iter().collect() }
    }
}

/// A fully-resolved reference to one import, as collected from the hunk list
/// (possibly after chasing one or more forwarded RVAs). `dll` is always
/// stored lowercase; comparisons against it elsewhere are case-insensitive
/// at the point of collection, not repeatedly at use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRef {
    pub hunk_name: String,
    pub dll: String,
    pub function: String,
}

impl ImportRef {
    pub fn new(hunk_name: impl Into<String>, dll: impl Into<String>, function: impl Into<String>) -> Self {
        ImportRef { hunk_name: hunk_name.into(), dll: dll.into().to_ascii_lowercase(), function: function.into() }
    }
}
