use thiserror::Error;

/// Every fatal failure mode of the import-resolution core.
///
/// Warnings (an unused range DLL, a forwarded import that was chased
/// instead of rejected) are not represented here — they are recorded as
/// [`crate::collector::Warning`]s alongside a successful result.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The DLL named could not be located on the host search path, or could
    /// not be mapped.
    #[error("cannot open DLL '{0}'")]
    DllNotFound(String),
    /// `function` is not present in `dll`'s export name table.
    #[error("import '{function}' cannot be found in '{dll}'")]
    ExportNotFound { dll: String, function: String },
    /// A forwarded RVA was encountered while collecting imports for 1K mode,
    /// which does not support forwarding.
    #[error("import '{function}' from '{dll}' uses a forwarded RVA; not supported in 1K mode")]
    ForwardNotSupported { dll: String, function: String },
    /// 1K mode requires `kernel32` to be among the referenced imports.
    #[error("kernel32 needs to be linked for import code to function")]
    MissingKernel32,
    /// The 1K search exhausted every `(bits, family)` combination without
    /// finding one that is collision-free.
    #[error("could not find a collision-free hash function")]
    NoHashFunction,
    /// A mapped DLL failed to parse as a well-formed 32-bit PE image.
    #[error("malformed PE image in '{0}': {1}")]
    MalformedPe(String, String),
    /// The DOS header's `e_lfanew`/offsets ran past the end of the buffer.
    #[error("offset out of range while parsing PE headers")]
    OffsetOutOfRange,
    /// The COFF file header failed to parse at its expected offset.
    #[error("missing or malformed COFF header")]
    MissingCoffHeader,
    /// The magic number of the optional header was neither PE32 nor PE32+.
    #[error("missing or unrecognised optional header magic number")]
    MissingMagicNumber,
    /// The optional header's magic identified a 64-bit (PE32+) image, which
    /// this core does not support.
    #[error("'{0}' is a PE32+ (64-bit) image; only 32-bit DLLs are supported")]
    UnsupportedBitness(String),
    /// The optional header failed to parse at its expected offset.
    #[error("malformed optional header")]
    BadOptionalHeader,
    /// The DOS/NT "PE\\0\\0" signature was absent or corrupt.
    #[error("missing PE header signature")]
    MissingPeHeader,
    /// A table expected to hold UTF-8 bytes (an export name, a forwarder
    /// string) did not.
    #[error("invalid UTF-8 in PE string table: {0}")]
    BadString(#[from] std::string::FromUtf8Error),
    /// Propagated failure opening or mapping a DLL file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
