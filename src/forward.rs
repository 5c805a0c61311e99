//! Forward resolution: an export's RVA can point inside its own DLL's
//! export directory, in which case it is not code at all but a
//! `"DLL.Function"` (or `"DLL.#Ordinal"`) string naming where the real
//! implementation lives. Standard mode chases these chains transparently;
//! 1K mode treats any forward as a fatal error (see
//! [`crate::collector`]).

use crate::dll_image::DllCache;
use crate::error::CoreError;

/// The outcome of looking up one `(dll, function)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardResolution {
    /// The export exists but is itself a forward to `"dll.function"`
    /// (already split apart); the caller should look that pair up in turn.
    Forwarded(String, String),
    /// The export exists and names real code; no further chasing needed.
    NotForwarded,
    /// `function` is not present in `dll`'s export table at all.
    NotFound,
}

/// Maximum forward-chain depth before giving up; Windows itself bounds this
/// in practice and a real DLL set never approaches it, so a large constant
/// only guards against a deliberately malformed or cyclic export table.
const MAX_CHAIN_DEPTH: usize = 16;

/// Looks up `function` in `dll`'s export table (opening the DLL through
/// `cache` if not already open) and reports whether it is real code or a
/// forward.
pub fn resolve_once(cache: &mut DllCache, dll: &str, function: &str) -> Result<ForwardResolution, CoreError> {
    let image = cache.get_or_open(dll)?;
    let Some(ordinal) = image.ordinal_of(function) else {
        return Ok(ForwardResolution::NotFound);
    };
    let Some(rva) = image.rva_of(ordinal) else {
        return Ok(ForwardResolution::NotFound);
    };

    if !image.is_forwarded_rva(rva) {
        return Ok(ForwardResolution::NotForwarded);
    }

    let bytes = cache.bytes_of(dll);
    let forwarder = image
        .read_forwarder_string(bytes, rva)
        .ok_or_else(|| CoreError::MalformedPe(dll.to_string(), "unreadable forwarder string".to_string()))?;

    let (target_dll, target_fn) = split_forwarder(&forwarder)
        .ok_or_else(|| CoreError::MalformedPe(dll.to_string(), format!("malformed forwarder string '{forwarder}'")))?;

    Ok(ForwardResolution::Forwarded(target_dll, target_fn))
}

/// Chases a forward chain to its end, returning the final `(dll, function)`
/// that resolves to real code. Used by the standard-mode collector, which
/// (unlike 1K mode) is permitted to follow forwards transparently.
pub fn resolve_chain(cache: &mut DllCache, dll: &str, function: &str) -> Result<(String, String), CoreError> {
    let mut current_dll = dll.to_string();
    let mut current_fn = function.to_string();

    for _ in 0..MAX_CHAIN_DEPTH {
        match resolve_once(cache, &current_dll, &current_fn)? {
            ForwardResolution::NotForwarded => return Ok((current_dll, current_fn)),
            ForwardResolution::NotFound => {
                return Err(CoreError::ExportNotFound { dll: current_dll, function: current_fn });
            }
            ForwardResolution::Forwarded(next_dll, next_fn) => {
                current_dll = next_dll;
                current_fn = next_fn;
            }
        }
    }

    Err(CoreError::MalformedPe(dll.to_string(), "forward chain too deep".to_string()))
}

/// Splits a forwarder string of the form `"DLL.Function"` (the DLL's file
/// extension omitted, per the Windows convention) into its two halves, at
/// the *first* `.` (a forwarded function name is never itself
/// dotted, but this keeps the split unambiguous either way). Ordinal
/// forwards (`"DLL.#123"`) are returned with the `#123` token as the
/// function half unchanged; resolving that further is the caller's concern.
/// The DLL half is lowercased and returned bare (no `.dll` appended) —
/// DLL names are carried bare throughout this crate; [`crate::dll_image`]'s
/// resolver is responsible for finding the file on disk.
fn split_forwarder(s: &str) -> Option<(String, String)> {
    let dot = s.find('.')?;
    let (dll, func) = s.split_at(dot);
    let func = &func[1..];
    if dll.is_empty() || func.is_empty() {
        return None;
    }
    Some((dll.to_ascii_lowercase(), func.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_dll_and_function() {
        assert_eq!(
            split_forwarder("NTDLL.RtlAllocateHeap"),
            Some(("ntdll".to_string(), "RtlAllocateHeap".to_string()))
        );
    }

    #[test]
    fn rejects_forwarder_without_a_dot() {
        assert_eq!(split_forwarder("RtlAllocateHeap"), None);
    }

    #[test]
    fn rejects_empty_halves() {
        assert_eq!(split_forwarder(".Function"), None);
        assert_eq!(split_forwarder("DLL."), None);
    }
}
