//! Thin demonstration CLI over the import-resolution core: reads a JSON list
//! of `{hunk, dll, function}` import records, resolves them in the chosen
//! mode, and prints a summary of the hunks and symbols that would be handed
//! back to the linker. Exercises the library for manual testing and golden-
//! file regeneration; it is not part of the core's public contract.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crinkler_import_core::hunk::{Hunk, HunkList};
use crinkler_import_core::{resolve_1k, resolve_standard};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Standard,
    #[value(name = "1k")]
    OneK,
}

/// Resolve a set of DLL imports the way the linker's runtime stub would.
#[derive(Parser, Debug)]
#[command(name = "resolve-imports", version, about)]
struct Args {
    /// Path to a JSON file: `[{"hunk": "h1", "dll": "kernel32", "function": "ExitProcess"}, ...]`
    input: PathBuf,

    /// Resolution strategy.
    #[arg(long, value_enum, default_value = "standard")]
    mode: Mode,

    /// DLL name to range-compress contiguous ordinals for (standard mode only, repeatable).
    #[arg(long = "range-dll")]
    range_dll: Vec<String>,

    /// Enable verbose (debug-level) diagnostics.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize)]
struct ImportSpec {
    hunk: String,
    dll: String,
    function: String,
}

#[derive(Serialize)]
struct SymbolSummary {
    name: String,
    value: i64,
    relocatable: bool,
}

#[derive(Serialize)]
struct HunkSummary {
    name: String,
    virtual_size: usize,
    symbols: Vec<SymbolSummary>,
}

#[derive(Serialize)]
struct Summary {
    hunks: Vec<HunkSummary>,
    enable_range_import: Option<bool>,
    hash_bits: Option<u8>,
    max_dll_name_length: Option<usize>,
    family: Option<u32>,
}

fn summarize(hunks: &HunkList, extra: Option<&Hunk>) -> Vec<HunkSummary> {
    let mut out: Vec<HunkSummary> = hunks
        .iter()
        .map(|h| HunkSummary {
            name: h.name.clone(),
            virtual_size: h.virtual_size,
            symbols: h
                .symbols
                .iter()
                .map(|s| SymbolSummary {
                    name: s.name.clone(),
                    value: s.value,
                    relocatable: s.flags.contains(crinkler_import_core::hunk::SymbolFlags::IS_RELOCATEABLE),
                })
                .collect(),
        })
        .collect();
    if let Some(h) = extra {
        out.push(HunkSummary {
            name: h.name.clone(),
            virtual_size: h.virtual_size,
            symbols: Vec::new(),
        });
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let specs: Vec<ImportSpec> = serde_json::from_str(&std::fs::read_to_string(&args.input)?)?;
    let mut hunks = HunkList::new();
    for spec in specs {
        hunks.push_back(Hunk::new_import(spec.hunk, spec.dll, spec.function));
    }

    let summary = match args.mode {
        Mode::Standard => {
            let result = resolve_standard(&hunks, &args.range_dll)?;
            Summary {
                hunks: summarize(&result.hunks, Some(&result.hash_hunk)),
                enable_range_import: Some(result.enable_range_import),
                hash_bits: None,
                max_dll_name_length: None,
                family: None,
            }
        }
        Mode::OneK => {
            let result = resolve_1k(&hunks)?;
            Summary {
                hunks: summarize(&result.hunks, None),
                enable_range_import: None,
                hash_bits: Some(result.hash_bits),
                max_dll_name_length: Some(result.max_dll_name_length),
                family: Some(result.family),
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
