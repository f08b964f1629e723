//! Implementation of the `m8dist cache` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use m8dist_lib::compile::{CacheEntry, DepsCache};

use crate::output::{
  OutputFormat, format_bytes, print_info, print_json, print_stat, print_success, print_warning, truncate_hash,
};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// List dependency cache entries
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove every dependency cache entry
  Clean {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Debug, Serialize)]
struct ListOutput<'a> {
  root: &'a std::path::Path,
  entries: &'a [CacheEntry],
  total_bytes: u64,
}

#[derive(Debug, Serialize)]
struct CleanOutput<'a> {
  root: &'a std::path::Path,
  removed: usize,
}

pub fn cmd_cache(command: CacheCommand) -> Result<()> {
  let cache = DepsCache::default();
  match command {
    CacheCommand::List { output } => cmd_list(&cache, output),
    CacheCommand::Clean { output } => cmd_clean(&cache, output),
  }
}

fn cmd_list(cache: &DepsCache, output: OutputFormat) -> Result<()> {
  let entries = cache
    .entries()
    .with_context(|| format!("Failed to read cache {}", cache.root().display()))?;
  let total_bytes: u64 = entries.iter().map(|e| e.size).sum();

  if output.is_json() {
    return print_json(&ListOutput {
      root: cache.root(),
      entries: &entries,
      total_bytes,
    });
  }

  if entries.is_empty() {
    print_info("Dependency cache is empty");
    return Ok(());
  }

  for entry in &entries {
    let label = truncate_hash(&entry.hash);
    if entry.complete {
      print_stat(label, &format_bytes(entry.size));
    } else {
      print_warning(&format!("{} is incomplete and will be rebuilt", label));
    }
  }
  println!();
  print_stat("Entries", &entries.len().to_string());
  print_stat("Total", &format_bytes(total_bytes));
  Ok(())
}

fn cmd_clean(cache: &DepsCache, output: OutputFormat) -> Result<()> {
  let removed = cache
    .clean()
    .with_context(|| format!("Failed to clean cache {}", cache.root().display()))?;

  if output.is_json() {
    return print_json(&CleanOutput {
      root: cache.root(),
      removed,
    });
  }

  print_success(&format!("Removed {} cache entries", removed));
  Ok(())
}
