mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use m8dist_lib::platform::TargetPlatform;

use cmd::{
  CacheCommand, cmd_build, cmd_cache, cmd_info, cmd_install, cmd_release, cmd_resolve, cmd_shell, cmd_verify,
};
use output::OutputFormat;

/// m8dist - Hermetic build-and-release pipeline for remote-m8
#[derive(Parser)]
#[command(name = "m8dist")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v for info, -vv for debug)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Path to the config file (default: $M8DIST_CONFIG or ./m8dist.toml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show host platform and pipeline locations
  Info {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print the native dependency set of a platform
  Resolve {
    /// Target platform, e.g. linux-x86_64 (default: host)
    #[arg(short, long)]
    platform: Option<TargetPlatform>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Enter the build environment of a platform
  Shell {
    /// Target platform (default: host)
    #[arg(short, long)]
    platform: Option<TargetPlatform>,

    /// Print `export` lines instead of spawning $SHELL
    #[arg(long)]
    print: bool,
  },

  /// Build and package the product without publishing
  Build {
    /// Platforms to build (default: the configured matrix)
    #[arg(short, long = "platform")]
    platforms: Vec<TargetPlatform>,

    /// Version used in artifact names
    #[arg(long)]
    version: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Build the whole matrix for a release tag and publish it
  Release {
    /// Pushed reference, e.g. refs/tags/v1.2.3
    #[arg(long = "ref")]
    reference: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Check a release archive against its checksum file
  Verify {
    /// Path to the .tar.gz archive
    archive: PathBuf,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Verify a release archive and install its binary
  Install {
    /// Path to the .tar.gz archive
    archive: PathBuf,

    /// Installation prefix; the binary goes to <prefix>/bin (default: ~/.local)
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Inspect or drop dependency cache entries
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

fn init_tracing(verbose: u8) {
  let filter = match verbose {
    0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    1 => EnvFilter::new("info"),
    _ => EnvFilter::new("debug"),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let config = cli.config.as_deref();
  match cli.command {
    Commands::Info { output } => cmd_info(config, output),
    Commands::Resolve { platform, output } => cmd_resolve(platform, output),
    Commands::Shell { platform, print } => cmd_shell(config, platform, print),
    Commands::Build {
      platforms,
      version,
      output,
    } => cmd_build(config, platforms, &version, output),
    Commands::Release { reference, output } => cmd_release(config, &reference, output),
    Commands::Verify { archive, output } => cmd_verify(&archive, output),
    Commands::Install {
      archive,
      prefix,
      output,
    } => cmd_install(&archive, prefix, output),
    Commands::Cache { command } => cmd_cache(command),
  }
}
