//! Command line definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_blockstore::{ChunkKind, ContentHash, VolumeConfig};

use crate::{config::parse_volume, logging::LogArgs};

/// strata - content-addressable chunk store
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Logging configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Store location and index.
    #[command(flatten)]
    pub(crate) store: StoreArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Where the store lives.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Store")]
pub(crate) struct StoreArgs {
    /// TOML configuration file.
    #[arg(long, short = 'c', env = "STRATA_CONFIG", value_name = "FILE", global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Storage volume as PATH:CAPACITY (e.g. /srv/a:500G). Repeatable;
    /// replaces the configured volumes.
    #[arg(long = "volume", value_name = "PATH:CAPACITY", value_parser = parse_volume, global = true)]
    pub(crate) volumes: Vec<VolumeConfig>,

    /// Hash index database file.
    #[arg(long = "index", value_name = "FILE", global = true)]
    pub(crate) index: Option<PathBuf>,

    /// Keep the hash index in memory (rebuilt from disk on every run).
    #[arg(long = "index.memory", global = true)]
    pub(crate) memory_index: bool,
}

/// A chunk identity on the command line.
#[derive(Debug, Args, Clone)]
pub(crate) struct ChunkArgs {
    /// Content hash (64 hex characters).
    pub(crate) hash: ContentHash,

    /// Chunk kind.
    #[arg(long, short = 'k', default_value = "data")]
    pub(crate) kind: ChunkKind,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Store a chunk read from a file, or stdin with `-`.
    Put {
        /// Input file.
        file: PathBuf,
        /// Chunk kind.
        #[arg(long, short = 'k', default_value = "data")]
        kind: ChunkKind,
        /// Hash to store meta-data under. Data chunks are addressed by
        /// their content digest.
        #[arg(long)]
        hash: Option<ContentHash>,
    },
    /// Write a chunk to stdout or a file.
    Get {
        #[command(flatten)]
        chunk: ChunkArgs,
        /// Output file.
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Exit non-zero if a chunk is absent.
    Has {
        #[command(flatten)]
        chunk: ChunkArgs,
    },
    /// Delete a chunk.
    Delete {
        #[command(flatten)]
        chunk: ChunkArgs,
    },
    /// List stored hashes in insertion order.
    List {
        /// Chunk kind.
        #[arg(long, short = 'k', default_value = "data")]
        kind: ChunkKind,
        /// Entries to skip.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Entries to print.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show the container and slot holding a chunk.
    Locate {
        #[command(flatten)]
        chunk: ChunkArgs,
    },
    /// Salvage the container holding a hash, or a container file.
    Repair(RepairArgs),
    /// Move containers from full volumes to empty ones.
    Balance {
        /// Maximum containers to move.
        #[arg(long, default_value_t = 1)]
        moves: usize,
    },
    /// Show volume usage.
    Volumes,
    /// Rebuild the hash index from the containers on disk.
    Reindex,
    /// Show cache and repair counters.
    Stats,
    /// Write the effective configuration to a file.
    InitConfig {
        /// Destination (defaults to `--config`).
        path: Option<PathBuf>,
    },
}

/// Repair arguments.
#[derive(Debug, Args, Clone)]
pub(crate) struct RepairArgs {
    #[command(flatten)]
    pub(crate) target: RepairTargetArgs,

    /// Seconds to wait for queued redownloads.
    #[arg(long, default_value_t = 30)]
    pub(crate) wait: u64,
}

/// Exactly one of a hash or a container file.
#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub(crate) struct RepairTargetArgs {
    /// Repair the container a hash routes to.
    #[arg(long)]
    pub(crate) hash: Option<ContentHash>,

    /// Repair a container file.
    #[arg(long, value_name = "FILE")]
    pub(crate) container: Option<PathBuf>,
}
