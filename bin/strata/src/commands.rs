//! Subcommand execution.

use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};

use eyre::{Result, WrapErr, bail, eyre};
use serde::Serialize;
use strata_blockstore::{
    BlockStore, CacheStats, ChunkKind, ContentHash, RepairStats, RepairTarget, VolumeInfo,
};
use strata_storage::{HashIndex, MemoryHashIndex};
use strata_storage_redb::RedbHashIndex;
use tracing::{debug, info};

use crate::{
    cli::{Cli, Command, RepairArgs},
    config::StrataConfig,
};

#[derive(Serialize)]
struct StatsReport {
    data: CacheStats,
    metadata: CacheStats,
    repair: RepairStats,
}

#[derive(Serialize)]
struct VolumeReport {
    volume: Vec<VolumeInfo>,
}

/// Run the parsed command line.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let Cli { store: args, command, .. } = cli;
    let config_path = args.config.as_deref();
    let mut config = StrataConfig::load(config_path)?;
    config.apply_args(&args.volumes, args.index.as_deref(), args.memory_index);

    if let Command::InitConfig { path } = &command {
        let path = path
            .as_deref()
            .or(config_path)
            .ok_or_else(|| eyre!("no destination: pass a path or --config"))?;
        config.save(path)?;
        println!("{}", path.display());
        return Ok(());
    }

    let store = open_store(&config, config_path)?;
    execute(&store, command)
}

fn open_store(config: &StrataConfig, config_path: Option<&Path>) -> Result<BlockStore> {
    let (index, rebuild): (Arc<dyn HashIndex>, bool) = if config.index.memory {
        (Arc::new(MemoryHashIndex::new()), true)
    } else {
        let path = config.index_path(config_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let index = RedbHashIndex::open(&path)
            .wrap_err_with(|| format!("failed to open hash index: {}", path.display()))?;
        debug!(path = %path.display(), "Opened hash index");
        (Arc::new(index), false)
    };

    let store = BlockStore::open(config.store.clone(), index)?;
    if rebuild {
        let added = store.reindex()?;
        info!(added, "Populated in-memory index");
    }
    Ok(store)
}

fn execute(store: &BlockStore, command: Command) -> Result<()> {
    match command {
        Command::Put { file, kind, hash } => {
            let data = read_input(&file)?;
            let hash = chunk_hash(kind, hash, &data)?;
            store.put(&hash, kind, &data)?;
            println!("{hash}");
        }
        Command::Get { chunk, out } => {
            let data = store.get(&chunk.hash, chunk.kind)?;
            match out {
                Some(path) => fs::write(&path, &data)
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?,
                None => io::stdout().lock().write_all(&data)?,
            }
        }
        Command::Has { chunk } => {
            if !store.has(&chunk.hash, chunk.kind) {
                bail!("{} {} not found", chunk.kind, chunk.hash);
            }
            println!("present");
        }
        Command::Delete { chunk } => {
            store.delete(&chunk.hash, chunk.kind)?;
        }
        Command::List { kind, offset, limit } => {
            let mut stdout = io::stdout().lock();
            for hash in store.enumerate(kind, offset, limit)? {
                writeln!(stdout, "{hash}")?;
            }
        }
        Command::Locate { chunk } => match store.locate(&chunk.hash, chunk.kind)? {
            Some(location) => println!(
                "{} slot={} offset={} size={}",
                location.container.display(),
                location.slot,
                location.offset,
                location.size
            ),
            None => bail!("{} {} not found", chunk.kind, chunk.hash),
        },
        Command::Repair(args) => repair(store, args)?,
        Command::Balance { moves } => {
            let mut moved = 0;
            while moved < moves && store.balance_once() {
                moved += 1;
            }
            println!("moved {moved} container(s)");
        }
        Command::Volumes => {
            let report = VolumeReport {
                volume: store.volumes(),
            };
            print!("{}", toml::to_string_pretty(&report)?);
        }
        Command::Reindex => {
            let added = store.reindex()?;
            println!(
                "added {added}; data={} metadata={}",
                store.count(ChunkKind::Data)?,
                store.count(ChunkKind::MetaData)?
            );
        }
        Command::Stats => {
            let report = StatsReport {
                data: store.cache_stats(ChunkKind::Data),
                metadata: store.cache_stats(ChunkKind::MetaData),
                repair: store.repair_stats(),
            };
            print!("{}", toml::to_string_pretty(&report)?);
        }
        Command::InitConfig { .. } => bail!("init-config runs without opening the store"),
    }
    Ok(())
}

fn repair(store: &BlockStore, args: RepairArgs) -> Result<()> {
    let target = match (args.target.hash, args.target.container) {
        (Some(hash), _) => RepairTarget::Hash(hash),
        (None, Some(path)) => RepairTarget::Container(path),
        (None, None) => bail!("nothing to repair"),
    };
    let settled = store.repair(target, Duration::from_secs(args.wait))?;
    if !settled {
        eprintln!("redownloads still pending after {}s", args.wait);
    }
    print!("{}", toml::to_string_pretty(&store.repair_stats())?);
    Ok(())
}

fn read_input(file: &Path) -> Result<Vec<u8>> {
    if file.as_os_str() == "-" {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data)?;
        return Ok(data);
    }
    fs::read(file).wrap_err_with(|| format!("failed to read {}", file.display()))
}

/// Data chunks are named by their digest; meta-data needs an explicit hash.
fn chunk_hash(kind: ChunkKind, given: Option<ContentHash>, data: &[u8]) -> Result<ContentHash> {
    match (kind, given) {
        (ChunkKind::Data, None) => Ok(ContentHash::digest(data)),
        (ChunkKind::Data, Some(hash)) => {
            let digest = ContentHash::digest(data);
            if digest != hash {
                bail!("data hashes to {digest}, not {hash}");
            }
            Ok(hash)
        }
        (ChunkKind::MetaData, Some(hash)) => Ok(hash),
        (ChunkKind::MetaData, None) => Err(eyre!("meta-data chunks need --hash")),
    }
}
