use std::os::unix::fs::{FileExt, MetadataExt};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rpull",
    version,
    about = "Bring a file up to date with a peer copy, reusing unchanged blocks",
    long_about = "`rpull` reconstructs TARGET from PEER block by block.

Blocks that are identical in both files are copied locally from TARGET, the rest are pulled from
PEER. The new version is assembled in a temp file next to TARGET and renamed into place only once
every block has been written. On failure TARGET is left untouched.

EXAMPLE:
    # Update a local file from a mounted peer copy
    rpull /mnt/peer/disk.img /srv/disk.img --summary"
)]
struct Args {
    // Sync options
    /// Repository the file belongs to, used when reporting failures
    #[arg(long, default_value = "default", value_name = "NAME", help_heading = "Sync options")]
    repo: String,

    /// Block size (bytes)
    #[arg(
        long,
        default_value_t = common::config::DEFAULT_BLOCK_SIZE,
        value_name = "SIZE",
        help_heading = "Sync options"
    )]
    block_size: u64,

    // Performance
    /// Maximum number of concurrent local block copies
    #[arg(
        long,
        default_value_t = common::config::DEFAULT_COPIERS,
        value_name = "N",
        help_heading = "Performance"
    )]
    copiers: usize,

    /// Maximum number of concurrent block pulls
    #[arg(
        long,
        default_value_t = common::config::DEFAULT_PULLERS,
        value_name = "N",
        help_heading = "Performance"
    )]
    pullers: usize,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Up to date copy of the file
    #[arg()]
    peer: std::path::PathBuf,

    /// File to bring up to date, created if missing
    #[arg()]
    target: std::path::PathBuf,
}

/// Serves blocks straight from the peer's copy of the file.
#[derive(Debug)]
struct PeerFile {
    path: std::path::PathBuf,
    file: std::fs::File,
}

impl puller::BlockSource for PeerFile {
    fn fetch(&self, _file: &puller::FileInfo, block: &puller::BlockInfo) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; block.size as usize];
        self.file
            .read_exact_at(&mut buf, block.offset)
            .with_context(|| format!("failed reading {:?} at offset {}", &self.path, block.offset))?;
        Ok(buf)
    }
}

fn read_block(file: &std::fs::File, block: &puller::BlockInfo) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; block.size as usize];
    file.read_exact_at(&mut buf, block.offset)?;
    Ok(buf)
}

/// Splits the peer's blocks into ones the target already has at the same offset and ones that
/// must be pulled.
fn plan(
    peer: &std::fs::File,
    target: &std::path::Path,
    info: &puller::FileInfo,
) -> Result<(Vec<puller::BlockInfo>, Vec<puller::BlockInfo>)> {
    let local = match std::fs::File::open(target) {
        Ok(file) => Some(file),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
        Err(error) => return Err(error).with_context(|| format!("failed opening {target:?}")),
    };
    let local_size = match &local {
        Some(file) => file
            .metadata()
            .with_context(|| format!("failed reading metadata of {target:?}"))?
            .len(),
        None => 0,
    };
    let mut copy = vec![];
    let mut pull = vec![];
    for block in &info.blocks {
        let reusable = match &local {
            Some(file) if block.end() <= local_size => {
                let ours = read_block(file, block)
                    .with_context(|| format!("failed reading {target:?} at {}", block.offset))?;
                let theirs = read_block(peer, block)
                    .with_context(|| format!("failed reading peer at {}", block.offset))?;
                ours == theirs
            }
            _ => false,
        };
        if reusable {
            copy.push(*block);
        } else {
            pull.push(*block);
        }
    }
    tracing::debug!(
        "{:?}: {} blocks to copy, {} to pull",
        target,
        copy.len(),
        pull.len()
    );
    Ok((copy, pull))
}

#[instrument]
async fn async_main(args: Args) -> Result<Arc<common::progress::Progress>> {
    if puller::file::is_temp_name(&args.target) {
        return Err(anyhow!(
            "target {:?} is a temp file of an in-flight pull",
            &args.target
        ));
    }
    let block_size = u32::try_from(args.block_size)
        .map_err(|_| anyhow!("block size {} is too large", args.block_size))?;
    let config = common::PullerConfig {
        copiers: args.copiers,
        pullers: args.pullers,
        block_size: args.block_size,
        ..Default::default()
    };
    let progress = Arc::new(common::progress::Progress::new());
    let puller = puller::Puller::new(config, progress.clone())?;
    let peer_path = args.peer.clone();
    let target = args.target.clone();
    let (peer, job) = tokio::task::spawn_blocking(move || -> Result<_> {
        let file = std::fs::File::open(&peer_path)
            .with_context(|| format!("failed opening peer file {peer_path:?}"))?;
        let metadata = file
            .metadata()
            .with_context(|| format!("failed reading metadata of {peer_path:?}"))?;
        if !metadata.is_file() {
            return Err(anyhow!("peer {peer_path:?} is not a regular file"));
        }
        let name = target
            .file_name()
            .ok_or_else(|| anyhow!("target {target:?} has no file name"))?
            .to_string_lossy()
            .into_owned();
        let info = puller::FileInfo::with_uniform_blocks(
            name,
            metadata.len(),
            metadata.mode(),
            metadata
                .modified()
                .with_context(|| format!("failed reading mtime of {peer_path:?}"))?,
            block_size,
        );
        let (copy, pull) = plan(&file, &target, &info)?;
        let job = puller::FileJob {
            repo: args.repo,
            file: info,
            real_name: target,
            copy,
            pull,
        };
        Ok((
            PeerFile {
                path: peer_path,
                file,
            },
            job,
        ))
    })
    .await??;
    let summary = puller
        .pull_file(job, Arc::new(peer))
        .await
        .with_context(|| format!("failed updating {:?}", &args.target))?;
    tracing::debug!("{:?} updated:\n{}", &args.target, summary);
    Ok(progress)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
