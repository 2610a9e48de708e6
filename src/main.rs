//! auditcp command line interface

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use auditcp::config::{ENV_CACHE_SIZE, ENV_GROUP, ENV_OWNER};
use auditcp::ops::plan_destination;
use auditcp::{
    create_output, parse_cache_size, peek_algorithms, Algorithm, AlgorithmMask, ContentIndex,
    CopyEngine, CopyOptions, Error, ManifestWriter, Ownership, RunHeader, RunSummary,
};

/// some entries failed, or the run was interrupted
const EXIT_PARTIAL: u8 = 1;
/// nothing was attempted
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "auditcp")]
#[command(about = "audited, resumable bulk copy with replayable digest manifests")]
#[command(version)]
struct Cli {
    /// sources followed by the destination
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// compute md5 digests
    #[arg(long)]
    md5: bool,

    /// compute sha1 digests
    #[arg(long)]
    sha1: bool,

    /// compute sha256 digests
    #[arg(long)]
    sha256: bool,

    /// compute sha512 digests
    #[arg(long)]
    sha512: bool,

    /// compute every supported digest
    #[arg(long)]
    all: bool,

    /// manifest to write (default: auditcp.out, or the first free auditcp(N).out)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// manifest of an earlier run to skip already copied content (repeatable)
    #[arg(short = 'i', long = "input", value_name = "MANIFEST")]
    inputs: Vec<PathBuf>,

    /// owner of created files, by name or uid
    #[arg(long, env = ENV_OWNER)]
    owner: Option<String>,

    /// group of created files, by name or gid
    #[arg(long, env = ENV_GROUP)]
    group: Option<String>,

    /// read/write chunk size, e.g. 64K, 4M or 0x10000
    #[arg(long, env = ENV_CACHE_SIZE, value_name = "SIZE")]
    cache_size: Option<String>,

    /// worker threads (default: available cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// report every copy/skip decision
    #[arg(short, long)]
    verbose: bool,

    /// internal diagnostics
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    /// digests named on the command line
    fn requested_algorithms(&self) -> AlgorithmMask {
        if self.all {
            return AlgorithmMask::ALL;
        }
        [
            (self.md5, Algorithm::Md5),
            (self.sha1, Algorithm::Sha1),
            (self.sha256, Algorithm::Sha256),
            (self.sha512, Algorithm::Sha512),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, algorithm)| algorithm)
        .collect()
    }

    fn operands(&self) -> auditcp::Result<(Vec<PathBuf>, PathBuf)> {
        match self.paths.as_slice() {
            [] => Err(Error::Config("missing file operand".into())),
            [only] => Err(Error::Config(format!(
                "missing destination file operand after '{}'",
                only.display()
            ))),
            [sources @ .., destination] => Ok((sources.to_vec(), destination.clone())),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);
    let cancel = install_cancel_flag();

    match run(cli, cancel) {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(summary) => {
            if summary.interrupted {
                eprintln!("auditcp: interrupted");
            }
            if summary.failed > 0 {
                eprintln!("auditcp: {} of {} entries failed", summary.failed, summary.entries());
            }
            ExitCode::from(EXIT_PARTIAL)
        }
        Err(e) => {
            eprintln!("auditcp: {}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        "auditcp=debug"
    } else if verbose {
        "auditcp=info"
    } else {
        "auditcp=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// SIGINT and SIGTERM stop admission of new entries
fn install_cancel_flag() -> Arc<AtomicBool> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            warn!("cannot install handler for signal {}: {}", signal, e);
        }
    }
    flag
}

/// explicit flags win; otherwise use what every input manifest shares, else md5
fn select_algorithms(cli: &Cli) -> auditcp::Result<AlgorithmMask> {
    let requested = cli.requested_algorithms();
    if !requested.is_empty() {
        return Ok(requested);
    }
    if !cli.inputs.is_empty() {
        let common = peek_algorithms(&cli.inputs)?;
        debug!("digests detected from input manifests: {}", common);
        return Ok(common);
    }
    Ok(AlgorithmMask::EMPTY.with(Algorithm::Md5))
}

fn run(cli: Cli, cancel: Arc<AtomicBool>) -> auditcp::Result<RunSummary> {
    let (sources, destination) = cli.operands()?;
    let algorithms = select_algorithms(&cli)?;
    let chunk_size = parse_cache_size(cli.cache_size.as_deref())?;
    let owner = Ownership::resolve(cli.owner.as_deref(), cli.group.as_deref());

    let index = if cli.inputs.is_empty() {
        None
    } else {
        let key = algorithms
            .index_key()
            .ok_or_else(|| Error::Config("no digest algorithm selected".into()))?;
        Some(ContentIndex::build(key, &cli.inputs)?)
    };

    let mut options = CopyOptions {
        algorithms,
        chunk_size,
        owner,
        verbose: cli.verbose,
        ..CopyOptions::default()
    };
    if let Some(jobs) = cli.jobs {
        options.jobs = jobs;
    }
    let engine = CopyEngine::new(options, index)?.with_cancel_flag(cancel);

    // every fatal condition is checked before the manifest exists
    let placements = plan_destination(&sources, &destination)?;
    let (file, output) = create_output(cli.output.as_deref())?;
    debug!("writing manifest to {}", output.display());

    let header = RunHeader::capture(
        std::env::args_os()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
        algorithms,
        sources,
        destination,
        output.clone(),
    )
    .with_names(cli.owner.clone(), cli.group.clone());

    let mut writer = ManifestWriter::new(file, output);
    writer.write_header(&header)?;
    engine.run_placements(&placements, &mut writer)
}
