use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scanmoor::analyzer::AnalyzerType;
use scanmoor::artifact::{Artifact, ImageArtifact, LocalArtifact};
use scanmoor::cache::FsCache;
use scanmoor::image::ArchiveImage;
use scanmoor::options::ArtifactOptions;
use scanmoor::result::vex::{OpenVex, VexDocument};
use scanmoor::result::{filter_report, ignore::DEFAULT_IGNORE_FILE, FilterOptions};
use scanmoor::scan::Scanner;
use scanmoor::types::Severity;
use scanmoor::vulnsrc::{default_db_path, MemoryVulnSource, SqliteVulnSource, VulnSource};
use scanmoor::CancelToken;

#[derive(Parser)]
#[command(name = "scanmoor")]
#[command(about = "Layer-aware vulnerability and misconfiguration scanner", long_about = None)]
struct Cli {
    /// Cache directory (default: ~/.scanmoor/cache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScanFlags {
    /// Severities to report (repeatable), e.g. --severity HIGH
    #[arg(long = "severity")]
    severities: Vec<String>,

    /// Drop findings without a fixed version
    #[arg(long)]
    ignore_unfixed: bool,

    /// Report passed and excepted misconfiguration checks too
    #[arg(long)]
    include_non_failures: bool,

    /// Ignore file path
    #[arg(long, default_value = DEFAULT_IGNORE_FILE)]
    ignorefile: PathBuf,

    /// Ignore-policy file (JSON expression)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// VEX document path
    #[arg(long)]
    vex: Option<PathBuf>,

    /// Analyzers to disable (repeatable), e.g. --disable-analyzer secret
    #[arg(long = "disable-analyzer")]
    disabled_analyzers: Vec<String>,

    /// Files to skip (repeatable)
    #[arg(long = "skip-files")]
    skip_files: Vec<String>,

    /// Directories to skip (repeatable)
    #[arg(long = "skip-dirs")]
    skip_dirs: Vec<String>,

    /// Per-layer analyzer parallelism
    #[arg(long, default_value_t = 5)]
    parallelism: usize,

    /// Sequential mode: one layer, one file at a time
    #[arg(long)]
    slow: bool,

    /// Skip analyses that would reach the network
    #[arg(long)]
    offline: bool,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a container image from a `docker save` tarball
    Image {
        /// Path to the image tarball
        tar: PathBuf,
        #[command(flatten)]
        flags: ScanFlags,
    },
    /// Scan a filesystem tree
    Fs {
        /// Root directory
        dir: PathBuf,
        #[command(flatten)]
        flags: ScanFlags,
    },
    /// Remove all cached analysis results
    Clean,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("SCANMOOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cache_dir = cli.cache_dir.unwrap_or_else(default_cache_dir);
    let cache = Arc::new(FsCache::new(&cache_dir).context("open cache")?);

    match cli.command {
        Commands::Image { tar, flags } => {
            let options = artifact_options(&flags)?;
            let image = ArchiveImage::open(&tar)
                .with_context(|| format!("open image archive {}", tar.display()))?;
            let artifact = ImageArtifact::new(Box::new(image), cache.clone(), options)?;
            run_scan(&artifact, cache, &flags)
        }
        Commands::Fs { dir, flags } => {
            let options = artifact_options(&flags)?;
            let artifact = LocalArtifact::new(&dir, cache.clone(), options)?;
            run_scan(&artifact, cache, &flags)
        }
        Commands::Clean => {
            cache.clear()?;
            eprintln!("cache cleared: {}", cache_dir.display());
            Ok(())
        }
    }
}

fn run_scan(artifact: &dyn Artifact, cache: Arc<FsCache>, flags: &ScanFlags) -> anyhow::Result<()> {
    let source = open_vuln_source()?;
    let scanner = Scanner::new(cache, source);
    let ctx = CancelToken::new();

    let mut report = scanner.scan(&ctx, artifact)?;
    filter_report(&mut report, &filter_options(flags)?)?;

    let json = serde_json::to_string_pretty(&report)?;
    match &flags.output {
        Some(path) => std::fs::write(path, &json)
            .with_context(|| format!("write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn artifact_options(flags: &ScanFlags) -> anyhow::Result<ArtifactOptions> {
    let disabled_analyzers = flags
        .disabled_analyzers
        .iter()
        .map(|s| s.parse::<AnalyzerType>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ArtifactOptions {
        skip_files: flags.skip_files.clone(),
        skip_dirs: flags.skip_dirs.clone(),
        disabled_analyzers,
        parallelism: flags.parallelism,
        slow: flags.slow,
        offline: flags.offline,
        ..Default::default()
    })
}

fn filter_options(flags: &ScanFlags) -> anyhow::Result<FilterOptions> {
    let severities = if flags.severities.is_empty() {
        Severity::all()
    } else {
        flags
            .severities
            .iter()
            .map(|s| {
                Severity::parse(s).with_context(|| format!("unknown severity `{s}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };
    let vex = match &flags.vex {
        Some(path) => Some(Box::new(OpenVex::load(path)?) as Box<dyn VexDocument>),
        None => None,
    };
    Ok(FilterOptions {
        severities,
        ignore_unfixed: flags.ignore_unfixed,
        include_non_failures: flags.include_non_failures,
        ignore_file: flags.ignorefile.clone(),
        policy_file: flags.policy.clone(),
        ignored_licenses: Vec::new(),
        vex,
    })
}

fn open_vuln_source() -> anyhow::Result<Arc<dyn VulnSource>> {
    let path = default_db_path();
    if path.exists() {
        Ok(Arc::new(SqliteVulnSource::open(&path)?))
    } else {
        tracing::warn!(path = %path.display(), "advisory DB not found, detection will be empty");
        Ok(Arc::new(MemoryVulnSource::new()))
    }
}

fn default_cache_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".scanmoor").join("cache")
}
