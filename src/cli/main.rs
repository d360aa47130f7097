//! bgstrip command-line tool
//!
//! Removes backgrounds from image files and directories and manages the model
//! cache.

use super::config::CliConfigBuilder;
use super::interactive::{self, MenuChoice};
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::PngCompression,
    download::{verify_model_file, ModelDownloader},
    models::{ModelKind, ModelSource, ModelSpec},
    processor::BackgroundRemovalProcessor,
    services::{
        discovery::{self, DEFAULT_OUTPUT_SUFFIX},
        BatchStats, ConsoleProgressReporter, ImageIOService,
    },
    tracing_config::{self, spans},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::Instrument;

/// Default output directory for directory inputs
const DEFAULT_BATCH_OUTPUT_DIR: &str = "processed";

/// Remove image backgrounds with U2-Net family models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgstrip")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Image files or directories ("-" reads stdin). Without inputs an interactive menu is shown
    #[arg(value_name = "INPUT")]
    pub input: Vec<String>,

    /// Output file (single input, "-" for stdout) or directory (batch)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Suffix appended to output file names
    #[arg(long, default_value = DEFAULT_OUTPUT_SUFFIX)]
    pub suffix: String,

    /// Model name (u2net, u2netp, u2net_human_seg, silueta, isnet-general-use) or path to an .onnx file
    #[arg(short, long)]
    pub model: Option<String>,

    /// Override the model input size (square)
    #[arg(long, value_name = "PIXELS")]
    pub input_size: Option<u32>,

    /// Execution provider as backend:provider (onnx:auto, onnx:cpu, onnx:cuda, onnx:coreml, tract:cpu)
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Use the raw mask as alpha instead of alpha matting
    #[arg(long)]
    pub no_alpha_matting: bool,

    /// Mask value above which pixels are definite foreground
    #[arg(long, default_value_t = 240)]
    pub fg_threshold: u8,

    /// Mask value below which pixels are definite background
    #[arg(long, default_value_t = 10)]
    pub bg_threshold: u8,

    /// Erosion size for the matting trimap
    #[arg(long, default_value_t = 10)]
    pub erode_size: u32,

    /// Smooth the mask (morphological opening, blur, threshold) before cutting out
    #[arg(long)]
    pub post_process_mask: bool,

    /// Downsample results so the longest side is at most this many pixels
    #[arg(long, value_name = "PIXELS")]
    pub max_size: Option<u32>,

    /// PNG compression: fast, default or best
    #[arg(long, default_value = "best", value_parser = parse_compression)]
    pub compression: PngCompression,

    /// Only process the top level of input directories
    #[arg(long)]
    pub no_recursive: bool,

    /// File name pattern for directory inputs (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Log per-file timings and show a progress bar even for single files
    #[arg(long)]
    pub progress: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List built-in models and their cache status, then exit
    #[arg(long)]
    pub list_models: bool,

    /// Download the model selected with --model (default u2net), then exit
    #[arg(long)]
    pub only_download: bool,

    /// Fail instead of downloading a model that is not cached
    #[arg(long, conflicts_with = "only_download")]
    pub no_download: bool,

    /// Remove cached models (only the one given with --model if set), then exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Print the model cache directory, then exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Use a custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Show backend and execution provider availability, then exit
    #[arg(long)]
    pub show_providers: bool,
}

impl Cli {
    fn is_maintenance(&self) -> bool {
        self.list_models
            || self.only_download
            || self.clear_cache
            || self.show_cache_dir
            || self.show_providers
    }

    fn cache(&self) -> Result<ModelCache> {
        ModelCache::from_override(self.cache_dir.as_deref()).context("Failed to open model cache")
    }
}

fn parse_compression(value: &str) -> std::result::Result<PngCompression, String> {
    PngCompression::parse(value).map_err(|e| e.to_string())
}

/// Where one processed image goes
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputTarget {
    File(PathBuf),
    Stdout,
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    File { input: PathBuf, output: OutputTarget },
    Stdin { output: OutputTarget },
}

/// Inputs resolved into jobs, plus failures found while resolving
#[derive(Debug, Default)]
struct Plan {
    jobs: Vec<Job>,
    missing: Vec<PathBuf>,
    skipped: Vec<PathBuf>,
    /// Output files claimed by more than one job
    duplicate_outputs: Vec<PathBuf>,
}

pub async fn main() -> Result<ExitCode> {
    let mut cli = Cli::parse();

    let session_id = uuid::Uuid::new_v4().to_string();
    let _tracing_guard = tracing_config::init_cli_tracing(cli.verbose, &session_id)
        .context("Failed to initialize tracing")?;

    if cli.is_maintenance() {
        return run_maintenance(&cli).await.map(|()| ExitCode::SUCCESS);
    }

    if cli.input.is_empty() {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        match interactive::prompt(&mut stdin.lock(), &mut stdout)? {
            MenuChoice::Quit => return Ok(ExitCode::SUCCESS),
            MenuChoice::SingleImage { input, output } | MenuChoice::Directory { input, output } => {
                cli.input = vec![input];
                cli.output = output;
            },
        }
    }

    let config = CliConfigBuilder::from_cli(&cli)?;

    let plan = plan_jobs(&cli)?;
    for path in &plan.skipped {
        warn!("Skipping unsupported file: {}", path.display());
    }
    for path in &plan.duplicate_outputs {
        warn!(
            "Several inputs map to {}; later results overwrite earlier ones",
            path.display()
        );
    }

    let mut stats = BatchStats::new();
    for _ in &plan.skipped {
        stats.record_skipped();
    }
    for path in &plan.missing {
        error!("Input does not exist: {}", path.display());
        stats.record_failure(path, "input does not exist");
    }

    if plan.jobs.is_empty() {
        if stats.has_failures() {
            return Ok(ExitCode::FAILURE);
        }
        warn!("No supported images found in the provided inputs");
        return Ok(ExitCode::SUCCESS);
    }

    ensure_model(&cli, &config.model_spec).await?;

    let provider =
        ExecutionProviderManager::provider_to_string(config.backend_type, config.execution_provider);
    let session = spans::session(&session_id, &config.model_spec.source.display_name(), &provider);
    info!(
        "Removing backgrounds with {} on {}",
        config.model_spec.source.display_name(),
        provider
    );

    let mut processor = BackgroundRemovalProcessor::new(config)
        .context("Failed to create background removal processor")?
        .with_progress_reporter(Box::new(ConsoleProgressReporter::new(cli.verbose > 0)));
    if let Some(cache_dir) = &cli.cache_dir {
        processor = processor.with_cache_dir(cache_dir);
    }
    session
        .in_scope(|| processor.initialize())
        .context("Failed to initialize the segmentation model")?;

    run_jobs(&cli, &mut processor, &plan.jobs, &mut stats)
        .instrument(spans::batch_processing(plan.jobs.len()))
        .instrument(session)
        .await;

    if plan.jobs.len() + plan.missing.len() + plan.skipped.len() > 1 || stats.has_failures() {
        info!("Done: {}", stats.summary());
        for (path, reason) in &stats.failures {
            error!("  {}: {}", path.display(), reason);
        }
    }

    Ok(if stats.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Resolve command-line inputs into jobs with their output targets
fn plan_jobs(cli: &Cli) -> Result<Plan> {
    let mut plan = Plan::default();
    let output_is_stdout = cli.output.as_deref() == Some("-");
    let mut explicit_files = Vec::new();
    let mut directory_jobs = Vec::new();

    for input in &cli.input {
        if input == "-" {
            let output = match &cli.output {
                Some(path) if path != "-" => OutputTarget::File(PathBuf::from(path)),
                _ => OutputTarget::Stdout,
            };
            plan.jobs.push(Job::Stdin { output });
            continue;
        }

        let path = PathBuf::from(input);
        if path.is_dir() {
            let images = discovery::find_images(&path, !cli.no_recursive, cli.pattern.as_deref())
                .with_context(|| format!("Failed to scan {}", path.display()))?;
            info!("Found {} image(s) in {}", images.len(), path.display());
            directory_jobs.extend(images.into_iter().map(|image| (path.clone(), image)));
        } else if path.is_file() {
            if ImageIOService::is_supported_format(&path) {
                explicit_files.push(path);
            } else {
                plan.skipped.push(path);
            }
        } else {
            plan.missing.push(path);
        }
    }

    let total = plan.jobs.len() + explicit_files.len() + directory_jobs.len();
    anyhow::ensure!(
        !(output_is_stdout && total > 1),
        "Cannot write to stdout (-) when processing multiple images"
    );
    anyhow::ensure!(
        plan.jobs.len() <= 1,
        "Standard input (-) can only be given once"
    );

    let single_file = total == 1 && explicit_files.len() == 1;
    for input in explicit_files {
        let output = match &cli.output {
            Some(target) if target == "-" => OutputTarget::Stdout,
            Some(target) if single_file => OutputTarget::File(PathBuf::from(target)),
            Some(dir) => OutputTarget::File(discovery::output_path_in_dir(
                &input,
                input.parent().unwrap_or_else(|| Path::new("")),
                Path::new(dir),
                &cli.suffix,
            )),
            None => OutputTarget::File(discovery::output_path_for_file(&input, &cli.suffix)),
        };
        plan.jobs.push(Job::File { input, output });
    }

    let batch_dir = cli
        .output
        .as_deref()
        .filter(|o| *o != "-")
        .map_or_else(|| PathBuf::from(DEFAULT_BATCH_OUTPUT_DIR), PathBuf::from);
    for (root, input) in directory_jobs {
        let output = if output_is_stdout {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(discovery::output_path_in_dir(&input, &root, &batch_dir, &cli.suffix))
        };
        plan.jobs.push(Job::File { input, output });
    }

    plan.duplicate_outputs = duplicate_outputs(&plan.jobs);
    Ok(plan)
}

fn duplicate_outputs(jobs: &[Job]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for job in jobs {
        let (Job::File {
            output: OutputTarget::File(path),
            ..
        }
        | Job::Stdin {
            output: OutputTarget::File(path),
        }) = job
        else {
            continue;
        };
        if !seen.insert(path) && !duplicates.contains(path) {
            duplicates.push(path.clone());
        }
    }
    duplicates
}

/// Make the selected built-in model available, downloading it unless disabled
async fn ensure_model(cli: &Cli, spec: &ModelSpec) -> Result<()> {
    let ModelSource::Builtin(kind) = &spec.source else {
        return Ok(());
    };

    let cache = cli.cache()?;
    if cache.is_model_cached(*kind) {
        return Ok(());
    }

    anyhow::ensure!(
        !cli.no_download,
        "Model '{}' is not cached in {} and --no-download is set",
        kind,
        cache.get_current_cache_dir().display()
    );

    info!("Model '{}' is not cached, downloading it", kind);
    ModelDownloader::new(cache)?
        .ensure_model(*kind, true)
        .await
        .with_context(|| format!("Failed to download model '{kind}'"))?;
    Ok(())
}

async fn run_jobs(
    cli: &Cli,
    processor: &mut BackgroundRemovalProcessor,
    jobs: &[Job],
    stats: &mut BatchStats,
) {
    let progress = if jobs.len() > 1 || cli.progress {
        let pb = ProgressBar::new(jobs.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    } else {
        ProgressBar::hidden()
    };

    for job in jobs {
        let label = match job {
            Job::File { input, .. } => input.display().to_string(),
            Job::Stdin { .. } => "<stdin>".to_string(),
        };
        progress.set_message(label.clone());

        match run_job(cli, processor, job)
            .instrument(spans::file_processing(Path::new(&label)))
            .await
        {
            Ok(()) => stats.record_success(),
            Err(e) => {
                progress.suspend(|| error!("Failed to process {label}: {e:#}"));
                stats.record_failure(&label, format!("{e:#}"));
            },
        }
        progress.inc(1);
    }

    progress.finish_with_message(stats.summary());
    if stats.attempted() > 1 {
        info!("{:.2} images/s", stats.processing_rate());
    }
}

async fn run_job(cli: &Cli, processor: &mut BackgroundRemovalProcessor, job: &Job) -> Result<()> {
    match job {
        Job::File { input, output } => {
            let result = match output {
                OutputTarget::File(path) => {
                    let result = processor.process_file_to(input, path).await?;
                    info!("{} -> {}", input.display(), path.display());
                    result
                },
                OutputTarget::Stdout => {
                    let result = processor.process_file(input).await?;
                    write_stdout(&result.to_png_bytes(processor.config().png_compression)?)?;
                    result
                },
            };
            if cli.progress {
                info!("{}: {}", input.display(), result.timings.summary());
            }
        },
        Job::Stdin { output } => {
            let mut data = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut data)
                .await
                .context("Failed to read image from stdin")?;
            if ImageIOService::detect_format(&data).is_none() {
                warn!("Unrecognized image signature on stdin, trying to decode anyway");
            }

            let result = processor.process_bytes(&data)?;
            let compression = processor.config().png_compression;
            match output {
                OutputTarget::File(path) => {
                    result.save_png(path, compression)?;
                    info!("<stdin> -> {}", path.display());
                },
                OutputTarget::Stdout => write_stdout(&result.to_png_bytes(compression)?)?,
            }
        },
    }
    Ok(())
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(data)
        .and_then(|()| stdout.flush())
        .context("Failed to write to stdout")
}

async fn run_maintenance(cli: &Cli) -> Result<()> {
    if cli.show_providers {
        show_provider_diagnostics();
    }
    if cli.show_cache_dir {
        show_cache_dir(cli)?;
    }
    if cli.list_models {
        list_models(cli)?;
    }
    if cli.clear_cache {
        clear_cache(cli)?;
    }
    if cli.only_download {
        download_only(cli).await?;
    }
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");
    println!();
    println!("Execution providers:");
    for provider in ExecutionProviderManager::list_all_providers() {
        let status = if provider.available {
            "available"
        } else {
            "not available"
        };
        println!("  {:<14} {:<14} {}", provider.name, status, provider.description);
    }
    println!();
    println!("Select one with --execution-provider, e.g. onnx:cuda or tract:cpu");
}

fn show_cache_dir(cli: &Cli) -> Result<()> {
    let cache = cli.cache()?;
    println!("{}", cache.get_current_cache_dir().display());

    let source = if cli.cache_dir.is_some() {
        "--cache-dir".to_string()
    } else if std::env::var_os(CACHE_DIR_ENV).is_some() {
        format!("{CACHE_DIR_ENV} environment variable")
    } else {
        "platform cache directory".to_string()
    };
    info!("Cache directory source: {source}");
    Ok(())
}

fn list_models(cli: &Cli) -> Result<()> {
    let cache = cli.cache()?;
    let cached = cache.scan_cached_models().context("Failed to list cached models")?;

    println!("Built-in models (cache: {}):", cache.get_current_cache_dir().display());
    for kind in ModelKind::ALL {
        let status = cached
            .iter()
            .find(|model| model.kind == Some(kind))
            .map_or_else(|| "not downloaded".to_string(), |model| format!("cached, {}", format_size(model.size_bytes)));
        println!("  {:<18} {:<44} [{}]", kind.name(), kind.description(), status);
    }

    let others: Vec<_> = cached.iter().filter(|model| model.kind.is_none()).collect();
    if !others.is_empty() {
        println!();
        println!("Other files in the cache:");
        for model in others {
            println!("  {:<18} {}", model.file_name, format_size(model.size_bytes));
        }
    }
    Ok(())
}

fn builtin_model_arg(cli: &Cli) -> Result<Option<ModelKind>> {
    let Some(model) = &cli.model else {
        return Ok(None);
    };
    match ModelSpec::parse(model)?.source {
        ModelSource::Builtin(kind) => Ok(Some(kind)),
        ModelSource::File(path) => anyhow::bail!(
            "{} is a model file, not a built-in model name",
            path.display()
        ),
    }
}

fn clear_cache(cli: &Cli) -> Result<()> {
    let cache = cli.cache()?;

    if let Some(kind) = builtin_model_arg(cli)? {
        if cache.clear_specific_model(kind)? {
            println!("Removed {kind} from {}", cache.get_current_cache_dir().display());
        } else {
            println!("Model {kind} is not cached");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("Cache was already empty");
    } else {
        println!("Removed {} model file(s):", removed.len());
        for file in removed {
            println!("  {file}");
        }
    }
    Ok(())
}

async fn download_only(cli: &Cli) -> Result<()> {
    let kind = builtin_model_arg(cli)?.unwrap_or_default();
    let downloader = ModelDownloader::new(cli.cache()?)?;

    if downloader.cache().is_model_cached(kind) {
        let path = downloader.cache().get_model_path(kind);
        match verify_model_file(kind, &path) {
            Ok(_) => {
                println!("Model {kind} is already cached at {} (checksum ok)", path.display());
                return Ok(());
            },
            Err(e) => warn!("Cached copy of {kind} is damaged, downloading it again: {e}"),
        }
    }

    let downloaded = downloader
        .download_model(kind, true)
        .await
        .with_context(|| format!("Failed to download model '{kind}'"))?;
    println!(
        "Downloaded {} ({}) to {}",
        downloaded.kind,
        format_size(downloaded.size_bytes),
        downloaded.path.display()
    );
    println!("sha256: {}", downloaded.sha256);
    Ok(())
}
