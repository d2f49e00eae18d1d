//! Command-line surface (spec §6 runtime configuration), styled after
//! `samply::cli`'s derive-based subcommands: doc comments become `--help`
//! text, and CLI-facing enums are kept distinct from the library's own
//! types, converted at the boundary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "pflow",
    version,
    about = "Offline driver for the PerFlow sampling-profiler core: builds performance trees from recorded samples and writes tree/text/dot output."
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Ingest one or more (sample, libmap) file pairs into a performance
    /// tree and write it out.
    Build(BuildArgs),

    /// Read a previously built `.ptree`/`.ptree.gz` file and render it as
    /// text, GraphViz `.dot`, or a hotspot/balance report.
    Dump(DumpArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// One or more `sample.pflw:libmap.libmap:process_id` triples.
    #[arg(required = true, value_parser = parse_job_spec)]
    pub jobs: Vec<JobSpec>,

    /// Directory that output files (`.ptree`, `.ptree.txt`, `.dot`) are
    /// written into.
    #[arg(short, long)]
    pub output_directory: PathBuf,

    /// Base name for the output files, without extension.
    #[arg(long, default_value = "profile")]
    pub output_name: String,

    #[command(flatten)]
    pub tree_args: TreeArgs,

    /// How ingestion is parallelized.
    #[arg(long, value_enum, default_value_t = CliIngestionPlan::Sequential)]
    pub plan: CliIngestionPlan,

    /// Gzip-compress the `.ptree` output.
    #[arg(long)]
    pub compress: bool,

    /// Resolve function/file/line symbols during ingestion.
    #[arg(long)]
    pub resolve_symbols: bool,

    /// Sampling frequency recorded alongside the output, for downstream
    /// tools that want to know the original capture rate (spec §6
    /// `SamplingFrequencyHz`). Does not affect ingestion itself.
    #[arg(long, default_value_t = crate::config::DEFAULT_SAMPLING_FREQUENCY_HZ)]
    pub sampling_frequency_hz: u32,

    /// Rejects any recorded stack deeper than this (spec §6
    /// `MaxStackDepth`).
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_STACK_DEPTH)]
    pub max_stack_depth: usize,

    /// Capacity the sample store was configured with; must be a power of
    /// two (spec §6 `SampleStoreCapacity`). Validated here so a
    /// misconfigured pipeline fails fast with `ConfigurationError` rather
    /// than surfacing as a confusing downstream mismatch.
    #[arg(long, default_value_t = crate::config::DEFAULT_SAMPLE_STORE_CAPACITY)]
    pub sample_store_capacity: usize,

    /// Gradient used to fill `.dot` node colors, normalized to the tree's
    /// total sample count.
    #[arg(long, value_enum, default_value_t = CliColorScheme::Heatmap)]
    pub color_scheme: CliColorScheme,
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Path to a `.ptree` or `.ptree.gz` file.
    pub file: PathBuf,

    #[command(flatten)]
    pub tree_args: TreeArgs,

    /// What to render.
    #[arg(long, value_enum, default_value_t = DumpFormat::Text)]
    pub format: DumpFormat,

    /// With `--format hotspots`, how many entries to show.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Gradient used to fill `.dot` node colors, normalized to the tree's
    /// total sample count. Ignored outside `--format dot`.
    #[arg(long, value_enum, default_value_t = CliColorScheme::Heatmap)]
    pub color_scheme: CliColorScheme,
}

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Whether call stacks are keyed by function+library or also by
    /// in-library offset.
    #[arg(long, value_enum, default_value_t = CliBuildMode::ContextFree)]
    pub build_mode: CliBuildMode,

    /// Which nodes get credited on each inserted stack.
    #[arg(long, value_enum, default_value_t = CliSampleCountMode::Exclusive)]
    pub sample_count_mode: CliSampleCountMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBuildMode {
    ContextFree,
    ContextAware,
}

impl From<CliBuildMode> for pflow_tree::BuildMode {
    fn from(value: CliBuildMode) -> Self {
        match value {
            CliBuildMode::ContextFree => pflow_tree::BuildMode::ContextFree,
            CliBuildMode::ContextAware => pflow_tree::BuildMode::ContextAware,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliSampleCountMode {
    Exclusive,
    Inclusive,
    Both,
}

impl From<CliSampleCountMode> for pflow_tree::SampleCountMode {
    fn from(value: CliSampleCountMode) -> Self {
        match value {
            CliSampleCountMode::Exclusive => pflow_tree::SampleCountMode::Exclusive,
            CliSampleCountMode::Inclusive => pflow_tree::SampleCountMode::Inclusive,
            CliSampleCountMode::Both => pflow_tree::SampleCountMode::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliIngestionPlan {
    Sequential,
    CoarseLock,
    FineGrained,
    ThreadLocalMerge,
    LockFree,
}

impl From<CliIngestionPlan> for pflow_builder::IngestionPlan {
    fn from(value: CliIngestionPlan) -> Self {
        use pflow_builder::IngestionPlan;
        use pflow_tree::ConcurrencyModel;
        match value {
            CliIngestionPlan::Sequential => IngestionPlan::Sequential,
            CliIngestionPlan::CoarseLock => IngestionPlan::Concurrent(ConcurrencyModel::CoarseLock),
            CliIngestionPlan::FineGrained => {
                IngestionPlan::Concurrent(ConcurrencyModel::FineGrainedLock)
            }
            CliIngestionPlan::ThreadLocalMerge => {
                IngestionPlan::Concurrent(ConcurrencyModel::ThreadLocalMerge)
            }
            CliIngestionPlan::LockFree => IngestionPlan::Concurrent(ConcurrencyModel::LockFree),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    Text,
    Dot,
    Hotspots,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliColorScheme {
    Grayscale,
    Heatmap,
    Rainbow,
}

impl From<CliColorScheme> for pflow_tree::ColorScheme {
    fn from(value: CliColorScheme) -> Self {
        match value {
            CliColorScheme::Grayscale => pflow_tree::ColorScheme::Grayscale,
            CliColorScheme::Heatmap => pflow_tree::ColorScheme::Heatmap,
            CliColorScheme::Rainbow => pflow_tree::ColorScheme::Rainbow,
        }
    }
}

/// One `sample_path:libmap_path:process_id` triple from the command line.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub sample_path: PathBuf,
    pub libmap_path: PathBuf,
    pub process_id: u32,
}

fn parse_job_spec(raw: &str) -> Result<JobSpec, String> {
    let parts: Vec<&str> = raw.splitn(3, ':').collect();
    let [sample, libmap, pid] = parts.as_slice() else {
        return Err(format!(
            "expected `sample.pflw:libmap.libmap:process_id`, got `{raw}`"
        ));
    };
    let process_id: u32 = pid
        .parse()
        .map_err(|_| format!("`{pid}` is not a valid process id"))?;
    Ok(JobSpec {
        sample_path: PathBuf::from(sample),
        libmap_path: PathBuf::from(libmap),
        process_id,
    })
}
