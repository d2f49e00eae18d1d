//! `pflow`: offline driver for the PerFlow profiler core (spec component
//! C9 plus the CLI/runtime-config ambient stack). Ingests recorded
//! `(samples, libmap)` pairs via `pflow-builder`, then writes the
//! resulting tree as `.ptree`/`.ptree.gz`, `.ptree.txt`, or `.dot`, or
//! dumps an existing `.ptree` file back out in any of those shapes.

mod cli;
mod config;
mod error;
mod ptree;
mod text_dump;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pflow_builder::{IngestJob, TreeBuilder};
use pflow_symbols::{ObjectDynsymSource, SymbolResolver, SymbolResolverConfig, SymbolStrategy};

use crate::cli::{Action, BuildArgs, DumpArgs, DumpFormat, Opt};
use crate::config::RuntimeConfig;
use crate::error::{PflowError, RunOutcome};

fn main() -> ExitCode {
    env_logger::init();
    let opt = Opt::parse();

    let outcome = match opt.action {
        Action::Build(args) => run_build(args),
        Action::Dump(args) => run_dump(args),
    };

    match &outcome {
        RunOutcome::Success => log::info!("done"),
        RunOutcome::PartialSuccess => log::warn!("completed with some files failing to ingest"),
        RunOutcome::Failed(err) => log::error!("{err}"),
    }
    outcome.into_exit_code()
}

fn run_build(args: BuildArgs) -> RunOutcome {
    let build_mode = args.tree_args.build_mode.into();
    let sample_count_mode = args.tree_args.sample_count_mode.into();

    let config = RuntimeConfig {
        sampling_frequency_hz: args.sampling_frequency_hz,
        output_directory: args.output_directory.clone(),
        max_stack_depth: args.max_stack_depth,
        sample_store_capacity: args.sample_store_capacity,
        build_mode,
        sample_count_mode,
        concurrency_model: pflow_tree::ConcurrencyModel::CoarseLock,
        resolve_symbols: args.resolve_symbols,
        symbol_strategy: SymbolStrategy::AutoFallback,
    };
    if let Err(err) = config.validate() {
        return RunOutcome::Failed(err);
    }

    if let Err(err) = std::fs::create_dir_all(&args.output_directory) {
        return RunOutcome::Failed(PflowError::Io(err));
    }

    let symbols = if args.resolve_symbols {
        Some(Arc::new(SymbolResolver::new(
            SymbolResolverConfig {
                strategy: SymbolStrategy::AutoFallback,
                debug_tool_timeout: Duration::from_secs(2),
            },
            Arc::new(ObjectDynsymSource::new()),
            Arc::new(pflow_symbols::ExternalToolSource::default()),
        )))
    } else {
        None
    };

    let jobs: Vec<IngestJob> = args
        .jobs
        .into_iter()
        .map(|spec| IngestJob::new(spec.sample_path, spec.libmap_path, spec.process_id))
        .collect();

    let builder = TreeBuilder::new(build_mode, sample_count_mode, symbols, args.max_stack_depth);
    let (arena, summary) = builder.ingest(jobs, args.plan.into());

    log::info!(
        "ingested {} file(s), {} failure(s), {} total samples",
        summary.files_ingested,
        summary.files_failed(),
        summary.total_samples
    );
    for failure in &summary.failures {
        log::warn!("{}: {}", failure.sample_path.display(), failure.error);
    }

    let ptree_name = if args.compress { "ptree.gz" } else { "ptree" };
    let ptree_path = args.output_directory.join(format!("{}.{ptree_name}", args.output_name));
    if let Err(err) = ptree::write_ptree(&arena, &ptree_path, args.compress) {
        return RunOutcome::Failed(PflowError::Ptree(err));
    }

    let text_path = args.output_directory.join(format!("{}.ptree.txt", args.output_name));
    if let Err(err) = std::fs::write(&text_path, text_dump::render(&arena)) {
        return RunOutcome::Failed(PflowError::Io(err));
    }

    let dot_path = args.output_directory.join(format!("{}.dot", args.output_name));
    if let Err(err) = std::fs::write(&dot_path, pflow_tree::to_dot(&arena, args.color_scheme.into())) {
        return RunOutcome::Failed(PflowError::Io(err));
    }

    if summary.is_complete_success() {
        RunOutcome::Success
    } else {
        RunOutcome::PartialSuccess
    }
}

fn run_dump(args: DumpArgs) -> RunOutcome {
    let build_mode = args.tree_args.build_mode.into();
    let sample_count_mode = args.tree_args.sample_count_mode.into();

    let arena = match ptree::read_ptree(&args.file, build_mode, sample_count_mode) {
        Ok(arena) => arena,
        Err(err) => return RunOutcome::Failed(PflowError::Ptree(err)),
    };

    let rendered = match args.format {
        DumpFormat::Text => text_dump::render(&arena),
        DumpFormat::Dot => pflow_tree::to_dot(&arena, args.color_scheme.into()),
        DumpFormat::Hotspots => {
            let entries = pflow_tree::hotspots(&arena, pflow_tree::HotspotMetric::TotalSamples, args.top);
            entries
                .iter()
                .map(|e| format!("{:>6.2}%  {:>10}  {} ({})", e.percentage, e.samples, e.function, e.library))
                .collect::<Vec<_>>()
                .join("\n")
        }
        DumpFormat::Balance => match pflow_tree::balance(&arena) {
            Some(b) => format!(
                "min={} max={} mean={:.2} stddev={:.2} imbalance={:.4}",
                b.min, b.max, b.mean, b.stddev, b.imbalance
            ),
            None => "no per-process samples recorded".to_string(),
        },
    };

    println!("{rendered}");
    RunOutcome::Success
}
