//! Drives C4 → C6 → C7 end to end (spec §4.8). Three ingestion shapes are
//! offered: a plain sequential loop, a shared-tree path for the three
//! concurrency models that have a live `PerformanceTree` variant, and a
//! thread-local path for `ThreadLocalMerge`, which builds one private tree
//! per worker and folds them with [`pflow_tree::merge_all`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pflow_libmap::LibraryMapRegistry;
use pflow_symbols::SymbolResolver;
use pflow_tree::{
    merge_all, BuildMode, ConcurrencyModel, OffsetConverter, PerformanceTree, SampleCountMode,
    ThreadLocalTree, TreeArena, ROOT,
};
use rayon::prelude::*;

use crate::error::BuildError;
use crate::job::IngestJob;
use crate::summary::{BuildSummary, IngestFailure};

/// How a batch of jobs should be ingested (spec §4.8 steps 3-4).
#[derive(Debug, Clone, Copy)]
pub enum IngestionPlan {
    Sequential,
    Concurrent(ConcurrencyModel),
}

pub struct TreeBuilder {
    build_mode: BuildMode,
    sample_mode: SampleCountMode,
    symbols: Option<Arc<SymbolResolver>>,
    max_stack_depth: usize,
    cancel: Arc<AtomicBool>,
}

impl TreeBuilder {
    /// `max_stack_depth` rejects any imported stack deeper than this (spec
    /// §6 `MaxStackDepth`), independent of `pflow_store::MAX_STACK_DEPTH`'s
    /// hard ceiling that the codec's own `RawStack::new` already enforces.
    pub fn new(
        build_mode: BuildMode,
        sample_mode: SampleCountMode,
        symbols: Option<Arc<SymbolResolver>>,
        max_stack_depth: usize,
    ) -> Self {
        Self {
            build_mode,
            sample_mode,
            symbols,
            max_stack_depth,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the cooperative cancel flag (spec §5 "the caller may
    /// signal a cancel flag checked between files"); share it with
    /// whatever triggers cancellation (a CLI signal handler, a timeout).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn ingest(&self, jobs: Vec<IngestJob>, plan: IngestionPlan) -> (TreeArena, BuildSummary) {
        log::info!("ingesting {} files under {:?}", jobs.len(), plan);
        match plan {
            IngestionPlan::Sequential => self.ingest_sequential(jobs),
            IngestionPlan::Concurrent(ConcurrencyModel::ThreadLocalMerge) => {
                self.ingest_thread_local_merge(jobs)
            }
            IngestionPlan::Concurrent(model) => self.ingest_shared_tree(jobs, model),
        }
    }

    fn ingest_sequential(&self, jobs: Vec<IngestJob>) -> (TreeArena, BuildSummary) {
        let mut arena = TreeArena::new(self.build_mode, self.sample_mode);
        let mut summary = BuildSummary::default();

        for job in jobs {
            if self.cancel.load(Ordering::Relaxed) {
                log::info!("sequential ingestion cancelled after {} files", summary.files_ingested);
                break;
            }
            match self.load_and_insert(&mut arena, &job) {
                Ok(()) => summary.files_ingested += 1,
                Err(error) => {
                    log::warn!("failed to ingest {}: {error}", job.sample_path.display());
                    summary.failures.push(IngestFailure { sample_path: job.sample_path, error });
                }
            }
        }

        summary.total_samples = arena.node(ROOT).total_samples;
        (arena, summary)
    }

    fn ingest_shared_tree(
        &self,
        jobs: Vec<IngestJob>,
        model: ConcurrencyModel,
    ) -> (TreeArena, BuildSummary) {
        let tree = Arc::new(PerformanceTree::new(model, self.build_mode, self.sample_mode));
        let worker_count = rayon::current_num_threads().max(1);

        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        for job in jobs {
            job_tx.send(job).expect("receiver outlives this loop");
        }
        drop(job_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        rayon::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let tree = Arc::clone(&tree);
                scope.spawn(move |_| {
                    while let Ok(job) = job_rx.recv() {
                        if self.cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let path = job.sample_path.clone();
                        let outcome = self.insert_via_tree(&tree, &job);
                        result_tx.send((path, outcome)).expect("result receiver still live");
                    }
                });
            }
        });
        drop(result_tx);

        let mut summary = BuildSummary::default();
        for (path, outcome) in result_rx.iter() {
            match outcome {
                Ok(()) => summary.files_ingested += 1,
                Err(error) => {
                    log::warn!("failed to ingest {}: {error}", path.display());
                    summary.failures.push(IngestFailure { sample_path: path, error });
                }
            }
        }

        let tree = Arc::try_unwrap(tree)
            .unwrap_or_else(|_| unreachable!("all worker scopes have joined by this point"));
        let arena = tree.finalize();
        summary.total_samples = arena.node(ROOT).total_samples;
        (arena, summary)
    }

    fn ingest_thread_local_merge(&self, jobs: Vec<IngestJob>) -> (TreeArena, BuildSummary) {
        let worker_count = rayon::current_num_threads().max(1);
        let chunks = chunk_evenly(jobs, worker_count);

        let per_worker: Vec<(ThreadLocalTree, Vec<(PathBuf, Result<(), BuildError>)>)> = chunks
            .into_par_iter()
            .map(|chunk| {
                let mut local = ThreadLocalTree::new(self.build_mode, self.sample_mode);
                let mut outcomes = Vec::with_capacity(chunk.len());
                for job in chunk {
                    if self.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let path = job.sample_path.clone();
                    let outcome = self.insert_via_thread_local(&mut local, &job);
                    outcomes.push((path, outcome));
                }
                (local, outcomes)
            })
            .collect();

        let mut summary = BuildSummary::default();
        let mut worker_trees = Vec::with_capacity(per_worker.len());
        for (tree, outcomes) in per_worker {
            worker_trees.push(tree);
            for (path, outcome) in outcomes {
                match outcome {
                    Ok(()) => summary.files_ingested += 1,
                    Err(error) => {
                        log::warn!("failed to ingest {}: {error}", path.display());
                        summary.failures.push(IngestFailure { sample_path: path, error });
                    }
                }
            }
        }

        let arena = merge_all(self.build_mode, self.sample_mode, worker_trees);
        summary.total_samples = arena.node(ROOT).total_samples;
        (arena, summary)
    }

    fn load_and_insert(&self, arena: &mut TreeArena, job: &IngestJob) -> Result<(), BuildError> {
        let (imported, registry) = self.load_job(job)?;
        let converter = OffsetConverter::new(&registry, self.symbols.as_deref());
        for entry in &imported.entries {
            self.check_depth(entry.stack.depth())?;
            let frames = converter.resolve_stack(entry.stack.addresses(), entry.snapshot_id);
            arena.insert(&frames, imported.process_id, entry.counter, 0.0);
        }
        Ok(())
    }

    fn insert_via_tree(&self, tree: &PerformanceTree, job: &IngestJob) -> Result<(), BuildError> {
        let (imported, registry) = self.load_job(job)?;
        let converter = OffsetConverter::new(&registry, self.symbols.as_deref());
        for entry in &imported.entries {
            self.check_depth(entry.stack.depth())?;
            let frames = converter.resolve_stack(entry.stack.addresses(), entry.snapshot_id);
            tree.insert(&frames, imported.process_id, entry.counter, 0.0);
        }
        Ok(())
    }

    fn insert_via_thread_local(
        &self,
        local: &mut ThreadLocalTree,
        job: &IngestJob,
    ) -> Result<(), BuildError> {
        let (imported, registry) = self.load_job(job)?;
        let converter = OffsetConverter::new(&registry, self.symbols.as_deref());
        for entry in &imported.entries {
            self.check_depth(entry.stack.depth())?;
            let frames = converter.resolve_stack(entry.stack.addresses(), entry.snapshot_id);
            local.insert(&frames, imported.process_id, entry.counter, 0.0);
        }
        Ok(())
    }

    /// Rejects a stack deeper than the configured `MaxStackDepth` before it
    /// reaches the tree, so a file recorded under a looser ceiling than
    /// this run's configuration is reported as a per-file failure rather
    /// than silently ingested past the configured bound.
    fn check_depth(&self, depth: usize) -> Result<(), BuildError> {
        if depth > self.max_stack_depth {
            return Err(BuildError::DepthExceeded { depth, limit: self.max_stack_depth });
        }
        Ok(())
    }

    fn load_job(
        &self,
        job: &IngestJob,
    ) -> Result<(pflow_codec::ImportedSamples, LibraryMapRegistry), BuildError> {
        let imported = pflow_codec::import_samples(&job.sample_path)?;
        let (_, snapshots) = pflow_codec::import_libmap(&job.libmap_path)?;
        let mut registry = LibraryMapRegistry::new();
        for snapshot in snapshots {
            registry.load(snapshot);
        }
        Ok((imported, registry))
    }
}

/// Splits `items` into up to `worker_count` roughly equal, order-preserving
/// chunks. Fewer chunks than `worker_count` are returned if there are
/// fewer items than workers.
fn chunk_evenly<T>(items: Vec<T>, worker_count: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let chunk_size = items.len().div_ceil(worker_count).max(1);
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(chunk_size);
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pflow_codec::{export_libmap, export_samples};
    use pflow_libmap::{LibraryMap, LibraryMapEntry};
    use pflow_store::{RawStack, SampleStore};

    fn write_pair(
        dir: &std::path::Path,
        process_id: u32,
        stacks: &[(&[u64], u64)],
    ) -> IngestJob {
        let store = SampleStore::new(64);
        for (addrs, count) in stacks {
            let stack = RawStack::new(addrs).unwrap();
            for _ in 0..*count {
                store.increment(&stack, 0);
            }
        }
        let sample_path = dir.join(format!("process-{process_id}.pflw"));
        export_samples(&store, process_id, 0, &sample_path).unwrap();

        let map = LibraryMap::new(
            0,
            vec![LibraryMapEntry {
                base: 0,
                end: u64::MAX,
                path: "app".to_string(),
                file_offset: 0,
            }],
        )
        .unwrap();
        let libmap_path = dir.join(format!("process-{process_id}.libmap"));
        export_libmap(&[map], process_id, &libmap_path).unwrap();

        IngestJob::new(sample_path, libmap_path, process_id)
    }

    #[test]
    fn sequential_ingestion_sums_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            write_pair(dir.path(), 0, &[(&[1, 2, 3], 5)]),
            write_pair(dir.path(), 1, &[(&[1, 2, 4], 7)]),
        ];

        let builder = TreeBuilder::new(BuildMode::ContextFree, SampleCountMode::Inclusive, None, pflow_store::MAX_STACK_DEPTH);
        let (arena, summary) = builder.ingest(jobs, IngestionPlan::Sequential);

        assert_eq!(summary.files_ingested, 2);
        assert!(summary.failures.is_empty());
        assert_eq!(arena.node(ROOT).total_samples, 12);
    }

    #[test]
    fn shared_tree_coarse_lock_matches_sequential_totals() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            write_pair(dir.path(), 0, &[(&[1, 2, 3], 10)]),
            write_pair(dir.path(), 1, &[(&[1, 2, 4], 20)]),
        ];

        let builder = TreeBuilder::new(BuildMode::ContextFree, SampleCountMode::Inclusive, None, pflow_store::MAX_STACK_DEPTH);
        let (arena, summary) = builder.ingest(
            jobs,
            IngestionPlan::Concurrent(ConcurrencyModel::CoarseLock),
        );

        assert_eq!(summary.files_ingested, 2);
        assert_eq!(arena.node(ROOT).total_samples, 30);
    }

    #[test]
    fn thread_local_merge_matches_sequential_totals() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            write_pair(dir.path(), 0, &[(&[1, 2, 3], 4)]),
            write_pair(dir.path(), 1, &[(&[1, 2, 4], 6)]),
            write_pair(dir.path(), 2, &[(&[1, 5], 3)]),
        ];

        let builder = TreeBuilder::new(BuildMode::ContextFree, SampleCountMode::Inclusive, None, pflow_store::MAX_STACK_DEPTH);
        let (arena, summary) = builder.ingest(
            jobs,
            IngestionPlan::Concurrent(ConcurrencyModel::ThreadLocalMerge),
        );

        assert_eq!(summary.files_ingested, 3);
        assert_eq!(arena.node(ROOT).total_samples, 13);
    }

    #[test]
    fn missing_file_is_recorded_as_a_failure_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_pair(dir.path(), 0, &[(&[1, 2], 1)]);
        let bad = IngestJob::new(
            dir.path().join("missing.pflw"),
            dir.path().join("missing.libmap"),
            1,
        );

        let builder = TreeBuilder::new(BuildMode::ContextFree, SampleCountMode::Inclusive, None, pflow_store::MAX_STACK_DEPTH);
        let (_, summary) = builder.ingest(vec![good, bad], IngestionPlan::Sequential);

        assert_eq!(summary.files_ingested, 1);
        assert_eq!(summary.files_failed(), 1);
    }

    #[test]
    fn a_stack_deeper_than_the_configured_limit_is_rejected_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let job = write_pair(dir.path(), 0, &[(&[1, 2, 3, 4, 5], 1)]);

        let builder = TreeBuilder::new(BuildMode::ContextFree, SampleCountMode::Inclusive, None, 3);
        let (_, summary) = builder.ingest(vec![job], IngestionPlan::Sequential);

        assert_eq!(summary.files_ingested, 0);
        assert_eq!(summary.files_failed(), 1);
        assert!(matches!(
            summary.failures[0].error,
            BuildError::DepthExceeded { depth: 5, limit: 3 }
        ));
    }

    #[test]
    fn chunk_evenly_preserves_all_items() {
        let items: Vec<u32> = (0..10).collect();
        let chunks = chunk_evenly(items, 3);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 10);
        assert!(chunks.len() <= 3);
    }
}
