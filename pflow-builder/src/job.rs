//! One unit of ingestion work (spec §4.8 step 1): a `(sample_file,
//! libmap_file, process_id)` triple.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub sample_path: PathBuf,
    pub libmap_path: PathBuf,
    pub process_id: u32,
}

impl IngestJob {
    pub fn new(sample_path: PathBuf, libmap_path: PathBuf, process_id: u32) -> Self {
        Self { sample_path, libmap_path, process_id }
    }
}
