//! Runtime configuration (spec §6 "Runtime configuration"), the ambient
//! analogue of `samply`'s `RecordingProps`/`ProfileCreationProps`: a single
//! place where every recognized option lands, validated once at startup
//! rather than scattered across call sites.

use std::path::PathBuf;

use pflow_tree::{BuildMode, ConcurrencyModel, SampleCountMode};

use crate::error::PflowError;

pub const DEFAULT_SAMPLING_FREQUENCY_HZ: u32 = 1000;
pub const DEFAULT_MAX_STACK_DEPTH: usize = 100;
pub const DEFAULT_SAMPLE_STORE_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub sampling_frequency_hz: u32,
    pub output_directory: PathBuf,
    pub max_stack_depth: usize,
    pub sample_store_capacity: usize,
    pub build_mode: BuildMode,
    pub sample_count_mode: SampleCountMode,
    pub concurrency_model: ConcurrencyModel,
    pub resolve_symbols: bool,
    pub symbol_strategy: pflow_symbols::SymbolStrategy,
}

impl RuntimeConfig {
    /// Checks the invariants the spec calls out explicitly (the store
    /// capacity must be a power of two) and anything else that would
    /// otherwise surface as a confusing panic deep inside another crate.
    pub fn validate(&self) -> Result<(), PflowError> {
        if !self.sample_store_capacity.is_power_of_two() {
            return Err(PflowError::Configuration(format!(
                "SampleStoreCapacity must be a power of two, got {}",
                self.sample_store_capacity
            )));
        }
        if self.sampling_frequency_hz == 0 {
            return Err(PflowError::Configuration(
                "SamplingFrequencyHz must be greater than zero".to_string(),
            ));
        }
        if self.max_stack_depth == 0 || self.max_stack_depth > pflow_store::MAX_STACK_DEPTH {
            return Err(PflowError::Configuration(format!(
                "MaxStackDepth must be between 1 and {}, got {}",
                pflow_store::MAX_STACK_DEPTH,
                self.max_stack_depth
            )));
        }
        Ok(())
    }
}
