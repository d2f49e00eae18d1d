//! Process-attachment entry point (spec §6 "Process attachment via
//! LD_PRELOAD"). Built as a cdylib (see this crate's `Cargo.toml`), this
//! module's constructor runs when `LD_PRELOAD=libpflow_sampler.so` is
//! injected into a target process: it captures the initial library map,
//! arms and runs a process-wide [`Sampler`], and registers an `atexit`
//! handler that stops it, flushing C1/C2 to `process-<pid>.pflw`/
//! `.libmap` before the process actually exits.
//!
//! Configuration comes entirely from the environment, since there is no
//! command line to parse for a preloaded library: `PFLOW_OUTPUT_DIR`
//! (default `.`), `PFLOW_SAMPLING_FREQUENCY_HZ` (default 1000), and
//! `PFLOW_SAMPLE_STORE_CAPACITY` (default `1 << 20`, must be a power of
//! two or the default is used).

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use pflow_libmap::{LibraryMapRegistry, ModuleScanner, ProcSelfMapsScanner};
use pflow_store::SampleStore;

use crate::refresher::BackgroundRefresher;
use crate::sampler::Sampler;
use crate::unwinder::FramePointerUnwinder;

const ENV_OUTPUT_DIR: &str = "PFLOW_OUTPUT_DIR";
const ENV_FREQUENCY_HZ: &str = "PFLOW_SAMPLING_FREQUENCY_HZ";
const ENV_STORE_CAPACITY: &str = "PFLOW_SAMPLE_STORE_CAPACITY";
const DEFAULT_FREQUENCY_HZ: u32 = 1000;
const DEFAULT_STORE_CAPACITY: usize = 1 << 20;

struct AttachedState {
    sampler: Arc<Sampler>,
    refresher: BackgroundRefresher,
}

static STATE: OnceLock<Mutex<Option<AttachedState>>> = OnceLock::new();

fn store_capacity() -> usize {
    env::var(ENV_STORE_CAPACITY)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| v.is_power_of_two())
        .unwrap_or(DEFAULT_STORE_CAPACITY)
}

fn sampling_interval() -> Duration {
    let hz: u32 = env::var(ENV_FREQUENCY_HZ)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|hz| *hz > 0)
        .unwrap_or(DEFAULT_FREQUENCY_HZ);
    Duration::from_secs_f64(1.0 / hz as f64)
}

extern "C" fn on_load() {
    let output_directory = PathBuf::from(env::var(ENV_OUTPUT_DIR).unwrap_or_else(|_| ".".to_string()));
    let process_id = std::process::id();

    let scanner: Arc<dyn ModuleScanner + Send + Sync> = Arc::new(ProcSelfMapsScanner);
    let mut registry = LibraryMapRegistry::new();
    let initial_id = match registry.capture(scanner.as_ref()) {
        Ok(id) => id,
        Err(err) => {
            log::error!("pflow: initial library map capture failed: {err}");
            return;
        }
    };
    let initial_map = registry.get(initial_id).expect("capture just inserted this id");
    let registry = Arc::new(Mutex::new(registry));

    let store = Arc::new(SampleStore::new(store_capacity()));
    let unwinder = Arc::new(FramePointerUnwinder::new());

    let mut sampler = Sampler::new(
        store,
        initial_map,
        unwinder,
        Arc::clone(&registry),
        process_id,
        output_directory,
    );

    if let Err(err) = sampler.arm() {
        log::error!("pflow: failed to arm sampler: {err}");
        return;
    }
    if let Err(err) = sampler.run(sampling_interval()) {
        log::error!("pflow: failed to start sampling timer: {err}");
        sampler.stop();
        return;
    }

    let sampler = Arc::new(sampler);
    let refresher = BackgroundRefresher::spawn(
        Arc::clone(&sampler),
        scanner,
        registry,
        Duration::from_millis(200),
    );

    *STATE.get_or_init(|| Mutex::new(None)).lock().unwrap() = Some(AttachedState { sampler, refresher });

    unsafe {
        libc::atexit(on_exit);
    }
    log::info!("pflow: sampler attached to process {process_id}");
}

extern "C" fn on_exit() {
    let Some(state_lock) = STATE.get() else { return };
    let Some(mut attached) = state_lock.lock().unwrap().take() else { return };

    // Stopping the refresher first joins its thread, dropping the only
    // other strong reference to `sampler`; `Arc::get_mut` below then
    // succeeds and `stop()` (which needs `&mut self`) can run.
    attached.refresher.stop();
    match Arc::get_mut(&mut attached.sampler) {
        Some(sampler) => sampler.stop(),
        None => log::warn!("pflow: sampler still shared at exit; samples were not flushed"),
    }
}

#[used]
#[link_section = ".init_array"]
static PFLOW_CTOR: extern "C" fn() = on_load;
