//! Build a store from configuration.

use std::sync::Arc;

use tracing::info;

use crashkit_types::{Clock, SystemClock};

use crate::config::{BackendConfig, FsConfig};
use crate::error::StoreResult;
use crate::fallback::FallbackCrashStore;
use crate::fs::{FsDatedRadixStore, FsRadixStore};
use crate::memory::InMemoryCrashStore;
use crate::null::NullCrashStore;
use crate::poly::PolyCrashStore;
use crate::traits::CrashStore;

/// Open the store described by `config`, using the system clock.
pub fn open_store(config: &BackendConfig) -> StoreResult<Arc<dyn CrashStore>> {
    open_store_with_clock(config, Arc::new(SystemClock))
}

/// Open the store described by `config`. Filesystem stores read "now"
/// from `clock`.
///
/// A filesystem config with `fallback_root` set opens as a fallback pair:
/// the configured root first, then the same layout under `fallback_root`.
pub fn open_store_with_clock(
    config: &BackendConfig,
    clock: Arc<dyn Clock>,
) -> StoreResult<Arc<dyn CrashStore>> {
    let store: Arc<dyn CrashStore> = match config {
        BackendConfig::FsRadix(fs) => open_fs(fs, &clock, open_radix)?,
        BackendConfig::FsDatedRadix(fs) => open_fs(fs, &clock, open_dated_radix)?,
        BackendConfig::Memory => Arc::new(InMemoryCrashStore::new()),
        BackendConfig::Null => Arc::new(NullCrashStore::new()),
        BackendConfig::Fallback { stores, depth } => Arc::new(FallbackCrashStore::new(
            open_all(stores, &clock)?,
            *depth,
        )?),
        BackendConfig::Poly { stores } => Arc::new(PolyCrashStore::new(open_all(stores, &clock)?)?),
    };
    info!(kind = store.kind(), "opened crash store");
    Ok(store)
}

fn open_radix(config: &FsConfig, clock: Arc<dyn Clock>) -> StoreResult<Arc<dyn CrashStore>> {
    let store = FsRadixStore::with_clock(config, clock)?;
    Ok(Arc::new(store))
}

fn open_dated_radix(config: &FsConfig, clock: Arc<dyn Clock>) -> StoreResult<Arc<dyn CrashStore>> {
    let store = FsDatedRadixStore::with_clock(config, clock)?;
    Ok(Arc::new(store))
}

fn open_all(
    configs: &[BackendConfig],
    clock: &Arc<dyn Clock>,
) -> StoreResult<Vec<Arc<dyn CrashStore>>> {
    configs
        .iter()
        .map(|c| open_store_with_clock(c, Arc::clone(clock)))
        .collect()
}

fn open_fs(
    config: &FsConfig,
    clock: &Arc<dyn Clock>,
    open: impl Fn(&FsConfig, Arc<dyn Clock>) -> StoreResult<Arc<dyn CrashStore>>,
) -> StoreResult<Arc<dyn CrashStore>> {
    let primary = open(config, Arc::clone(clock))?;
    let Some(fallback_root) = &config.fallback_root else {
        return Ok(primary);
    };
    let secondary_config = FsConfig {
        storage_root: fallback_root.clone(),
        fallback_root: None,
        ..config.clone()
    };
    let secondary = open(&secondary_config, Arc::clone(clock))?;
    Ok(Arc::new(FallbackCrashStore::new(
        vec![primary, secondary],
        config.fallback_depth,
    )?))
}
