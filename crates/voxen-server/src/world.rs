//! World lifecycle: select the storage backend, initialize and open the
//! world, load the spawn area on worker threads, auto-save, and persist
//! everything on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use voxen_storage::{ProviderRegistry, ServerContext, WorldFormat, WorldSource};
use voxen_terrain::{lock_ordered, ColumnBuffer, RegionData, RegionPos, Terrain, VoxelRegistry};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::generator::{self, FlatBlocks};

/// What a server run did, reported on exit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub loaded: usize,
    pub generated: usize,
    pub saved: usize,
}

/// Run the world until `shutdown` receives a message or its sender is dropped.
///
/// The source is closed on every path once it has been created; an error
/// from the run itself takes precedence over one from closing.
pub fn run(config: &ServerConfig, shutdown: Receiver<()>) -> Result<RunReport, ServerError> {
    config.validate()?;
    let mut registry = VoxelRegistry::new();
    let blocks = generator::register_content(&mut registry)?;
    let registry = Arc::new(registry);

    let providers = ProviderRegistry::builtin();
    let ids: Vec<_> = providers.available().map(|p| p.config_id()).collect();
    debug!("available storage backends: {}", ids.join(", "));
    let mut source = providers.create_source(&config.storage)?;
    info!(
        "World storage: {} at {}",
        source.config_id(),
        source.location()
    );

    let result = serve(source.as_mut(), config, registry, &blocks, shutdown);
    let closed = source.close();
    let report = result?;
    closed?;
    Ok(report)
}

fn serve(
    source: &mut dyn WorldSource,
    config: &ServerConfig,
    registry: Arc<VoxelRegistry>,
    blocks: &FlatBlocks,
    shutdown: Receiver<()>,
) -> Result<RunReport, ServerError> {
    let plugins = config.plugin_references();
    if !source.initialized()? {
        info!("Creating world {} with seed {}", config.world.name, config.world.seed);
        source.init(config.world.seed, &plugins)?;
    }

    let ctx = ServerContext::new(Arc::clone(&registry), plugins);
    let format = source.open(&ctx)?;
    if format.meta().seed != config.world.seed {
        warn!(
            "World {} was created with seed {}; configured seed {} ignored",
            config.world.name,
            format.meta().seed,
            config.world.seed
        );
    }

    let terrain = Terrain::new(registry);
    let mut report = load_spawn(
        &terrain,
        format.as_ref(),
        blocks,
        config.world.spawn_radius,
        config.workers.threads,
    )?;

    let interval = Duration::from_secs(config.world.auto_save_interval);
    loop {
        let event = if interval.is_zero() {
            shutdown.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            shutdown.recv_timeout(interval)
        };
        match event {
            Err(RecvTimeoutError::Timeout) => {
                // A failed auto-save leaves regions dirty for the next attempt.
                match save_dirty(&terrain, format.as_ref()) {
                    Ok(saved) => {
                        report.saved += saved;
                        info!("Auto-saved {saved} region(s)");
                    }
                    Err(e) => error!("Auto-save failed: {e}"),
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Saving world {}", config.world.name);
    report.saved += save_dirty(&terrain, format.as_ref())?;
    Ok(report)
}

/// Regions in a square of `radius` around the origin, in lock order.
pub fn spawn_area(radius: u32) -> Vec<RegionPos> {
    let side = (radius as usize).saturating_mul(2).saturating_add(1);
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    let mut positions = Vec::with_capacity(side.saturating_mul(side));
    for x in -r..=r {
        for z in -r..=r {
            positions.push(RegionPos::new(x, z));
        }
    }
    positions
}

/// Load every spawn region from storage, generating the missing ones.
/// Regions are handed out to `threads` workers, each with its own column buffer.
pub fn load_spawn(
    terrain: &Terrain,
    format: &dyn WorldFormat,
    blocks: &FlatBlocks,
    radius: u32,
    threads: usize,
) -> Result<RunReport, ServerError> {
    let queue = Mutex::new(spawn_area(radius));
    let loaded = AtomicUsize::new(0);
    let generated = AtomicUsize::new(0);
    let threads = threads.max(1);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| -> Result<(), ServerError> {
                    let mut column = ColumnBuffer::new();
                    loop {
                        let Some(pos) = queue.lock().pop() else {
                            return Ok(());
                        };
                        match format.load_region(pos)? {
                            Some(data) => {
                                terrain.insert_loaded(pos, data);
                                loaded.fetch_add(1, Ordering::Relaxed);
                            }
                            None => {
                                let region = terrain.get_or_create(pos);
                                let guard = region.lock();
                                let updates =
                                    generator::generate_region(&guard, blocks, &mut column)?;
                                debug!(
                                    "generated region ({}, {}), {updates} tile update(s) pending",
                                    pos.x, pos.z
                                );
                                generated.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        handles.into_iter().try_for_each(|handle| {
            handle.join().map_err(|_| ServerError::WorkerPanicked)?
        })
    })?;

    let report = RunReport {
        loaded: loaded.into_inner(),
        generated: generated.into_inner(),
        saved: 0,
    };
    info!(
        "Spawn area ready: {} loaded, {} generated",
        report.loaded, report.generated
    );
    Ok(report)
}

/// Persist every dirty region in one batch.
///
/// Locks are taken in ascending position order and held until the batch
/// commits, so no write lands between the snapshot and clearing the flag.
/// On failure the regions stay dirty.
pub fn save_dirty(terrain: &Terrain, format: &dyn WorldFormat) -> Result<usize, ServerError> {
    let dirty = terrain.dirty_regions();
    if dirty.is_empty() {
        return Ok(0);
    }
    let guards = lock_ordered(&dirty);
    let snapshots: Vec<(RegionPos, RegionData)> =
        guards.iter().map(|g| (g.pos(), g.snapshot())).collect();
    let batch: Vec<(RegionPos, &RegionData)> =
        snapshots.iter().map(|(pos, data)| (*pos, data)).collect();
    format.save_regions(&batch)?;
    for guard in &guards {
        guard.mark_clean();
    }
    debug!("saved {} dirty region(s)", guards.len());
    Ok(guards.len())
}
