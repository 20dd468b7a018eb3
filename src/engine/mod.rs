pub mod actors;

use parking_lot::Mutex;
use serde_json::json;
use std::mem;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::ids::IdSet;
use crate::data::slice::TableSlice;
use crate::engine::actors::{spawn_meta, spawn_store, MetaHandle, StoreHandle};
use crate::expr::normalize::{normalize, resolve};
use crate::expr::parser::parse;
use crate::index::MetaIndex;
use crate::query::client::{query_channel, QueryHandle};
use crate::query::pipeline::{PipelineConfig, QueryPipeline};
use crate::schema::registry::TypeRegistry;
use crate::schema::taxonomy::Taxonomies;
use crate::storage::layout::DbLayout;
use crate::storage::store::{SealedPartition, SegmentStore};
use crate::synopsis::PartitionSynopsisBuilder;

/// Serializes the put path and couples the active segment builder to the
/// synopsis builder that will describe it once sealed.
struct IngestState {
    synopsis: PartitionSynopsisBuilder,
}

/// The assembled engine: a segment-store actor, a meta-index actor, the
/// query pipeline, and the schema registry, wired together over channels.
pub struct Engine {
    config: Config,
    layout: DbLayout,
    store: StoreHandle,
    meta: MetaHandle,
    pipeline: QueryPipeline,
    registry: Mutex<TypeRegistry>,
    taxonomies: Taxonomies,
    ingest: Mutex<IngestState>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Opens (or creates) the database under `config.db_directory` and
    /// spawns the actors. Fails fast on invalid configuration.
    pub fn open(config: Config) -> Result<Engine> {
        config.validate()?;
        let layout = DbLayout::new(&config.db_directory)?;
        let store_state = SegmentStore::open(
            &config.db_directory,
            config.max_segment_size,
            config.segments_cached,
        )?;
        let meta_state = MetaIndex::load(layout.meta_index_dir())?;
        let registry = if layout.type_registry_path().exists() {
            match TypeRegistry::load(&layout.type_registry_path()) {
                Ok(registry) => registry,
                Err(err) => {
                    warn!(%err, "failed to load type registry, starting empty");
                    TypeRegistry::new()
                }
            }
        } else {
            TypeRegistry::new()
        };
        info!(
            db = %config.db_directory.display(),
            partitions = meta_state.len(),
            "engine starting"
        );
        let (store, store_thread) = spawn_store(store_state);
        let (meta, meta_thread) = spawn_meta(meta_state, layout.meta_index_dir().to_path_buf());
        let pipeline = QueryPipeline::new(store.clone(), meta.clone(), PipelineConfig::from(&config));
        let ingest = IngestState {
            synopsis: PartitionSynopsisBuilder::new(config.meta_index_fp_rate),
        };
        Ok(Engine {
            layout,
            store,
            meta,
            pipeline,
            registry: Mutex::new(registry),
            taxonomies: Taxonomies::new(),
            ingest: Mutex::new(ingest),
            threads: Mutex::new(vec![store_thread, meta_thread]),
            config,
        })
    }

    pub fn set_taxonomies(&mut self, taxonomies: Taxonomies) {
        self.taxonomies = taxonomies;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingests one table slice. Rolls the shard over when either the byte
    /// threshold or the target event count is reached, installing the frozen
    /// synopsis in the meta-index under the new segment's UUID.
    pub fn ingest(&self, slice: TableSlice) -> Result<()> {
        if slice.is_empty() {
            return Ok(());
        }
        let mut ingest = self.ingest.lock();
        self.registry.lock().insert(slice.layout.clone());
        ingest.synopsis.add_slice(&slice);
        let mut sealed = self.store.put(slice)?;
        if sealed.is_none() && ingest.synopsis.events() >= self.config.max_partition_size {
            sealed = self.store.flush()?;
        }
        if let Some(sealed) = sealed {
            self.install_partition(&mut ingest, &sealed)?;
        }
        Ok(())
    }

    fn install_partition(&self, ingest: &mut IngestState, sealed: &SealedPartition) -> Result<()> {
        let fp_rate = self.config.meta_index_fp_rate;
        let builder = mem::replace(&mut ingest.synopsis, PartitionSynopsisBuilder::new(fp_rate));
        self.meta.insert(sealed.id, builder.seal())
    }

    /// Seals the active shard regardless of size; used at shutdown.
    pub fn flush(&self) -> Result<()> {
        let mut ingest = self.ingest.lock();
        if let Some(sealed) = self.store.flush()? {
            self.install_partition(&mut ingest, &sealed)?;
        }
        Ok(())
    }

    /// Parses, resolves, and normalizes an expression, then starts the
    /// staged evaluation. The returned handle streams matching slices as
    /// the client grants credit.
    pub fn query(&self, text: &str, deadline: Option<Duration>) -> Result<QueryHandle> {
        let snapshot = self.registry.lock().snapshot();
        let schema = if snapshot.is_empty() {
            None
        } else {
            Some(&snapshot)
        };
        let expr = parse(text, schema)?;
        let expr = normalize(resolve(&self.taxonomies, expr)?);
        let (handle, sink) = query_channel(deadline.map(|d| Instant::now() + d));
        self.pipeline.submit(expr, sink);
        Ok(handle)
    }

    /// The number of events matching an expression.
    pub fn count(&self, text: &str) -> Result<u64> {
        let slices = self.query(text, None)?.collect()?;
        Ok(slices.iter().map(TableSlice::len).sum())
    }

    /// Retrieves events by literal id, bypassing the meta-index.
    pub fn get(&self, ids: IdSet) -> Result<Vec<TableSlice>> {
        self.store.get(ids)
    }

    /// Erases events by id. Fully covered segments are dropped together
    /// with their meta-index entries and persisted synopses; partially
    /// covered segments are rewritten without the overlap.
    pub fn erase(&self, ids: IdSet) -> Result<()> {
        // Seal pending data first so the erase only deals with sealed state.
        self.flush()?;
        let dropped = self.store.erase(ids)?;
        for partition in dropped {
            self.meta.erase(partition)?;
        }
        Ok(())
    }

    /// A JSON status document.
    pub fn status(&self, detailed: bool) -> Result<serde_json::Value> {
        let store = self.store.status()?;
        let meta = self.meta.status()?;
        let mut status = json!({
            "store": {
                "segments": store.segments,
                "events": store.events,
            },
            "meta-index": {
                "partitions": meta.partitions,
            },
        });
        if detailed {
            status["store"]["cached-segments"] = json!(store.cached_segments);
            status["store"]["dirty"] = json!(store.dirty);
            status["meta-index"]["memory-usage"] = json!(meta.memusage);
            status["config"] = json!({
                "db-directory": self.config.db_directory.display().to_string(),
                "max-partition-size": self.config.max_partition_size,
                "max-resident-partitions": self.config.max_resident_partitions,
                "max-taste-partitions": self.config.max_taste_partitions,
                "max-queries": self.config.max_queries,
                "max-segment-size": self.config.max_segment_size,
                "segments-cached": self.config.segments_cached,
            });
        }
        Ok(status)
    }

    /// Flushes state, persists the schema registry, and stops the actors.
    /// Actors that linger past the grace period are abandoned.
    pub fn shutdown(self) -> Result<()> {
        self.flush()?;
        {
            let registry = self.registry.lock();
            registry.save(&self.layout.type_registry_path())?;
            crate::storage::frame::write_file(&self.layout.schema_path(), &registry.snapshot())?;
        }
        let grace = self.config.shutdown_grace_period;
        let mut clean = true;
        for done in [self.store.shutdown()?, self.meta.shutdown()?] {
            if done.recv_timeout(grace).is_err() {
                warn!("actor did not stop within the grace period, abandoning it");
                clean = false;
            }
        }
        if clean {
            for thread in self.threads.lock().drain(..) {
                let _ = thread.join();
            }
        }
        info!("engine stopped");
        Ok(())
    }
}

/// Maps an error kind to the process exit code contract: 0 success, 1
/// generic failure, 2 configuration error.
pub fn exit_code(error: &Error) -> i32 {
    match error.kind {
        ErrorKind::InvalidConfiguration => 2,
        _ => 1,
    }
}
