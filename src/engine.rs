//! The delta orchestrator.
//!
//! Serializes rebuilds against a mutable shared graph, decides resets
//! from the sequence-id handshake, fans out entry builds for changed
//! nodes and assembles the three response segments.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::entry::DeltaEntryBuilder;
use crate::error::DeltaError;
use crate::host::{GraphDiffService, ModuleResolver, ModuleTransformer};
use crate::ids::{IdAllocator, IdScope};
use crate::segments::{BundleOptions, SegmentAssembler};
use crate::types::{DeltaEntries, DeltaTransformResponse, ModuleId, SequenceId};

/// Incremental delta bundling engine.
///
/// One engine instance serializes all of its delta computations: at
/// most one build is in flight, and a second caller's work begins only
/// after the first build's future has resolved, successfully or not.
/// Builds never coalesce; each call performs its own full computation.
///
/// The graph snapshot and the id allocator are the only shared mutable
/// resources, and both are touched only from within one build episode.
pub struct DeltaEngine<G, R, T> {
    pub(crate) graph: Arc<G>,
    pub(crate) ids: Arc<IdAllocator>,
    builder: DeltaEntryBuilder<R, T>,
    segments: SegmentAssembler<R, T>,
    last_sequence_id: Mutex<Option<SequenceId>>,
    inflight: Mutex<Option<oneshot::Receiver<()>>>,
    change_tx: broadcast::Sender<()>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    ended: AtomicBool,
}

/// Releases the single-flight gate when dropped.
///
/// Dropping the sender resolves the receiver installed in the engine's
/// in-flight slot, so the gate releases on every exit path.
struct GateGuard {
    _release: oneshot::Sender<()>,
}

impl<G, R, T> DeltaEngine<G, R, T>
where
    G: GraphDiffService,
    R: ModuleResolver,
    T: ModuleTransformer,
{
    /// Create an engine over the external services.
    ///
    /// `scope` selects id sharing: [`IdScope::Shared`] couples ids with
    /// other engine instances holding the same allocator,
    /// [`IdScope::Isolated`] gives this instance a private table for
    /// reproducible ids independent of concurrent bundling activity.
    ///
    /// Must be called from within a tokio runtime: the engine spawns a
    /// task forwarding the graph service's change notifications to its
    /// own subscribers.
    pub fn new(
        graph: Arc<G>,
        resolver: Arc<R>,
        transformer: Arc<T>,
        options: BundleOptions,
        scope: IdScope,
    ) -> Self {
        let ids = scope.into_allocator();
        let builder = DeltaEntryBuilder::new(
            Arc::clone(&resolver),
            Arc::clone(&transformer),
            Arc::clone(&ids),
        );
        let segments = SegmentAssembler::new(resolver, transformer, Arc::clone(&ids), options);

        let (change_tx, _) = broadcast::channel(16);
        let forwarder = {
            let mut source = graph.subscribe();
            let sink = change_tx.clone();
            tokio::spawn(async move {
                loop {
                    match source.recv().await {
                        Ok(()) => {
                            let _ = sink.send(());
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            graph,
            ids,
            builder,
            segments,
            last_sequence_id: Mutex::new(None),
            inflight: Mutex::new(None),
            change_tx,
            forwarder: Mutex::new(Some(forwarder)),
            ended: AtomicBool::new(false),
        }
    }

    /// Compute the delta since the state identified by `client_id`.
    ///
    /// A mismatch between `client_id` and the last issued sequence id
    /// requests a reset; the graph-diff service has the final say and
    /// may force one regardless. On failure the in-flight gate is still
    /// released and the last sequence id is left unchanged.
    pub async fn get_delta(
        &self,
        client_id: Option<SequenceId>,
    ) -> Result<DeltaTransformResponse, DeltaError> {
        // Before the first successful build there is no handshake to
        // break: the first build resets by virtue of the empty graph.
        let reset_requested = {
            let last = self.last_sequence_id.lock();
            match last.as_ref() {
                Some(last) => client_id.as_ref() != Some(last),
                None => false,
            }
        };

        let _gate = self.acquire_gate().await;
        tracing::debug!(reset_requested, "delta build started");

        let response = self.compute(reset_requested).await?;

        tracing::debug!(
            reset = response.reset,
            entries = response.delta.len(),
            sequence_id = %response.id,
            "delta build finished"
        );
        *self.last_sequence_id.lock() = Some(response.id.clone());
        Ok(response)
    }

    /// Subscribe to change notifications forwarded from the graph
    /// service. One event per underlying file-system change batch,
    /// no payload, no coalescing.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.change_tx.subscribe()
    }

    /// Last successfully issued sequence id, if any build completed.
    pub fn last_sequence_id(&self) -> Option<SequenceId> {
        self.last_sequence_id.lock().clone()
    }

    /// Release subscriptions and delegate teardown to the graph
    /// service. Calling twice is a no-op.
    pub async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
        self.graph.end().await;
    }

    /// Await any in-flight build (discarding its outcome), then install
    /// this caller's receiver. Callers chain FIFO: each awaits its
    /// predecessor's guard drop before starting work.
    async fn acquire_gate(&self) -> GateGuard {
        let (release, next) = oneshot::channel();
        let previous = self.inflight.lock().replace(next);
        if let Some(previous) = previous {
            // RecvError just means the predecessor finished (its sender
            // dropped); failed builds release the gate the same way.
            let _ = previous.await;
        }
        GateGuard { _release: release }
    }

    async fn compute(&self, reset_requested: bool) -> Result<DeltaTransformResponse, DeltaError> {
        let options = self.graph.transform_options();
        let delta = self
            .graph
            .get_delta(reset_requested)
            .await
            .map_err(DeltaError::graph_diff)?;
        let reset = delta.reset;
        if reset && !reset_requested {
            tracing::info!("graph diff forced a full rebuild");
        }

        let pre = if reset {
            self.segments.prepend(&options).await?
        } else {
            DeltaEntries::new()
        };

        // Prime ids for every modified path in diff enumeration order,
        // before any entry build starts. Wrapping reads dependency ids,
        // so the fan-out below must never be the first to assign one.
        for edge in &delta.modified {
            self.ids.id(&edge.path);
        }

        let builds = delta
            .modified
            .iter()
            .map(|edge| self.builder.build(edge, &options));
        let mut built = futures::future::try_join_all(builds).await?;
        built.sort_by_key(|(id, _)| *id);

        let mut main = DeltaEntries::new();
        for (id, entry) in built {
            main.insert(id, entry);
        }
        let mut deleted_ids: Vec<ModuleId> = delta
            .deleted
            .iter()
            .filter_map(|path| self.ids.known_id(path))
            .collect();
        deleted_ids.sort();
        for id in deleted_ids {
            main.insert_tombstone(id);
        }

        let post = if reset {
            let snapshot = self.graph.get_graph().await.map_err(DeltaError::graph_diff)?;
            self.segments.append(&snapshot).await?
        } else {
            DeltaEntries::new()
        };

        Ok(DeltaTransformResponse {
            id: SequenceId::generate(),
            pre,
            post,
            delta: main,
            reset,
        })
    }
}
