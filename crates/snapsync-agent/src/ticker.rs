//! Fixed-interval synchronization driver.
//!
//! Each firing collapses accumulated state change and buffered input
//! into one envelope: compute deltas (when any entries are wrapped),
//! flush every input buffer, publish the envelope on `"sync"`, and
//! publish the raw delta frame on `"snapshot"`.
//!
//! Cadence is best-effort wall clock with `MissedTickBehavior::Skip`:
//! a firing delayed by a slow bus handler does not shift the schedule,
//! and missed firings are never replayed. Over an observation window
//! the firing count stays within one of `window / interval`.

use crate::config::SessionConfig;
use snapsync_core::{BufferShared, DeltaSet, EventBus, InputRegistry, Role, StateGraph};
use snapsync_proto::{topics, Envelope, Kind, SyncPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// The fixed-interval scheduler of one session.
pub struct Ticker {
    ctx: Arc<FireContext>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl Ticker {
    pub(crate) fn new(
        role: Role,
        config: &SessionConfig,
        bus: EventBus,
        graph: StateGraph,
        inputs: InputRegistry,
    ) -> Self {
        Self {
            ctx: Arc::new(FireContext {
                role,
                interval: config.interval,
                bus,
                graph,
                inputs,
                diagnostics: config.diagnostics,
                delta_cache: Mutex::new(None),
                running: AtomicBool::new(false),
                gate: Mutex::new(()),
                firing_on: Mutex::new(None),
            }),
            stop_tx: Mutex::new(None),
        }
    }

    /// Begin the recurring timer and the per-buffer samplers.
    ///
    /// Idempotent while already running. The first firing occurs one
    /// interval after start.
    pub fn start(&self) {
        let mut stop_tx = lock(&self.stop_tx);
        if stop_tx.is_some() {
            tracing::debug!("ticker already running");
            return;
        }

        let (tx, rx) = watch::channel(false);
        self.ctx.running.store(true, Ordering::SeqCst);

        spawn_driver(Arc::clone(&self.ctx), rx.clone());
        for shared in self.ctx.inputs.states() {
            spawn_sampler(shared, self.ctx.interval, rx.clone());
        }

        *stop_tx = Some(tx);
        tracing::debug!(interval = ?self.ctx.interval, "ticker started");
    }

    /// Cancel the timer.
    ///
    /// Idempotent while already stopped. Hard cutoff: once this
    /// returns, no further `"sync"` or `"snapshot"` events are emitted,
    /// including from a firing that was in flight.
    pub fn stop(&self) {
        let tx = lock(&self.stop_tx).take();
        let Some(tx) = tx else {
            tracing::debug!("ticker already stopped");
            return;
        };

        self.ctx.running.store(false, Ordering::SeqCst);
        let _ = tx.send(true);

        // When stop is invoked from a handler inside the current firing,
        // waiting on the gate would deadlock; the running flag already
        // suppresses that firing's remaining emissions.
        let current = std::thread::current().id();
        let reentrant = *lock(&self.ctx.firing_on) == Some(current);
        if !reentrant {
            drop(lock(&self.ctx.gate));
        }
        tracing::debug!("ticker stopped");
    }

    /// Whether the timer is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Attach a sampler for a buffer created while the ticker runs.
    pub(crate) fn watch_buffer(&self, shared: Arc<BufferShared>) {
        let stop_tx = lock(&self.stop_tx);
        if let Some(tx) = stop_tx.as_ref() {
            spawn_sampler(shared, self.ctx.interval, tx.subscribe());
        }
    }

    pub(crate) fn delta_cache(&self) -> Option<DeltaSet> {
        if !self.ctx.diagnostics {
            return None;
        }
        lock(&self.ctx.delta_cache).clone()
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("running", &self.is_running())
            .finish()
    }
}

struct FireContext {
    role: Role,
    interval: Duration,
    bus: EventBus,
    graph: StateGraph,
    inputs: InputRegistry,
    diagnostics: bool,
    delta_cache: Mutex<Option<DeltaSet>>,
    running: AtomicBool,
    gate: Mutex<()>,
    firing_on: Mutex<Option<ThreadId>>,
}

impl FireContext {
    fn fire(&self) {
        let _gate = lock(&self.gate);
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        *lock(&self.firing_on) = Some(std::thread::current().id());
        let _firing = FiringGuard(&self.firing_on);

        let deltas = if self.graph.is_empty() {
            None
        } else {
            Some(self.graph.compute_deltas())
        };
        if self.diagnostics {
            lock(&self.delta_cache).clone_from(&deltas);
        }
        let actions = self.inputs.flush_all();

        let payload = SyncPayload {
            deltas: deltas.clone().unwrap_or_default(),
            actions,
        };

        // Authoritative peers always publish so others can detect
        // liveness; everyone else stays quiet on empty intervals.
        if self.role.is_authoritative() || !payload.is_empty() {
            let envelope = Envelope::typed(Kind::Sync, &payload);
            if let Some(value) = envelope.to_value() {
                if self.running.load(Ordering::SeqCst) {
                    let handlers = self.bus.emit(topics::SYNC, std::slice::from_ref(&value));
                    tracing::trace!(
                        handlers,
                        deltas = payload.deltas.len(),
                        actions = payload.actions.len(),
                        "published sync envelope"
                    );
                }
            }
        }

        if let Some(deltas) = deltas {
            if self.running.load(Ordering::SeqCst) {
                let frame = serde_json::json!({ "deltas": deltas });
                self.bus.emit(topics::SNAPSHOT, std::slice::from_ref(&frame));
            }
        }
    }
}

struct FiringGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn spawn_driver(ctx: Arc<FireContext>, mut stop_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + ctx.interval, ctx.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = timer.tick() => ctx.fire(),
            }
        }
    });
}

fn spawn_sampler(shared: Arc<BufferShared>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let period = interval / shared.resolution().max(1);
    let weak = Arc::downgrade(&shared);
    drop(shared);

    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = timer.tick() => {
                    let Some(shared) = weak.upgrade() else { break };
                    shared.sample_tick();
                }
            }
        }
    });
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
