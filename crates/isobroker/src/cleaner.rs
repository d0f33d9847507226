//! # LRU cleaner
//!
//! A `WorkerCleaner` that tracks live workers and evicts the least recently
//! used one when a new worker pushes the pool over a worker count, or the
//! process over a memory ceiling.
//!
//! Eviction goes through `WorkerBroker::remove_worker`; the `Remove` event that
//! follows terminates the worker. Recency is a logical clock ticked on every
//! create and get, so ties cannot occur.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;

use url::Url;

use crate::broker::LifecycleEvent;
use crate::broker::WorkerBroker;
use crate::broker::WorkerCleaner;
use crate::broker::WorkerEvent;
use crate::broker::WorkerEventKind;
use crate::debug::debug_log;

#[derive(Clone, Copy, Debug, Default)]
pub struct CleanerOptions {
    /// Evict once more than this many workers are live. `Some(0)` is the
    /// same as `None`.
    pub worker_count: Option<usize>,
    /// Evict once the resident set size reaches this many bytes. Only
    /// enforced on Linux.
    pub memory_ceiling: Option<u64>,
}

struct Tracked {
    module: Url,
    segregation_id: Option<String>,
    last_access: u64,
}

#[derive(Default)]
struct State {
    workers: HashMap<String, Tracked>,
    clock: u64,
}

pub struct LruCleaner {
    options: CleanerOptions,
    state: Mutex<State>,
}

/// Shorthand for `LruCleaner::new`.
pub fn cleaner(options: CleanerOptions) -> LruCleaner {
    LruCleaner::new(options)
}

impl LruCleaner {
    pub fn new(options: CleanerOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
        }
    }

    /// Number of workers currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().workers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_access(&self, event: &WorkerEvent<'_>) {
        let mut state = self.lock();
        state.clock += 1;
        let now = state.clock;
        state
            .workers
            .entry(event.key.to_string())
            .and_modify(|tracked| tracked.last_access = now)
            .or_insert_with(|| Tracked {
                module: event.module.clone(),
                segregation_id: event.segregation_id.map(str::to_string),
                last_access: now,
            });
    }

    fn memory_ceiling_exceeded(&self) -> bool {
        match (self.options.memory_ceiling, resident_set_size()) {
            (Some(ceiling), Some(rss)) => rss >= ceiling,
            _ => false,
        }
    }

    fn worker_count_exceeded(&self) -> bool {
        match self.options.worker_count {
            Some(limit) if limit > 0 => self.lock().workers.len() > limit,
            _ => false,
        }
    }

    /// Stops tracking the least recently used worker and hands it back.
    fn take_least_recently_used(&self) -> Option<(String, Tracked)> {
        let mut state = self.lock();
        let key = state
            .workers
            .iter()
            .min_by_key(|(_, tracked)| tracked.last_access)
            .map(|(key, _)| key.clone())?;
        state.workers.remove_entry(&key)
    }

    fn evict_least_recently_used(&self, broker: &WorkerBroker) {
        // The lock is released here; remove_worker calls back into on_event.
        let Some((key, tracked)) = self.take_least_recently_used() else {
            return;
        };
        debug_log!("evicting least recently used worker: {}", key);
        if let Err(e) = broker.remove_worker(&tracked.module, tracked.segregation_id.as_deref()) {
            tracing::warn!(%key, error = %e, "could not evict worker");
        }
    }

    fn on_worker_event(&self, event: &WorkerEvent<'_>) {
        match event.kind {
            WorkerEventKind::Remove => {
                self.lock().workers.remove(event.key);
                debug_log!("worker cleaned out: {}", event.key);
                event.worker.terminate();
            }
            WorkerEventKind::Get => self.record_access(event),
            WorkerEventKind::Create => {
                self.record_access(event);
                if self.memory_ceiling_exceeded() {
                    debug_log!("memory ceiling exceeded");
                    self.evict_least_recently_used(event.broker);
                }
                if self.worker_count_exceeded() {
                    debug_log!("worker count exceeded");
                    self.evict_least_recently_used(event.broker);
                }
            }
        }
    }
}

impl WorkerCleaner for LruCleaner {
    fn on_event(&self, event: &LifecycleEvent<'_>) {
        match event {
            LifecycleEvent::Worker(event) => self.on_worker_event(event),
            LifecycleEvent::Terminate { .. } => self.lock().workers.clear(),
        }
    }
}

/// Resident set size of this process, in bytes.
///
/// Read from the `VmRSS` line of `/proc/self/status`, which the kernel reports
/// in KiB whatever the page size.
#[cfg(target_os = "linux")]
pub fn resident_set_size() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_set_size() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
