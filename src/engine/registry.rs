// src/engine/registry.rs

//! In-memory registry of live workers, pending retries and progress
//! callbacks for one supervisor.
//!
//! A single mutex guards all three maps. It is never held across an await:
//! callers take a snapshot, release the lock, then do their I/O or waiting.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ProgressCallback;

#[derive(Debug)]
struct LiveEntry {
    generation: u64,
    cancel: CancellationToken,
    pid: Option<u32>,
    paused: bool,
    done: watch::Receiver<bool>,
}

/// Handed to the worker that owns a fresh live entry.
#[derive(Debug)]
pub struct Registration {
    pub generation: u64,
    pub cancel: CancellationToken,
    /// Flipped to `true` once the worker has fully finished.
    pub done: watch::Sender<bool>,
}

/// Point-in-time copy of a live entry.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub generation: u64,
    pub cancel: CancellationToken,
    pub pid: Option<u32>,
    pub paused: bool,
    pub done: watch::Receiver<bool>,
}

#[derive(Debug)]
struct PendingRetry {
    ticket: u64,
    cancel: CancellationToken,
    attempt: u32,
}

/// Identifies one scheduled retry; see [`LiveRegistry::promote_retry`].
#[derive(Debug, Clone)]
pub struct RetryTicket {
    pub ticket: u64,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<String, LiveEntry>,
    retries: HashMap<String, PendingRetry>,
    callbacks: HashMap<String, ProgressCallback>,
    next_generation: u64,
    next_ticket: u64,
}

#[derive(Default)]
pub struct LiveRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for LiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LiveRegistry")
            .field("live", &state.live.keys().collect::<Vec<_>>())
            .field("retries", &state.retries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryState {
    fn register(&mut self, id: &str) -> Option<Registration> {
        if self.live.contains_key(id) {
            return None;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.live.insert(
            id.to_string(),
            LiveEntry {
                generation,
                cancel: cancel.clone(),
                pid: None,
                paused: false,
                done: done_rx,
            },
        );

        Some(Registration {
            generation,
            cancel,
            done: done_tx,
        })
    }
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically claim `id`. `None` if a live entry already exists.
    pub fn try_register(&self, id: &str) -> Option<Registration> {
        self.lock().register(id)
    }

    /// Drop the live entry, but only if it still belongs to `generation`.
    pub fn unregister(&self, id: &str, generation: u64) -> bool {
        let mut state = self.lock();
        match state.live.get(id) {
            Some(entry) if entry.generation == generation => {
                state.live.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn set_pid(&self, id: &str, generation: u64, pid: u32) {
        if let Some(entry) = self.lock().live.get_mut(id) {
            if entry.generation == generation {
                entry.pid = Some(pid);
            }
        }
    }

    /// Returns false when there is no live entry to flag.
    pub fn set_paused(&self, id: &str, paused: bool) -> bool {
        match self.lock().live.get_mut(id) {
            Some(entry) => {
                entry.paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<LiveSnapshot> {
        self.lock().live.get(id).map(|entry| LiveSnapshot {
            generation: entry.generation,
            cancel: entry.cancel.clone(),
            pid: entry.pid,
            paused: entry.paused,
            done: entry.done.clone(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().live.contains_key(id)
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.lock().live.get(id).is_some_and(|e| e.paused)
    }

    pub fn pid(&self, id: &str) -> Option<u32> {
        self.lock().live.get(id).and_then(|e| e.pid)
    }

    /// No live workers and no pending retries.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.live.is_empty() && state.retries.is_empty()
    }

    pub fn live_ids(&self) -> HashSet<String> {
        self.lock().live.keys().cloned().collect()
    }

    /// Record a pending retry, superseding (and cancelling) any earlier one.
    pub fn insert_retry(&self, id: &str, attempt: u32) -> RetryTicket {
        let cancel = CancellationToken::new();
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let previous = state.retries.insert(
            id.to_string(),
            PendingRetry {
                ticket,
                cancel: cancel.clone(),
                attempt,
            },
        );
        drop(state);

        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        RetryTicket { ticket, cancel }
    }

    /// Turn the pending retry identified by `ticket` into a live entry.
    ///
    /// `None` if the retry was cancelled or replaced, or if a live entry
    /// already exists (the retry is then dropped). The swap happens under one
    /// lock, so the record is never seen idle between attempts.
    pub fn promote_retry(&self, id: &str, ticket: u64) -> Option<Registration> {
        let mut state = self.lock();
        let ours = state
            .retries
            .get(id)
            .is_some_and(|p| p.ticket == ticket && !p.cancel.is_cancelled());
        if !ours {
            return None;
        }
        state.retries.remove(id);
        state.register(id)
    }

    /// Cancel the pending retry for `id`. Returns whether there was one.
    pub fn cancel_retry(&self, id: &str) -> bool {
        let removed = self.lock().retries.remove(id);
        match removed {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_retry(&self, id: &str) -> bool {
        self.lock().retries.contains_key(id)
    }

    pub fn pending_retry_attempt(&self, id: &str) -> Option<u32> {
        self.lock().retries.get(id).map(|p| p.attempt)
    }

    pub fn set_callback(&self, id: &str, callback: ProgressCallback) {
        self.lock().callbacks.insert(id.to_string(), callback);
    }

    pub fn callback(&self, id: &str) -> Option<ProgressCallback> {
        self.lock().callbacks.get(id).cloned()
    }

    pub fn remove_callback(&self, id: &str) {
        self.lock().callbacks.remove(id);
    }
}
