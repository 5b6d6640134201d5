//! Correlates pre and post hooks of one request to measure its duration.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::hooks::RequestId;
use crate::server::Server;

/// Start times keyed by server, then request.
///
/// Records leave the buffer when their post hook arrives or when their server
/// is purged, so the buffer only ever holds requests that are in flight.
#[derive(Debug, Default)]
pub struct TimingBuffer {
    records: Mutex<HashMap<Server, HashMap<RequestId, Instant>>>,
}

impl TimingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, server: &Server, id: RequestId) {
        self.start_at(server, id, Instant::now());
    }

    pub fn start_at(&self, server: &Server, id: RequestId, at: Instant) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.entry(server.clone()).or_default().insert(id, at);
    }

    /// Consumes the record and returns the elapsed time, or `None` if no
    /// matching start was recorded.
    pub fn finish(&self, server: &Server, id: RequestId) -> Option<Duration> {
        self.finish_at(server, id, Instant::now())
    }

    pub fn finish_at(&self, server: &Server, id: RequestId, at: Instant) -> Option<Duration> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = records.get_mut(server)?;
        let started = pending.remove(&id)?;
        if pending.is_empty() {
            records.remove(server);
        }
        Some(at.saturating_duration_since(started))
    }

    /// Drops every record of `server`, returning how many were pending.
    pub fn purge(&self, server: &Server) -> usize {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(server).map_or(0, |pending| pending.len())
    }

    pub fn pending(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.values().map(HashMap::len).sum()
    }

    pub fn has_pending(&self, server: &Server) -> bool {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.contains_key(server)
    }
}
