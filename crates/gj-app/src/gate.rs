use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gj_core::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Bounds how many GPU jobs run at once. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    id: Arc<str>,
    slots: usize,
    semaphore: Arc<Semaphore>,
}

/// The right to occupy one device slot. Released when dropped, whatever path
/// the job took.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<str>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Permit {
    fn drop(&mut self) {
        debug!(gate = %self.gate, "device slot released");
    }
}

impl ConcurrencyGate {
    pub fn new(id: &str, slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            id: Arc::from(id),
            slots,
            semaphore: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit, Error> {
        if self.available() == 0 {
            info!(gate = %self.id, slots = self.slots, "all device slots busy, queueing job");
        }
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::GenerationFailed {
                code: None,
                diagnostics: format!("concurrency gate '{}' is closed", self.id),
            })?;
        debug!(gate = %self.id, "device slot acquired");

        Ok(Permit {
            gate: Arc::clone(&self.id),
            _permit: permit,
        })
    }
}

/// Hands out one shared gate per concurrency id, so every entry point that
/// names the same id competes for the same slots.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: Mutex<HashMap<String, ConcurrencyGate>>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate for `id`, created with `slots` on first use. Later calls
    /// return the existing gate regardless of `slots`.
    pub fn gate(&self, id: &str, slots: usize) -> ConcurrencyGate {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates
            .entry(id.to_string())
            .or_insert_with(|| ConcurrencyGate::new(id, slots))
            .clone()
    }
}
