//! Holder for the newest published territory.
//!
//! Builds may overlap; the one that *started* last wins. A build takes a
//! ticket before it starts and can only publish if no later ticket has
//! published in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::types::TerritoryData;

/// Generation number handed out by [`LatestTerritory::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BuildTicket(u64);

impl BuildTicket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct LatestTerritory {
    issued: AtomicU64,
    current: RwLock<Option<(BuildTicket, Arc<TerritoryData>)>>,
}

impl LatestTerritory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> BuildTicket {
        BuildTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Publish `data` for `ticket`. Returns `false`, leaving the newer
    /// snapshot in place, if a later build already published.
    pub fn publish(&self, ticket: BuildTicket, data: TerritoryData) -> bool {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((published, _)) = current.as_ref() {
            if *published > ticket {
                tracing::debug!(
                    stale = ticket.generation(),
                    current = published.generation(),
                    "discarding superseded territory build"
                );
                return false;
            }
        }
        *current = Some((ticket, Arc::new(data)));
        true
    }

    pub fn current(&self) -> Option<Arc<TerritoryData>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(_, data)| Arc::clone(data))
    }
}
