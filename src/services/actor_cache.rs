//! TTL cache for actor-identity to profile-id resolution.
//!
//! Profile lookups hit the directory collaborator; results (including
//! "no profile") are cached for a short window keyed by actor identity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct CacheSlot {
    profile_id: Option<Uuid>,
    cached_at: Instant,
}

/// Explicit get/insert/expire cache with per-entry TTL.
pub struct ActorProfileCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl ActorProfileCache {
    /// Default TTL for resolved profiles.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Cache hit distinguishes "known to have no profile" (`Some(None)`)
    /// from a miss (`None`). Expired entries are removed on access.
    pub fn get(&self, actor_id: &str) -> Option<Option<Uuid>> {
        let mut slots = self.slots.lock().expect("actor cache poisoned");
        match slots.get(actor_id) {
            Some(slot) if slot.cached_at.elapsed() < self.ttl => Some(slot.profile_id),
            Some(_) => {
                slots.remove(actor_id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, actor_id: &str, profile_id: Option<Uuid>) {
        let mut slots = self.slots.lock().expect("actor cache poisoned");
        slots.insert(
            actor_id.to_string(),
            CacheSlot {
                profile_id,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop one entry, forcing the next lookup to hit the directory.
    pub fn invalidate(&self, actor_id: &str) {
        let mut slots = self.slots.lock().expect("actor cache poisoned");
        slots.remove(actor_id);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let mut slots = self.slots.lock().expect("actor cache poisoned");
        slots.retain(|_, slot| slot.cached_at.elapsed() < self.ttl);
    }
}

impl Default for ActorProfileCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
