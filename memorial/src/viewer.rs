//! Per-viewer controller state.
//!
//! Each browser session owns its own guestbook and gallery controllers. A
//! viewer runs one action at a time; a second request while one is in flight
//! is refused instead of queued.

use crate::error::{MemorialError, Result};
use crate::gallery::GalleryFeed;
use crate::guestbook::GuestbookFeed;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::interval;
use uuid::Uuid;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const MAX_VIEWERS: usize = 4096;

pub struct Viewer {
    pub guestbook: GuestbookFeed,
    pub gallery: GalleryFeed,
}

struct Slot {
    state: Arc<AsyncMutex<Viewer>>,
    last_seen: Instant,
}

type Factory = Box<dyn Fn() -> Viewer + Send + Sync>;

pub struct ViewerRegistry {
    slots: Mutex<HashMap<Uuid, Slot>>,
    factory: Factory,
    idle: Duration,
    capacity: usize,
}

impl ViewerRegistry {
    /// Viewers beyond `capacity` push out the least recently seen idle ones.
    pub fn new(
        factory: impl Fn() -> Viewer + Send + Sync + 'static,
        idle: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
            idle,
            capacity: capacity.max(1),
        }
    }

    /// Lock the state of viewer `id`, creating a fresh viewer when the id is
    /// missing, malformed or unknown. Returns the id actually used.
    pub fn acquire(&self, id: Option<&str>) -> Result<(Uuid, OwnedMutexGuard<Viewer>)> {
        let requested = id.and_then(|s| Uuid::parse_str(s.trim()).ok());
        let (id, state) = {
            let mut slots = self.slots.lock();
            let id = match requested.filter(|id| slots.contains_key(id)) {
                Some(id) => id,
                None => {
                    make_room(&mut slots, self.capacity);
                    Uuid::new_v4()
                }
            };
            let slot = slots.entry(id).or_insert_with(|| Slot {
                state: Arc::new(AsyncMutex::new((self.factory)())),
                last_seen: Instant::now(),
            });
            slot.last_seen = Instant::now();
            (id, slot.state.clone())
        };
        let guard = state.try_lock_owned().map_err(|_| MemorialError::Busy)?;
        Ok((id, guard))
    }

    /// Drop viewers idle for longer than the timeout and not mid-action.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            now.duration_since(slot.last_seen) < self.idle || Arc::strong_count(&slot.state) > 1
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// viewers mid-action are never dropped, so a burst of busy ones can overshoot
fn make_room(slots: &mut HashMap<Uuid, Slot>, capacity: usize) {
    while slots.len() >= capacity {
        let oldest = slots
            .iter()
            .filter(|(_, slot)| Arc::strong_count(&slot.state) == 1)
            .min_by_key(|(_, slot)| slot.last_seen)
            .map(|(id, _)| *id);
        match oldest {
            Some(id) => {
                slots.remove(&id);
            }
            None => break,
        }
    }
}

/// Periodically evict idle viewers.
pub fn spawn_housekeeping(registry: Arc<ViewerRegistry>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = interval(every);
        loop {
            tick.tick().await;
            let evicted = registry.evict_idle();
            if evicted > 0 {
                tracing::debug!(evicted, remaining = registry.len(), "evicted idle viewers");
            }
        }
    });
}
