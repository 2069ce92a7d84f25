/// In-flight idempotency guard
///
/// Observations and feedback events can be delivered more than once (client
/// retries, replays of the event stream). The history repository is the durable
/// record of what was folded; this guard sits in front of it so that two
/// concurrent deliveries of the same id cannot both reach the model updater.
///
/// # Guarantees
/// - O(1) claim per event (DashMap entry)
/// - TTL-based cleanup (no unbounded growth)
/// - A failed fold releases its claim so the event can be retried
use crate::models::UserId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Observation(String),
    Feedback(String),
}

impl EventKey {
    fn id(&self) -> &str {
        match self {
            EventKey::Observation(id) | EventKey::Feedback(id) => id,
        }
    }
}

pub struct IdempotencyGuard {
    seen: DashMap<(UserId, EventKey), Instant>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// `true` when the caller is the first (unexpired) claimant of the event
    pub fn claim(&self, user_id: UserId, key: EventKey) -> bool {
        let now = Instant::now();
        match self.seen.entry((user_id, key)) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) > self.ttl {
                    occupied.insert(now);
                    true
                } else {
                    debug!(
                        user_id = %user_id,
                        event_id = occupied.key().1.id(),
                        "Duplicate event skipped"
                    );
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    pub fn release(&self, user_id: UserId, key: &EventKey) {
        self.seen.remove(&(user_id, key.clone()));
    }

    pub fn forget_user(&self, user_id: UserId) {
        self.seen.retain(|(owner, _), _| *owner != user_id);
    }

    /// Drop expired claims; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.seen.len();
        let ttl = self.ttl;
        self.seen.retain(|_, claimed_at| claimed_at.elapsed() <= ttl);

        let removed = before.saturating_sub(self.seen.len());
        if removed > 0 {
            info!(
                removed,
                remaining = self.seen.len(),
                "Cleaned up expired idempotency entries"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
