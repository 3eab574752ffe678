//! Rendezvous room store
//!
//! A Host registers a room code so a Guest can resolve it to the Host's
//! peer id. The store is an injected collaborator with explicit TTL
//! eviction, not a global map: the embedding service owns one instance and
//! decides when to sweep it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ============================================================================
// Lookup Result
// ============================================================================

/// Outcome of resolving a room code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Whether a live registration exists for the room
    pub found: bool,
    /// Registered peer id (when found)
    pub peer_id: Option<String>,
    /// Registered display name (when found)
    pub display_name: Option<String>,
}

impl LookupResult {
    /// A miss
    pub fn not_found() -> Self {
        Self {
            found: false,
            peer_id: None,
            display_name: None,
        }
    }

    /// A hit for the given registration
    pub fn found(peer_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            found: true,
            peer_id: Some(peer_id.into()),
            display_name: Some(display_name.into()),
        }
    }
}

// ============================================================================
// Room Store
// ============================================================================

#[derive(Debug, Clone)]
struct RoomEntry {
    peer_id: String,
    display_name: String,
    registered_at: Instant,
}

/// In-memory room-to-peer mapping with TTL eviction
#[derive(Debug)]
pub struct RoomStore {
    rooms: HashMap<String, RoomEntry>,
    ttl: Duration,
}

impl RoomStore {
    /// Create a store whose registrations live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            ttl,
        }
    }

    /// Register (or refresh) a room mapping
    pub fn register(
        &mut self,
        room_id: impl Into<String>,
        peer_id: impl Into<String>,
        display_name: impl Into<String>,
        now: Instant,
    ) {
        let room_id = room_id.into();
        let entry = RoomEntry {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            registered_at: now,
        };
        log::info!("Registering room '{}' for peer '{}'", room_id, entry.peer_id);
        self.rooms.insert(room_id, entry);
    }

    /// Resolve a room code; expired registrations report a miss
    pub fn lookup(&self, room_id: &str, now: Instant) -> LookupResult {
        match self.rooms.get(room_id) {
            Some(entry) if now.duration_since(entry.registered_at) < self.ttl => {
                LookupResult::found(entry.peer_id.clone(), entry.display_name.clone())
            }
            Some(_) => LookupResult::not_found(),
            None => LookupResult::not_found(),
        }
    }

    /// Remove a room mapping; returns whether one existed
    pub fn deregister(&mut self, room_id: &str) -> bool {
        let removed = self.rooms.remove(room_id).is_some();
        if removed {
            log::info!("Deregistered room '{}'", room_id);
        }
        removed
    }

    /// Drop every expired registration; returns how many were evicted
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.rooms.len();
        self.rooms
            .retain(|_, entry| now.duration_since(entry.registered_at) < ttl);
        let evicted = before - self.rooms.len();
        if evicted > 0 {
            log::debug!("Evicted {} expired room registrations", evicted);
        }
        evicted
    }

    /// Number of stored registrations (live or not yet evicted)
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
