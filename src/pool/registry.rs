//! Registry of execution units and their rolling performance stats.
//!
//! Owned exclusively by the scheduler loop; callers only ever see
//! [`UnitSummary`] snapshots. Iteration order is deterministic (`BTreeMap`),
//! which is what breaks load-balancing ties.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::unit::{ResourceUsage, UnitHandle, UnitKind, UnitState};

/// Registry-side record of one execution unit
#[derive(Debug)]
pub struct UnitRecord {
    pub id: Uuid,
    pub kind: UnitKind,
    pub state: UnitState,
    /// Task currently assigned, at most one
    pub current_task: Option<Uuid>,
    /// Cumulative completed-task count
    pub completed: u64,
    /// Cumulative processing time across completed tasks
    pub busy_time: Duration,
    pub last_heartbeat: Instant,
    pub usage: ResourceUsage,
    /// Set when the unit's assigned task timed out; the unit is no longer
    /// trusted and is reclaimed if it stays silent past the staleness window
    pub suspect_since: Option<Instant>,
    pub handle: UnitHandle,
}

impl UnitRecord {
    /// Average processing time across completed tasks; zero until the first
    /// completion so fresh units score best
    #[must_use]
    pub fn avg_processing(&self) -> Duration {
        if self.completed == 0 {
            Duration::ZERO
        } else {
            self.busy_time / u32::try_from(self.completed).unwrap_or(u32::MAX)
        }
    }
}

/// Read-only unit view returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub id: Uuid,
    pub kind: UnitKind,
    pub state: UnitState,
    pub current_task: Option<Uuid>,
    pub completed: u64,
    pub avg_processing_ms: u64,
    pub heartbeat_age_ms: u64,
}

/// Registry of all execution units
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: BTreeMap<Uuid, UnitRecord>,
}

impl UnitRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned unit in `Initializing` state
    pub fn insert(&mut self, id: Uuid, kind: UnitKind, handle: UnitHandle) {
        self.units.insert(
            id,
            UnitRecord {
                id,
                kind,
                state: UnitState::Initializing,
                current_task: None,
                completed: 0,
                busy_time: Duration::ZERO,
                last_heartbeat: Instant::now(),
                usage: ResourceUsage::default(),
                suspect_since: None,
                handle,
            },
        );
    }

    /// Remove a unit, returning its record (caller aborts the join handle)
    pub fn remove(&mut self, id: Uuid) -> Option<UnitRecord> {
        self.units.remove(&id)
    }

    /// Get a unit by id
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&UnitRecord> {
        self.units.get(&id)
    }

    /// Get a unit mutably by id
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut UnitRecord> {
        self.units.get_mut(&id)
    }

    /// Deterministic iteration over all units
    pub fn iter(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    /// Mutable iteration over all units
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UnitRecord> {
        self.units.values_mut()
    }

    /// Ids of units in `Ready` state
    #[must_use]
    pub fn idle_ids(&self) -> Vec<Uuid> {
        self.units
            .values()
            .filter(|u| u.state == UnitState::Ready)
            .map(|u| u.id)
            .collect()
    }

    /// Number of units in `Ready` state
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.units
            .values()
            .filter(|u| u.state == UnitState::Ready)
            .count()
    }

    /// Number of units in `Busy` state
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.units
            .values()
            .filter(|u| u.state == UnitState::Busy)
            .count()
    }

    /// Total tracked units
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Record a completed task on a unit and release it back to ready
    pub fn record_completion(&mut self, id: Uuid, elapsed: Duration) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.completed += 1;
            unit.busy_time += elapsed;
            unit.current_task = None;
            unit.suspect_since = None;
            unit.state = UnitState::Ready;
        }
    }

    /// Release a unit back to ready without crediting a completion
    pub fn release(&mut self, id: Uuid) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.current_task = None;
            unit.suspect_since = None;
            unit.state = UnitState::Ready;
        }
    }

    /// Refresh a unit's heartbeat timestamp and resource figures
    pub fn heartbeat(&mut self, id: Uuid, usage: ResourceUsage) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.last_heartbeat = Instant::now();
            unit.usage = usage;
        }
    }

    /// Caller-facing summaries in deterministic order
    #[must_use]
    pub fn summaries(&self) -> Vec<UnitSummary> {
        self.units
            .values()
            .map(|u| UnitSummary {
                id: u.id,
                kind: u.kind,
                state: u.state,
                current_task: u.current_task,
                completed: u.completed,
                avg_processing_ms: u64::try_from(u.avg_processing().as_millis())
                    .unwrap_or(u64::MAX),
                heartbeat_age_ms: u64::try_from(u.last_heartbeat.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
            })
            .collect()
    }
}
