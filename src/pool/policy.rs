//! Pluggable load-balancing policies for unit selection.
//!
//! Candidates arrive pre-filtered (idle + compatible) in deterministic
//! registry order; a policy only decides which of them gets the task.

use uuid::Uuid;

use super::registry::UnitRecord;

/// Selects one unit from a slice of idle, compatible candidates
pub trait ScorePolicy: Send {
    /// Pick a unit; `None` only when `candidates` is empty
    fn select(&mut self, candidates: &[&UnitRecord]) -> Option<Uuid>;
}

/// Default policy: minimize `avg_processing_time × (completed + 1)`, a
/// blended score favoring fast and lightly-loaded units. Ties go to the
/// earliest candidate in registry order.
#[derive(Debug, Default)]
pub struct BlendedLoad;

impl ScorePolicy for BlendedLoad {
    fn select(&mut self, candidates: &[&UnitRecord]) -> Option<Uuid> {
        let mut best: Option<(u128, Uuid)> = None;
        for unit in candidates {
            let score = unit.avg_processing().as_millis() * u128::from(unit.completed + 1);
            match best {
                Some((best_score, _)) if score >= best_score => {}
                _ => best = Some((score, unit.id)),
            }
        }
        best.map(|(_, id)| id)
    }
}

/// Alternative policy: rotate through candidates regardless of their stats
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl ScorePolicy for RoundRobin {
    fn select(&mut self, candidates: &[&UnitRecord]) -> Option<Uuid> {
        if candidates.is_empty() {
            return None;
        }
        let picked = candidates[self.cursor % candidates.len()].id;
        self.cursor = self.cursor.wrapping_add(1);
        Some(picked)
    }
}
