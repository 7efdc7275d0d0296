//! Task model: work kinds, priorities, and the compatibility table that maps
//! each kind of work onto the unit types allowed to run it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::unit::UnitKind;

/// Kind of processing work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    AudioAnalysis,
    Transcription,
    Synthesis,
    Enhancement,
    EmotionAnalysis,
    WakeDetection,
    NoiseReduction,
    SpectralAnalysis,
    Inference,
    EdgeProcessing,
}

impl WorkKind {
    /// Unit types allowed to run this kind of work. Every kind maps to a
    /// fixed, non-empty list; `General` units can run anything.
    #[must_use]
    pub const fn compatible_units(self) -> &'static [UnitKind] {
        match self {
            Self::AudioAnalysis | Self::SpectralAnalysis => {
                &[UnitKind::AudioDsp, UnitKind::General]
            }
            Self::Transcription | Self::WakeDetection => {
                &[UnitKind::Transcription, UnitKind::General]
            }
            Self::Synthesis => &[UnitKind::Synthesis, UnitKind::General],
            Self::Enhancement | Self::NoiseReduction => {
                &[UnitKind::AudioDsp, UnitKind::General]
            }
            Self::EmotionAnalysis | Self::Inference => {
                &[UnitKind::Inference, UnitKind::General]
            }
            Self::EdgeProcessing => &[UnitKind::General],
        }
    }

    /// Whether a unit of the given kind may run this work
    #[must_use]
    pub fn runs_on(self, unit: UnitKind) -> bool {
        self.compatible_units().contains(&unit)
    }
}

/// Priority tier; dispatch order is highest tier first, FIFO within a tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
    Realtime,
}

/// A unit of work submitted to the pool. Immutable once created.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task identifier
    pub id: Uuid,
    /// Kind of work
    pub kind: WorkKind,
    /// Opaque payload handed to the processor
    pub payload: serde_json::Value,
    /// Dispatch priority
    pub priority: Priority,
    /// Submission instant, used for deadline arithmetic
    pub submitted_at: Instant,
    /// Wall-clock submission time, for reporting
    pub submitted_wall: chrono::DateTime<chrono::Utc>,
    /// Effective deadline relative to `submitted_at`
    pub timeout: Duration,
}

impl Task {
    /// Create a task stamped with the current time
    #[must_use]
    pub fn new(
        kind: WorkKind,
        payload: serde_json::Value,
        priority: Priority,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            priority,
            submitted_at: Instant::now(),
            submitted_wall: chrono::Utc::now(),
            timeout,
        }
    }

    /// Absolute deadline for this task
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.submitted_at + self.timeout
    }
}

/// Outcome of a resolved task, delivered exactly once to the submitter
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Identifier of the resolved task
    pub task_id: Uuid,
    /// Whether the processor reported success
    pub success: bool,
    /// Result payload on success
    pub payload: Option<serde_json::Value>,
    /// Error detail on failure
    pub error: Option<String>,
    /// Time spent processing on the unit
    pub elapsed: Duration,
    /// Unit that produced the result, if any
    pub unit_id: Option<Uuid>,
}

impl TaskResult {
    /// Successful result from a unit
    #[must_use]
    pub const fn completed(
        task_id: Uuid,
        payload: serde_json::Value,
        elapsed: Duration,
        unit_id: Uuid,
    ) -> Self {
        Self {
            task_id,
            success: true,
            payload: Some(payload),
            error: None,
            elapsed,
            unit_id: Some(unit_id),
        }
    }

    /// Failed result, from a unit error or scheduler-side resolution
    #[must_use]
    pub const fn failed(
        task_id: Uuid,
        error: String,
        elapsed: Duration,
        unit_id: Option<Uuid>,
    ) -> Self {
        Self {
            task_id,
            success: false,
            payload: None,
            error: Some(error),
            elapsed,
            unit_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_work_kind_has_a_compatible_unit() {
        let kinds = [
            WorkKind::AudioAnalysis,
            WorkKind::Transcription,
            WorkKind::Synthesis,
            WorkKind::Enhancement,
            WorkKind::EmotionAnalysis,
            WorkKind::WakeDetection,
            WorkKind::NoiseReduction,
            WorkKind::SpectralAnalysis,
            WorkKind::Inference,
            WorkKind::EdgeProcessing,
        ];
        for kind in kinds {
            assert!(!kind.compatible_units().is_empty(), "{kind:?} has no units");
            assert!(kind.runs_on(UnitKind::General), "{kind:?} not general-runnable");
        }
    }

    #[test]
    fn transcription_rejects_dsp_units() {
        assert!(WorkKind::Transcription.runs_on(UnitKind::Transcription));
        assert!(!WorkKind::Transcription.runs_on(UnitKind::AudioDsp));
    }

    #[test]
    fn priority_tiers_are_ordered() {
        assert!(Priority::Realtime > Priority::Critical);
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn work_kind_serializes_snake_case() {
        let json = serde_json::to_string(&WorkKind::EmotionAnalysis).unwrap();
        assert_eq!(json, "\"emotion_analysis\"");
    }

    #[test]
    fn deadline_is_submission_plus_timeout() {
        let task = Task::new(
            WorkKind::Inference,
            serde_json::json!({}),
            Priority::Normal,
            Duration::from_secs(5),
        );
        assert_eq!(task.deadline(), task.submitted_at + Duration::from_secs(5));
    }
}
