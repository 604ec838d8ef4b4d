use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// States of one generation job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    ModelsReady,
    ImageLoaded,
    Upscaled,
    MultiviewReady,
    NormalsReady,
    GeometryReconstructed,
    Normalized,
    Exported,
    Done,
    Failed,
}

impl Stage {
    /// The happy path, `Failed` excluded.
    pub const ORDER: [Stage; 10] = [
        Self::Init,
        Self::ModelsReady,
        Self::ImageLoaded,
        Self::Upscaled,
        Self::MultiviewReady,
        Self::NormalsReady,
        Self::GeometryReconstructed,
        Self::Normalized,
        Self::Exported,
        Self::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ModelsReady => "models_ready",
            Self::ImageLoaded => "image_loaded",
            Self::Upscaled => "upscaled",
            Self::MultiviewReady => "multiview_ready",
            Self::NormalsReady => "normals_ready",
            Self::GeometryReconstructed => "geometry_reconstructed",
            Self::Normalized => "normalized",
            Self::Exported => "exported",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Stages a job may legitimately skip.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::Upscaled | Self::NormalsReady)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub at: DateTime<Utc>,
}

/// One line of the worker's stdout event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Stage(StageEvent),
    Failed {
        kind: FailureKind,
        stage: Option<Stage>,
        message: String,
    },
}

impl WorkerEvent {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one stdout line. Anything that is not an event yields `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// Enforces the linear progression of a job: every transition moves strictly
/// forward, only conditional stages may be skipped, and nothing follows a
/// terminal state.
#[derive(Debug)]
pub struct StageMachine {
    current: Stage,
    trace: Vec<StageEvent>,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: Stage::Init,
            trace: vec![StageEvent {
                stage: Stage::Init,
                outcome: StageOutcome::Ran,
                at: Utc::now(),
            }],
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn trace(&self) -> &[StageEvent] {
        &self.trace
    }

    /// Record that `stage` ran or was skipped. Returns the recorded event.
    pub fn advance(&mut self, stage: Stage, outcome: StageOutcome) -> Result<StageEvent, String> {
        if self.current.is_terminal() {
            return Err(format!("job already terminated in state {}", self.current));
        }
        if stage == Stage::Failed {
            return Err("use StageMachine::fail for the failure transition".into());
        }
        if stage <= self.current {
            return Err(format!("cannot move from {} back to {}", self.current, stage));
        }
        let skipped_over = Stage::ORDER
            .iter()
            .filter(|s| **s > self.current && **s < stage)
            .find(|s| !s.is_conditional());
        if let Some(missing) = skipped_over {
            return Err(format!("cannot reach {} without passing {}", stage, missing));
        }
        if outcome == StageOutcome::Skipped && !stage.is_conditional() {
            return Err(format!("stage {} cannot be skipped", stage));
        }

        let event = StageEvent {
            stage,
            outcome,
            at: Utc::now(),
        };
        self.current = stage;
        self.trace.push(event.clone());
        Ok(event)
    }

    /// Move to `Failed` from any non-terminal state. Returns the last state
    /// the job reached before failing.
    pub fn fail(&mut self) -> Stage {
        let reached = self.current;
        if !reached.is_terminal() {
            self.current = Stage::Failed;
            self.trace.push(StageEvent {
                stage: Stage::Failed,
                outcome: StageOutcome::Ran,
                at: Utc::now(),
            });
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_progression_with_skips() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::ModelsReady, StageOutcome::Ran).unwrap();
        machine.advance(Stage::ImageLoaded, StageOutcome::Ran).unwrap();
        machine.advance(Stage::Upscaled, StageOutcome::Skipped).unwrap();
        machine.advance(Stage::MultiviewReady, StageOutcome::Ran).unwrap();
        // NormalsReady omitted entirely is fine, it is conditional
        machine.advance(Stage::GeometryReconstructed, StageOutcome::Ran).unwrap();
        assert_eq!(machine.current(), Stage::GeometryReconstructed);
        assert_eq!(machine.trace().len(), 6);
    }

    #[test]
    fn test_no_branching_back() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::ModelsReady, StageOutcome::Ran).unwrap();
        assert!(machine.advance(Stage::Init, StageOutcome::Ran).is_err());
        assert!(machine.advance(Stage::ModelsReady, StageOutcome::Ran).is_err());
    }

    #[test]
    fn test_mandatory_stages_cannot_be_skipped() {
        let mut machine = StageMachine::new();
        assert!(machine.advance(Stage::ImageLoaded, StageOutcome::Ran).is_err());
        machine.advance(Stage::ModelsReady, StageOutcome::Ran).unwrap();
        assert!(machine.advance(Stage::ImageLoaded, StageOutcome::Skipped).is_err());
    }

    #[test]
    fn test_fail_from_any_state() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::ModelsReady, StageOutcome::Ran).unwrap();
        machine.advance(Stage::ImageLoaded, StageOutcome::Ran).unwrap();
        machine.advance(Stage::Upscaled, StageOutcome::Ran).unwrap();
        assert_eq!(machine.fail(), Stage::Upscaled);
        assert_eq!(machine.current(), Stage::Failed);
        assert!(machine.advance(Stage::Done, StageOutcome::Ran).is_err());
    }

    #[test]
    fn test_event_line_format() {
        let event = WorkerEvent::Stage(StageEvent {
            stage: Stage::Upscaled,
            outcome: StageOutcome::Skipped,
            at: Utc::now(),
        });
        let line = event.to_line().unwrap();
        assert!(line.contains(r#""type":"stage""#));
        assert!(line.contains(r#""stage":"upscaled""#));
        assert!(line.contains(r#""outcome":"skipped""#));
        assert_eq!(WorkerEvent::parse_line(&line), Some(event));
        assert_eq!(WorkerEvent::parse_line("loading weights..."), None);
    }
}
