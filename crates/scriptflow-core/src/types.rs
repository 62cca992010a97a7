use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type UserId = Uuid;
pub type ProjectId = Uuid;
pub type JobId = Uuid;
pub type DecisionId = Uuid;
pub type VersionId = Uuid;

/// Coarse phase of a project's revision workflow.
///
/// Phases only move forward, one step at a time:
/// `DRAFT -> ANALYZING -> ITERATING -> SYNTHESIZING -> DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    Analyzing,
    Iterating,
    Synthesizing,
    Done,
}

impl WorkflowStatus {
    pub fn next(self) -> Option<Self> {
        match self {
            WorkflowStatus::Draft => Some(WorkflowStatus::Analyzing),
            WorkflowStatus::Analyzing => Some(WorkflowStatus::Iterating),
            WorkflowStatus::Iterating => Some(WorkflowStatus::Synthesizing),
            WorkflowStatus::Synthesizing => Some(WorkflowStatus::Done),
            WorkflowStatus::Done => None,
        }
    }

    pub fn can_advance_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "DRAFT",
            WorkflowStatus::Analyzing => "ANALYZING",
            WorkflowStatus::Iterating => "ITERATING",
            WorkflowStatus::Synthesizing => "SYNTHESIZING",
            WorkflowStatus::Done => "DONE",
        }
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Analysis,
    Iteration,
    Synthesis,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Analysis => "ANALYSIS",
            JobType::Iteration => "ITERATION",
            JobType::Synthesis => "SYNTHESIS",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// QUEUED -> PROCESSING -> {COMPLETED | FAILED}; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 50,
            JobStatus::Completed => 100,
            JobStatus::Failed => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-act iteration focus areas that follow the initial analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActType {
    #[serde(rename = "ACT2_CHARACTER")]
    Act2Character,
    #[serde(rename = "ACT3_WORLDBUILDING")]
    Act3Worldbuilding,
    #[serde(rename = "ACT4_PACING")]
    Act4Pacing,
    #[serde(rename = "ACT5_THEME")]
    Act5Theme,
}

impl ActType {
    pub const ALL: [ActType; 4] = [
        ActType::Act2Character,
        ActType::Act3Worldbuilding,
        ActType::Act4Pacing,
        ActType::Act5Theme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActType::Act2Character => "ACT2_CHARACTER",
            ActType::Act3Worldbuilding => "ACT3_WORLDBUILDING",
            ActType::Act4Pacing => "ACT4_PACING",
            ActType::Act5Theme => "ACT5_THEME",
        }
    }
}

impl fmt::Display for ActType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActType::ALL
            .iter()
            .copied()
            .find(|act| act.as_str() == s)
            .ok_or_else(|| format!("unknown act type: {}", s))
    }
}
