use scriptflow_core::{ActType, ProjectId, UserId, VersionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub project_id: ProjectId,
    pub version_id: VersionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRequest {
    pub project_id: ProjectId,
    pub act: ActType,
    /// Character, setting or time range the act focuses on.
    pub focus_name: String,
    pub contradiction: String,
    #[serde(default)]
    pub script_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationPayload {
    #[serde(flatten)]
    pub request: IterationRequest,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMode {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisOptions {
    pub preserve_original_style: bool,
    pub conflict_resolution: ConflictResolution,
    pub change_integration_mode: IntegrationMode,
    pub include_change_log: bool,
    pub validate_coherence: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            preserve_original_style: true,
            conflict_resolution: ConflictResolution::Auto,
            change_integration_mode: IntegrationMode::Balanced,
            include_change_log: true,
            validate_coherence: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisPayload {
    pub project_id: ProjectId,
    #[serde(default)]
    pub options: SynthesisOptions,
}

/// Every payload carries the project it belongs to.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectRef {
    pub project_id: ProjectId,
}
