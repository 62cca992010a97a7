use scriptflow_core::{
    DiagnosticReport, JobId, JobStatus, JobType, NewProject, Project, ProjectId,
    ProjectRepository, RevisionDecision, UserId, VersionId, WorkflowStatus,
};
use scriptflow_queue::{JobQueue, JobView, ProcessOutcome, QueueStats};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::{
    payload::ProjectRef, AnalysisPayload, IterationPayload, IterationRequest, Result,
    SynthesisOptions, SynthesisPayload, WorkflowError,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisStatus {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOverview {
    pub project: Project,
    pub latest_version: Option<u32>,
    pub diagnostic_report: Option<DiagnosticReport>,
    pub decision_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub decisions: Vec<RevisionDecision>,
    pub total: usize,
    pub by_act: BTreeMap<String, usize>,
}

/// Validates workflow requests, moves the project phase and hands work to the queue.
pub struct WorkflowCoordinator {
    repo: Arc<dyn ProjectRepository>,
    queue: Arc<JobQueue>,
}

impl WorkflowCoordinator {
    pub fn new(repo: Arc<dyn ProjectRepository>, queue: Arc<JobQueue>) -> Self {
        Self { repo, queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn repository(&self) -> &Arc<dyn ProjectRepository> {
        &self.repo
    }

    async fn owned_project(&self, owner: UserId, project_id: ProjectId) -> Result<Project> {
        let project = self
            .repo
            .find_project(project_id)
            .await?
            .ok_or(WorkflowError::ProjectNotFound(project_id))?;
        if project.owner_id != owner {
            return Err(WorkflowError::Forbidden);
        }
        Ok(project)
    }

    /// Compare-and-set the phase; a lost race reports the phase that won.
    async fn transition(
        &self,
        project_id: ProjectId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<()> {
        if self.repo.advance_workflow(project_id, from, to).await? {
            return Ok(());
        }
        let actual = self
            .repo
            .find_project(project_id)
            .await?
            .map(|p| p.workflow_status)
            .ok_or(WorkflowError::ProjectNotFound(project_id))?;
        Err(WorkflowError::InvalidPhase {
            expected: from,
            actual,
        })
    }

    pub async fn create_project(
        &self,
        owner: UserId,
        title: String,
        description: Option<String>,
        content: Option<String>,
    ) -> Result<Project> {
        let title = title.trim().to_string();
        if title.is_empty() || title.chars().count() > 200 {
            return Err(WorkflowError::Validation(
                "Title must be 1-200 characters".into(),
            ));
        }
        let project = self
            .repo
            .create_project(NewProject {
                owner_id: owner,
                title,
                description,
            })
            .await?;
        if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
            self.repo
                .create_script_version(project.id, content, Some("Initial upload".into()))
                .await?;
        }
        info!(project_id = %project.id, owner = %owner, "Project created");
        Ok(project)
    }

    pub async fn get_project(&self, owner: UserId, project_id: ProjectId) -> Result<Project> {
        self.owned_project(owner, project_id).await
    }

    pub async fn project_overview(
        &self,
        owner: UserId,
        project_id: ProjectId,
    ) -> Result<ProjectOverview> {
        let project = self.owned_project(owner, project_id).await?;
        Ok(ProjectOverview {
            latest_version: self
                .repo
                .latest_script_version(project_id)
                .await?
                .map(|v| v.version),
            diagnostic_report: self.repo.diagnostic_report(project_id).await?,
            decision_count: self.repo.decisions(project_id).await?.len(),
            project,
        })
    }

    pub async fn decision_summary(
        &self,
        owner: UserId,
        project_id: ProjectId,
    ) -> Result<DecisionSummary> {
        self.owned_project(owner, project_id).await?;
        let decisions = self.repo.decisions(project_id).await?;
        let mut by_act = BTreeMap::new();
        for decision in &decisions {
            *by_act.entry(decision.act.to_string()).or_insert(0) += 1;
        }
        Ok(DecisionSummary {
            total: decisions.len(),
            by_act,
            decisions,
        })
    }

    /// Start the initial consistency analysis. Requires DRAFT; moves to ANALYZING.
    pub async fn submit_analysis(
        &self,
        owner: UserId,
        project_id: ProjectId,
        script: Option<String>,
    ) -> Result<JobId> {
        let project = self.owned_project(owner, project_id).await?;
        let script = script.filter(|s| !s.trim().is_empty());
        let existing = match script {
            Some(_) => None,
            None => self.repo.latest_script_version(project_id).await?,
        };
        if script.is_none() && existing.is_none() {
            return Err(WorkflowError::Validation(
                "Project has no script content to analyze".into(),
            ));
        }
        if project.workflow_status != WorkflowStatus::Draft {
            return Err(WorkflowError::InvalidPhase {
                expected: WorkflowStatus::Draft,
                actual: project.workflow_status,
            });
        }

        // The phase only moves once everything the job needs is stored.
        let version = match existing {
            Some(version) => version,
            None => {
                let content = script.unwrap_or_default();
                self.repo
                    .create_script_version(project_id, content, Some("Submitted for analysis".into()))
                    .await?
            }
        };
        let payload = serde_json::to_value(AnalysisPayload {
            project_id,
            version_id: version.id,
        })?;

        self.transition(project_id, WorkflowStatus::Draft, WorkflowStatus::Analyzing)
            .await?;
        let job_id = self.queue.enqueue(JobType::Analysis, payload);
        info!(project_id = %project_id, job_id = %job_id, "Analysis submitted");
        Ok(job_id)
    }

    /// Queue proposal generation for one act. Requires ITERATING; the phase does not change.
    pub async fn submit_iteration(&self, owner: UserId, request: IterationRequest) -> Result<JobId> {
        let project = self.owned_project(owner, request.project_id).await?;
        if request.focus_name.trim().is_empty() {
            return Err(WorkflowError::Validation("focusName is required".into()));
        }
        if request.contradiction.trim().is_empty() {
            return Err(WorkflowError::Validation("contradiction is required".into()));
        }
        if project.workflow_status != WorkflowStatus::Iterating {
            return Err(WorkflowError::InvalidPhase {
                expected: WorkflowStatus::Iterating,
                actual: project.workflow_status,
            });
        }

        let project_id = request.project_id;
        let act = request.act;
        let payload = serde_json::to_value(IterationPayload {
            request,
            user_id: owner,
        })?;
        let job_id = self.queue.enqueue(JobType::Iteration, payload);
        info!(project_id = %project_id, job_id = %job_id, act = %act, "Iteration submitted");
        Ok(job_id)
    }

    /// Queue synthesis of the final script.
    ///
    /// Checks, in order: the project exists, belongs to `owner`, has at least
    /// one decision and is ITERATING. The phase flips to SYNTHESIZING here,
    /// before the job runs, so it reads "synthesis requested".
    pub async fn request_synthesis(
        &self,
        owner: UserId,
        project_id: ProjectId,
        options: SynthesisOptions,
    ) -> Result<JobId> {
        let project = self.owned_project(owner, project_id).await?;
        if self.repo.decisions(project_id).await?.is_empty() {
            return Err(WorkflowError::NoDecisions(project_id));
        }
        if project.workflow_status != WorkflowStatus::Iterating {
            return Err(WorkflowError::InvalidPhase {
                expected: WorkflowStatus::Iterating,
                actual: project.workflow_status,
            });
        }

        self.transition(
            project_id,
            WorkflowStatus::Iterating,
            WorkflowStatus::Synthesizing,
        )
        .await?;
        let payload = serde_json::to_value(SynthesisPayload {
            project_id,
            options,
        })?;
        let job_id = self.queue.enqueue(JobType::Synthesis, payload);
        info!(project_id = %project_id, job_id = %job_id, "Synthesis requested");
        Ok(job_id)
    }

    async fn authorize_job(&self, owner: UserId, job_id: JobId) -> Result<(JobView, Option<ProjectId>)> {
        let job = self
            .queue
            .get_job(job_id)
            .ok_or(WorkflowError::JobNotFound(job_id))?;
        let project_id = serde_json::from_value::<ProjectRef>(job.payload.clone())
            .ok()
            .map(|target| target.project_id);
        if let Some(project_id) = project_id {
            self.owned_project(owner, project_id).await?;
        }
        Ok((job.view(), project_id))
    }

    /// Fill in `versionId`/`version` for completed synthesis jobs whose result lacks them.
    async fn enrich(&self, view: &mut JobView, project_id: Option<ProjectId>) -> Result<()> {
        if view.job_type != JobType::Synthesis || view.status != JobStatus::Completed {
            return Ok(());
        }
        let has_version = view
            .result
            .as_ref()
            .map(|r| r.get("versionId").is_some())
            .unwrap_or(false);
        if has_version {
            return Ok(());
        }
        let Some(project_id) = project_id else {
            return Ok(());
        };
        if let Some(latest) = self.repo.latest_script_version(project_id).await? {
            let result = view
                .result
                .get_or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(map) = result {
                map.insert("versionId".into(), Value::String(latest.id.to_string()));
                map.insert("version".into(), Value::from(latest.version));
            }
        }
        Ok(())
    }

    pub async fn get_job_status(&self, owner: UserId, job_id: JobId) -> Result<JobView> {
        let (mut view, project_id) = self.authorize_job(owner, job_id).await?;
        self.enrich(&mut view, project_id).await?;
        Ok(view)
    }

    pub async fn get_synthesis_status(&self, owner: UserId, job_id: JobId) -> Result<SynthesisStatus> {
        let view = self.get_job_status(owner, job_id).await?;
        if view.job_type != JobType::Synthesis {
            return Err(WorkflowError::InvalidJobType {
                job_id,
                expected: JobType::Synthesis,
                actual: view.job_type,
            });
        }
        let version_id = view
            .result
            .as_ref()
            .and_then(|r| r.get("versionId"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let version = view
            .result
            .as_ref()
            .and_then(|r| r.get("version"))
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        Ok(SynthesisStatus {
            job_id,
            status: view.status,
            progress: view.progress,
            result: view.result,
            error: view.error,
            version_id,
            version,
        })
    }

    pub async fn process_next(&self) -> ProcessOutcome {
        self.queue.process_next().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
