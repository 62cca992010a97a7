use async_trait::async_trait;
use parking_lot::Mutex;
use scriptflow_ai::{AiError, GenerationConfig, LlmProvider, LlmResponse, LlmResult, Message};
use scriptflow_core::{
    ActType, CoreError, DiagnosticReport, InMemoryRepository, JobStatus, NewDecision, NewProject,
    NewUser, Project, ProjectId, ProjectRepository, QueueSettings, RevisionDecision,
    ScriptVersion, User, UserId, WorkflowStatus,
};
use scriptflow_queue::JobQueue;
use scriptflow_workflow::*;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Answers with canned replies in order and remembers every user prompt.
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmResult<Value>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn reply(&self, value: Value) {
        self.replies.lock().push_back(Ok(value));
    }

    fn fail(&self, err: AiError) {
        self.replies.lock().push_back(Err(err));
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> LlmResult<LlmResponse> {
        if let Some(last) = messages.last() {
            self.prompts.lock().push(last.content.clone());
        }
        let next = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::InvalidResponse("no scripted reply".into())))?;
        Ok(LlmResponse {
            content: next.to_string(),
            total_tokens: None,
            prompt_tokens: None,
            completion_tokens: None,
            finish_reason: Some("stop".into()),
            model: "scripted".into(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    repo: Arc<InMemoryRepository>,
    llm: Arc<ScriptedLlm>,
    coordinator: WorkflowCoordinator,
    owner: Uuid,
}

fn harness() -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let llm = Arc::new(ScriptedLlm::default());
    let processor = WorkflowProcessor::new(repo.clone(), llm.clone(), GenerationConfig::default());
    let queue = Arc::new(JobQueue::new(Arc::new(processor), QueueSettings::default()));
    Harness {
        coordinator: WorkflowCoordinator::new(repo.clone(), queue),
        repo,
        llm,
        owner: Uuid::new_v4(),
    }
}

const SCRIPT: &str = "INT. LIGHTHOUSE - NIGHT\nMARA (left-handed) lights the lamp.";

fn analysis_reply() -> Value {
    json!({
        "errors": [{
            "type": "character_inconsistency",
            "severity": "high",
            "description": "Mara switches hands between scenes",
            "location": {"sceneNumber": 3, "characterName": "Mara"},
            "confidence": 88
        }],
        "summary": "One continuity issue",
        "confidence": 0.9
    })
}

fn iteration_reply() -> Value {
    json!({
        "focusContext": {"character": "Mara"},
        "proposals": [{"id": "p1", "description": "Make it an injury"}],
        "recommendation": "p1"
    })
}

impl Harness {
    async fn project(&self) -> Uuid {
        self.coordinator
            .create_project(self.owner, "Lighthouse".into(), None, Some(SCRIPT.into()))
            .await
            .unwrap()
            .id
    }

    async fn phase(&self, project_id: Uuid) -> WorkflowStatus {
        self.repo
            .find_project(project_id)
            .await
            .unwrap()
            .unwrap()
            .workflow_status
    }

    /// Drive a fresh project through analysis into ITERATING.
    async fn iterating_project(&self) -> Uuid {
        let project_id = self.project().await;
        self.llm.reply(analysis_reply());
        self.coordinator
            .submit_analysis(self.owner, project_id, None)
            .await
            .unwrap();
        assert!(self.coordinator.process_next().await.processed);
        assert_eq!(self.phase(project_id).await, WorkflowStatus::Iterating);
        project_id
    }

    async fn add_decision(&self, project_id: Uuid) {
        self.repo
            .create_decision(NewDecision {
                project_id,
                act: ActType::Act2Character,
                focus_name: "Mara".into(),
                focus_context: json!({}),
                proposals: json!([]),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_analysis_moves_project_to_iterating() {
    let h = harness();
    let project_id = h.project().await;
    h.llm.reply(analysis_reply());

    let job_id = h
        .coordinator
        .submit_analysis(h.owner, project_id, None)
        .await
        .unwrap();
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Analyzing);
    let view = h.coordinator.get_job_status(h.owner, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.progress, 0);

    let outcome = h.coordinator.process_next().await;
    assert!(outcome.processed);
    assert_eq!(outcome.status, Some(JobStatus::Completed));

    let view = h.coordinator.get_job_status(h.owner, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    let result = view.result.unwrap();
    assert_eq!(result["errorCount"], 1);
    assert_eq!(result["confidence"], 0.9);
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Iterating);

    let report = h.repo.diagnostic_report(project_id).await.unwrap().unwrap();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].confidence, 0.88);
    assert!(h.llm.prompts.lock()[0].contains("LIGHTHOUSE"));
}

#[tokio::test]
async fn test_analysis_requires_draft_and_content() {
    let h = harness();
    let empty = h
        .coordinator
        .create_project(h.owner, "Empty".into(), None, None)
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator.submit_analysis(h.owner, empty.id, None).await,
        Err(WorkflowError::Validation(_))
    ));

    let project_id = h.iterating_project().await;
    assert!(matches!(
        h.coordinator.submit_analysis(h.owner, project_id, None).await,
        Err(WorkflowError::InvalidPhase {
            expected: WorkflowStatus::Draft,
            actual: WorkflowStatus::Iterating,
        })
    ));
}

/// In-memory storage whose script-version writes always fail.
#[derive(Default)]
struct VersionWritesFail {
    inner: InMemoryRepository,
}

#[async_trait]
impl ProjectRepository for VersionWritesFail {
    async fn create_user(&self, user: NewUser) -> scriptflow_core::Result<User> {
        self.inner.create_user(user).await
    }
    async fn find_user_by_email(&self, email: &str) -> scriptflow_core::Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn find_user(&self, id: UserId) -> scriptflow_core::Result<Option<User>> {
        self.inner.find_user(id).await
    }
    async fn create_project(&self, project: NewProject) -> scriptflow_core::Result<Project> {
        self.inner.create_project(project).await
    }
    async fn find_project(&self, id: ProjectId) -> scriptflow_core::Result<Option<Project>> {
        self.inner.find_project(id).await
    }
    async fn advance_workflow(
        &self,
        id: ProjectId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> scriptflow_core::Result<bool> {
        self.inner.advance_workflow(id, from, to).await
    }
    async fn create_script_version(
        &self,
        _project_id: ProjectId,
        _content: String,
        _change_log: Option<String>,
    ) -> scriptflow_core::Result<ScriptVersion> {
        Err(CoreError::Storage("disk full".into()))
    }
    async fn script_versions(&self, project_id: ProjectId) -> scriptflow_core::Result<Vec<ScriptVersion>> {
        self.inner.script_versions(project_id).await
    }
    async fn latest_script_version(
        &self,
        project_id: ProjectId,
    ) -> scriptflow_core::Result<Option<ScriptVersion>> {
        self.inner.latest_script_version(project_id).await
    }
    async fn create_decision(&self, decision: NewDecision) -> scriptflow_core::Result<RevisionDecision> {
        self.inner.create_decision(decision).await
    }
    async fn decisions(&self, project_id: ProjectId) -> scriptflow_core::Result<Vec<RevisionDecision>> {
        self.inner.decisions(project_id).await
    }
    async fn save_diagnostic_report(&self, report: DiagnosticReport) -> scriptflow_core::Result<()> {
        self.inner.save_diagnostic_report(report).await
    }
    async fn diagnostic_report(
        &self,
        project_id: ProjectId,
    ) -> scriptflow_core::Result<Option<DiagnosticReport>> {
        self.inner.diagnostic_report(project_id).await
    }
}

#[tokio::test]
async fn test_storage_failure_leaves_project_in_draft() {
    let repo = Arc::new(VersionWritesFail::default());
    let llm = Arc::new(ScriptedLlm::default());
    let processor = WorkflowProcessor::new(repo.clone(), llm, GenerationConfig::default());
    let queue = Arc::new(JobQueue::new(Arc::new(processor), QueueSettings::default()));
    let coordinator = WorkflowCoordinator::new(repo.clone(), queue);
    let owner = Uuid::new_v4();
    let project = coordinator
        .create_project(owner, "Draft only".into(), None, None)
        .await
        .unwrap();

    let err = tokio_test::assert_err!(
        coordinator
            .submit_analysis(owner, project.id, Some(SCRIPT.into()))
            .await
    );
    assert!(matches!(err, WorkflowError::Storage(_)));
    let stored = repo.find_project(project.id).await.unwrap().unwrap();
    assert_eq!(stored.workflow_status, WorkflowStatus::Draft);
    assert_eq!(coordinator.queue_stats().total, 0);
}

#[tokio::test]
async fn test_failed_analysis_is_recorded_without_rollback() {
    let h = harness();
    let project_id = h.project().await;
    h.llm.fail(AiError::Timeout(Duration::from_secs(30)));

    let job_id = h
        .coordinator
        .submit_analysis(h.owner, project_id, None)
        .await
        .unwrap();
    let outcome = h.coordinator.process_next().await;
    assert!(outcome.processed);
    assert_eq!(outcome.status, Some(JobStatus::Failed));

    let view = h.coordinator.get_job_status(h.owner, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.result.is_none());
    let error = view.error.unwrap();
    assert!(error.starts_with("The AI service timed out"));
    assert!(error.contains("30000ms"));
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Analyzing);
}

#[tokio::test]
async fn test_iteration_records_a_decision() {
    let h = harness();
    let project_id = h.iterating_project().await;
    h.llm.reply(iteration_reply());

    let job_id = h
        .coordinator
        .submit_iteration(
            h.owner,
            IterationRequest {
                project_id,
                act: ActType::Act2Character,
                focus_name: "Mara".into(),
                contradiction: "handedness flips".into(),
                script_context: None,
            },
        )
        .await
        .unwrap();
    h.coordinator.process_next().await;

    let view = h.coordinator.get_job_status(h.owner, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    let result = view.result.unwrap();
    assert_eq!(result["recommendation"], "p1");
    assert_eq!(result["proposals"][0]["id"], "p1");

    let decisions = h.repo.decisions(project_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(result["decisionId"], decisions[0].id.to_string());
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Iterating);

    let prompt = h.llm.prompts.lock().last().cloned().unwrap();
    assert!(prompt.contains("Mara switches hands between scenes"));
}

#[tokio::test]
async fn test_iteration_validates_request() {
    let h = harness();
    let project_id = h.project().await;
    let request = IterationRequest {
        project_id,
        act: ActType::Act4Pacing,
        focus_name: "episode 2".into(),
        contradiction: "middle sags".into(),
        script_context: None,
    };
    assert!(matches!(
        h.coordinator.submit_iteration(h.owner, request.clone()).await,
        Err(WorkflowError::InvalidPhase { .. })
    ));
    let blank = IterationRequest {
        focus_name: "  ".into(),
        ..request
    };
    assert!(matches!(
        h.coordinator.submit_iteration(h.owner, blank).await,
        Err(WorkflowError::Validation(_))
    ));
}

#[tokio::test]
async fn test_synthesis_flips_phase_before_the_job_runs() {
    let h = harness();
    let project_id = h.iterating_project().await;
    h.add_decision(project_id).await;

    let job_id = h
        .coordinator
        .request_synthesis(h.owner, project_id, SynthesisOptions::default())
        .await
        .unwrap();
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Synthesizing);
    let status = h
        .coordinator
        .get_synthesis_status(h.owner, job_id)
        .await
        .unwrap();
    assert_eq!(status.status, JobStatus::Queued);
    assert!(status.version_id.is_none());

    h.llm.reply(json!({
        "synthesizedScript": "INT. LIGHTHOUSE - NIGHT\nMARA (bandaged hand) lights the lamp.",
        "changeLog": [{"summary": "injury explains handedness"}],
        "conflicts": [],
        "confidence": 0.8
    }));
    h.coordinator.process_next().await;

    let status = h
        .coordinator
        .get_synthesis_status(h.owner, job_id)
        .await
        .unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.version, Some(2));
    let latest = h.repo.latest_script_version(project_id).await.unwrap().unwrap();
    assert_eq!(status.version_id, Some(latest.id));
    assert!(latest.content.contains("bandaged"));
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Done);
}

#[tokio::test]
async fn test_failed_synthesis_keeps_synthesizing_phase() {
    let h = harness();
    let project_id = h.iterating_project().await;
    h.add_decision(project_id).await;
    let job_id = h
        .coordinator
        .request_synthesis(h.owner, project_id, SynthesisOptions::default())
        .await
        .unwrap();
    h.llm.fail(AiError::RateLimited { retry_after: None });
    h.coordinator.process_next().await;

    let status = h
        .coordinator
        .get_synthesis_status(h.owner, job_id)
        .await
        .unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.unwrap().contains("rate limit"));
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Synthesizing);
}

#[tokio::test]
async fn test_synthesis_outside_iterating_is_rejected_without_enqueue() {
    let h = harness();
    let project_id = h.project().await;
    h.add_decision(project_id).await;

    let err = tokio_test::assert_err!(
        h.coordinator
            .request_synthesis(h.owner, project_id, SynthesisOptions::default())
            .await
    );
    assert!(matches!(
        err,
        WorkflowError::InvalidPhase {
            expected: WorkflowStatus::Iterating,
            actual: WorkflowStatus::Draft,
        }
    ));
    assert_eq!(h.coordinator.queue_stats().total, 0);
    assert_eq!(h.phase(project_id).await, WorkflowStatus::Draft);
}

#[tokio::test]
async fn test_synthesis_precondition_order() {
    let h = harness();
    let missing = Uuid::new_v4();
    assert!(matches!(
        h.coordinator
            .request_synthesis(h.owner, missing, SynthesisOptions::default())
            .await,
        Err(WorkflowError::ProjectNotFound(id)) if id == missing
    ));

    let project_id = h.project().await;
    assert!(matches!(
        h.coordinator
            .request_synthesis(Uuid::new_v4(), project_id, SynthesisOptions::default())
            .await,
        Err(WorkflowError::Forbidden)
    ));
    // DRAFT and no decisions: the decision check comes first.
    assert!(matches!(
        h.coordinator
            .request_synthesis(h.owner, project_id, SynthesisOptions::default())
            .await,
        Err(WorkflowError::NoDecisions(_))
    ));
}

#[tokio::test]
async fn test_second_synthesis_request_loses() {
    let h = harness();
    let project_id = h.iterating_project().await;
    h.add_decision(project_id).await;

    let (a, b) = tokio::join!(
        h.coordinator
            .request_synthesis(h.owner, project_id, SynthesisOptions::default()),
        h.coordinator
            .request_synthesis(h.owner, project_id, SynthesisOptions::default()),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(h.coordinator.queue_stats().queued, 1);
}

#[tokio::test]
async fn test_synthesis_status_rejects_other_job_types() {
    let h = harness();
    let project_id = h.project().await;
    let job_id = h
        .coordinator
        .submit_analysis(h.owner, project_id, None)
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator.get_synthesis_status(h.owner, job_id).await,
        Err(WorkflowError::InvalidJobType { .. })
    ));
    assert!(matches!(
        h.coordinator.get_job_status(Uuid::new_v4(), job_id).await,
        Err(WorkflowError::Forbidden)
    ));
    assert!(matches!(
        h.coordinator.get_job_status(h.owner, Uuid::new_v4()).await,
        Err(WorkflowError::JobNotFound(_))
    ));
}
