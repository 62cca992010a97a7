use async_trait::async_trait;
use chrono::Utc;
use scriptflow_ai::{GenerationConfig, LlmProvider};
use scriptflow_core::{
    ActType, FindingType, JobType, NewDecision, ProjectRepository, WorkflowStatus,
};
use scriptflow_queue::{Job, JobFailure, JobProcessor};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    prompts, report, AnalysisPayload, IterationPayload, Result, SynthesisPayload, WorkflowError,
};

/// Executes ANALYSIS, ITERATION and SYNTHESIS jobs.
pub struct WorkflowProcessor {
    repo: Arc<dyn ProjectRepository>,
    llm: Arc<dyn LlmProvider>,
    generation: GenerationConfig,
}

impl WorkflowProcessor {
    pub fn new(
        repo: Arc<dyn ProjectRepository>,
        llm: Arc<dyn LlmProvider>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            repo,
            llm,
            generation,
        }
    }

    async fn run(&self, job: &Job) -> Result<Value> {
        match job.job_type {
            JobType::Analysis => {
                self.analyze(serde_json::from_value(job.payload.clone())?)
                    .await
            }
            JobType::Iteration => {
                self.iterate(serde_json::from_value(job.payload.clone())?)
                    .await
            }
            JobType::Synthesis => {
                self.synthesize(serde_json::from_value(job.payload.clone())?)
                    .await
            }
        }
    }

    async fn analyze(&self, payload: AnalysisPayload) -> Result<Value> {
        let project_id = payload.project_id;
        let version = self
            .repo
            .latest_script_version(project_id)
            .await?
            .ok_or_else(|| WorkflowError::Validation("Project has no script version".into()))?;
        info!(
            project_id = %project_id,
            version = version.version,
            chars = version.content.len(),
            "Running consistency analysis"
        );

        let raw = self
            .llm
            .generate_json(
                prompts::ANALYSIS_SYSTEM,
                &prompts::analysis_user(&version.content),
                &self.generation,
            )
            .await?;
        let diagnostic = report::diagnostic_report(project_id, &raw);
        let error_count = diagnostic.findings.len();
        let confidence = diagnostic.confidence;
        self.repo.save_diagnostic_report(diagnostic).await?;

        self.advance(project_id, WorkflowStatus::Analyzing, WorkflowStatus::Iterating)
            .await?;

        Ok(json!({
            "errorCount": error_count,
            "confidence": confidence,
            "completedAt": Utc::now().to_rfc3339(),
        }))
    }

    async fn iterate(&self, payload: IterationPayload) -> Result<Value> {
        let request = payload.request;
        let project_id = request.project_id;

        let context = match request.script_context.filter(|c| !c.trim().is_empty()) {
            Some(context) => context,
            None => {
                let mut context = self
                    .repo
                    .latest_script_version(project_id)
                    .await?
                    .map(|v| v.content)
                    .ok_or_else(|| {
                        WorkflowError::Validation("Script context is required".into())
                    })?;
                if request.act == ActType::Act2Character {
                    if let Some(diagnostic) = self.repo.diagnostic_report(project_id).await? {
                        let findings: Vec<String> = diagnostic
                            .findings_of(FindingType::Character)
                            .map(|f| format!("- {}", f.description))
                            .collect();
                        if !findings.is_empty() {
                            context.push_str("\n\n## Related diagnostic findings:\n");
                            context.push_str(&findings.join("\n"));
                        }
                    }
                }
                context
            }
        };

        info!(project_id = %project_id, act = %request.act, focus = %request.focus_name, "Generating revision proposals");
        let system = format!(
            "{} {}",
            prompts::iteration_system(request.act),
            prompts::ITERATION_FORMAT
        );
        let raw = self
            .llm
            .generate_json(
                &system,
                &prompts::iteration_user(&request.focus_name, &request.contradiction, &context),
                &self.generation,
            )
            .await?;

        let focus_context = raw.get("focusContext").cloned().unwrap_or_else(|| json!({}));
        let proposals = match raw.get("proposals") {
            Some(Value::Array(items)) => Value::Array(items.clone()),
            Some(other) if !other.is_null() => Value::Array(vec![other.clone()]),
            _ => Value::Array(Vec::new()),
        };
        let recommendation = raw
            .get("recommendation")
            .and_then(Value::as_str)
            .unwrap_or("No recommendation")
            .to_string();

        let decision = self
            .repo
            .create_decision(NewDecision {
                project_id,
                act: request.act,
                focus_name: request.focus_name,
                focus_context: focus_context.clone(),
                proposals: proposals.clone(),
            })
            .await?;

        Ok(json!({
            "decisionId": decision.id,
            "focusContext": focus_context,
            "proposals": proposals,
            "recommendation": recommendation,
            "completedAt": Utc::now().to_rfc3339(),
        }))
    }

    async fn synthesize(&self, payload: SynthesisPayload) -> Result<Value> {
        let project_id = payload.project_id;
        let versions = self.repo.script_versions(project_id).await?;
        let original = versions
            .iter()
            .find(|v| v.version == 1)
            .ok_or_else(|| WorkflowError::Validation("Original script (V1) not found".into()))?;
        let decisions = self.repo.decisions(project_id).await?;
        if decisions.is_empty() {
            return Err(WorkflowError::NoDecisions(project_id));
        }

        info!(project_id = %project_id, decisions = decisions.len(), "Synthesizing revised script");
        let raw = self
            .llm
            .generate_json(
                prompts::SYNTHESIS_SYSTEM,
                &prompts::synthesis_user(&original.content, &decisions, &payload.options),
                &self.generation,
            )
            .await?;

        let script = raw
            .get("synthesizedScript")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| WorkflowError::Validation("Synthesis produced no script".into()))?;
        let conflicts = raw
            .get("conflicts")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let confidence = report::normalize_confidence(
            raw.get("confidence").and_then(Value::as_f64),
            0.0,
        );
        let change_log = payload.options.include_change_log.then(|| {
            json!({
                "synthesisLog": raw.get("changeLog").cloned().unwrap_or(Value::Null),
                "decisionsApplied": decisions.iter().map(|d| d.id).collect::<Vec<_>>(),
                "confidence": confidence,
            })
            .to_string()
        });

        let version = self
            .repo
            .create_script_version(project_id, script.to_string(), change_log)
            .await?;
        self.advance(project_id, WorkflowStatus::Synthesizing, WorkflowStatus::Done)
            .await?;

        Ok(json!({
            "versionId": version.id,
            "version": version.version,
            "confidence": confidence,
            "conflicts": conflicts,
            "completedAt": Utc::now().to_rfc3339(),
        }))
    }

    async fn advance(
        &self,
        project_id: scriptflow_core::ProjectId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<()> {
        if !self.repo.advance_workflow(project_id, from, to).await? {
            warn!(project_id = %project_id, %from, %to, "project left {} before the job finished", from);
        }
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for WorkflowProcessor {
    async fn process(&self, job: &Job) -> std::result::Result<Value, JobFailure> {
        self.run(job).await.map_err(|e| {
            let message = report::describe_failure(&e);
            warn!(job_id = %job.id, job_type = %job.job_type, "{}", message);
            JobFailure::new(message)
        })
    }
}
