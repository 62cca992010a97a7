use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    ActType, CoreError, DecisionId, ProjectId, Result, UserId, VersionId, WorkflowStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub workflow_status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptVersion {
    pub id: VersionId,
    pub project_id: ProjectId,
    /// 1-based, incremented per project.
    pub version: u32,
    pub content: String,
    pub change_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDecision {
    pub id: DecisionId,
    pub project_id: ProjectId,
    pub act: ActType,
    pub focus_name: String,
    pub focus_context: serde_json::Value,
    pub proposals: serde_json::Value,
    pub user_choice: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDecision {
    pub project_id: ProjectId,
    pub act: ActType,
    pub focus_name: String,
    pub focus_context: serde_json::Value,
    pub proposals: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingType {
    Timeline,
    Character,
    Plot,
    Dialogue,
    Scene,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingLocation {
    pub scene_number: Option<u32>,
    pub line: Option<u32>,
    pub character: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    pub description: String,
    pub location: Option<FindingLocation>,
    pub suggestion: Option<String>,
    /// Normalized to 0.0..=1.0.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub project_id: ProjectId,
    pub findings: Vec<Finding>,
    pub summary: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn findings_of(&self, finding_type: FindingType) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |f| f.finding_type == finding_type)
    }
}

/// Persistence for users, projects and the revision artefacts a workflow produces.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    async fn create_project(&self, project: NewProject) -> Result<Project>;
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>>;

    /// Compare-and-set the workflow phase. Returns `false` when the project was
    /// not in `from`; fails when `from -> to` is not a single forward step.
    async fn advance_workflow(
        &self,
        id: ProjectId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<bool>;

    async fn create_script_version(
        &self,
        project_id: ProjectId,
        content: String,
        change_log: Option<String>,
    ) -> Result<ScriptVersion>;
    /// Oldest first.
    async fn script_versions(&self, project_id: ProjectId) -> Result<Vec<ScriptVersion>>;
    async fn latest_script_version(&self, project_id: ProjectId) -> Result<Option<ScriptVersion>>;

    async fn create_decision(&self, decision: NewDecision) -> Result<RevisionDecision>;
    async fn decisions(&self, project_id: ProjectId) -> Result<Vec<RevisionDecision>>;

    async fn save_diagnostic_report(&self, report: DiagnosticReport) -> Result<()>;
    async fn diagnostic_report(&self, project_id: ProjectId) -> Result<Option<DiagnosticReport>>;
}

/// Process-local repository. State is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    users: DashMap<UserId, User>,
    emails: DashMap<String, UserId>,
    projects: DashMap<ProjectId, Project>,
    versions: DashMap<ProjectId, Vec<ScriptVersion>>,
    decisions: DashMap<ProjectId, Vec<RevisionDecision>>,
    reports: DashMap<ProjectId, DiagnosticReport>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_project(&self, id: ProjectId) -> Result<()> {
        if self.projects.contains_key(&id) {
            Ok(())
        } else {
            Err(CoreError::ProjectNotFound(id))
        }
    }
}

#[async_trait]
impl ProjectRepository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let email = user.email.trim().to_lowercase();
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(CoreError::DuplicateUser(email)),
            Entry::Vacant(slot) => {
                let record = User {
                    id: Uuid::new_v4(),
                    email,
                    name: user.name,
                    password_hash: user.password_hash,
                    created_at: Utc::now(),
                };
                slot.insert(record.id);
                self.users.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        let id = match self.emails.get(&email) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        let now = Utc::now();
        let record = Project {
            id: Uuid::new_v4(),
            owner_id: project.owner_id,
            title: project.title,
            description: project.description,
            workflow_status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(self.projects.get(&id).map(|p| p.clone()))
    }

    async fn advance_workflow(
        &self,
        id: ProjectId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<bool> {
        if !from.can_advance_to(to) {
            return Err(CoreError::InvalidTransition { from, to });
        }
        let mut project = self
            .projects
            .get_mut(&id)
            .ok_or(CoreError::ProjectNotFound(id))?;
        if project.workflow_status != from {
            debug!(project_id = %id, current = %project.workflow_status, expected = %from, "workflow transition lost");
            return Ok(false);
        }
        project.workflow_status = to;
        project.updated_at = Utc::now();
        debug!(project_id = %id, %from, %to, "workflow advanced");
        Ok(true)
    }

    async fn create_script_version(
        &self,
        project_id: ProjectId,
        content: String,
        change_log: Option<String>,
    ) -> Result<ScriptVersion> {
        self.ensure_project(project_id)?;
        let mut versions = self.versions.entry(project_id).or_default();
        let record = ScriptVersion {
            id: Uuid::new_v4(),
            project_id,
            version: versions.len() as u32 + 1,
            content,
            change_log,
            created_at: Utc::now(),
        };
        versions.push(record.clone());
        Ok(record)
    }

    async fn script_versions(&self, project_id: ProjectId) -> Result<Vec<ScriptVersion>> {
        Ok(self
            .versions
            .get(&project_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn latest_script_version(&self, project_id: ProjectId) -> Result<Option<ScriptVersion>> {
        Ok(self
            .versions
            .get(&project_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn create_decision(&self, decision: NewDecision) -> Result<RevisionDecision> {
        self.ensure_project(decision.project_id)?;
        let record = RevisionDecision {
            id: Uuid::new_v4(),
            project_id: decision.project_id,
            act: decision.act,
            focus_name: decision.focus_name,
            focus_context: decision.focus_context,
            proposals: decision.proposals,
            user_choice: None,
            created_at: Utc::now(),
        };
        self.decisions
            .entry(record.project_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn decisions(&self, project_id: ProjectId) -> Result<Vec<RevisionDecision>> {
        Ok(self
            .decisions
            .get(&project_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }

    async fn save_diagnostic_report(&self, report: DiagnosticReport) -> Result<()> {
        self.ensure_project(report.project_id)?;
        self.reports.insert(report.project_id, report);
        Ok(())
    }

    async fn diagnostic_report(&self, project_id: ProjectId) -> Result<Option<DiagnosticReport>> {
        Ok(self.reports.get(&project_id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (InMemoryRepository, Project) {
        let repo = InMemoryRepository::new();
        let project = repo
            .create_project(NewProject {
                owner_id: Uuid::new_v4(),
                title: "Pilot".into(),
                description: None,
            })
            .await
            .unwrap();
        (repo, project)
    }

    #[tokio::test]
    async fn duplicate_emails_are_rejected_case_insensitively() {
        let repo = InMemoryRepository::new();
        let new_user = |email: &str| NewUser {
            email: email.into(),
            name: None,
            password_hash: "hash".into(),
        };
        repo.create_user(new_user("Writer@Example.com")).await.unwrap();
        let err = repo
            .create_user(new_user("writer@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateUser(_)));
        assert!(repo
            .find_user_by_email("WRITER@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn advance_workflow_is_compare_and_set() {
        let (repo, project) = seeded().await;
        assert_eq!(project.workflow_status, WorkflowStatus::Draft);

        assert!(repo
            .advance_workflow(project.id, WorkflowStatus::Draft, WorkflowStatus::Analyzing)
            .await
            .unwrap());
        assert!(!repo
            .advance_workflow(project.id, WorkflowStatus::Draft, WorkflowStatus::Analyzing)
            .await
            .unwrap());

        let err = repo
            .advance_workflow(project.id, WorkflowStatus::Analyzing, WorkflowStatus::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let missing = repo
            .advance_workflow(Uuid::new_v4(), WorkflowStatus::Draft, WorkflowStatus::Analyzing)
            .await
            .unwrap_err();
        assert!(matches!(missing, CoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn script_versions_are_numbered() {
        let (repo, project) = seeded().await;
        repo.create_script_version(project.id, "v1".into(), None)
            .await
            .unwrap();
        let v2 = repo
            .create_script_version(project.id, "v2".into(), Some("synthesis".into()))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(
            repo.latest_script_version(project.id).await.unwrap().unwrap().id,
            v2.id
        );
        assert_eq!(repo.script_versions(project.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn decisions_require_existing_project() {
        let (repo, project) = seeded().await;
        let decision = NewDecision {
            project_id: project.id,
            act: ActType::Act2Character,
            focus_name: "Mara".into(),
            focus_context: json!({}),
            proposals: json!([]),
        };
        tokio_test::assert_ok!(repo.create_decision(decision.clone()).await);
        assert_eq!(repo.decisions(project.id).await.unwrap().len(), 1);

        let orphan = NewDecision {
            project_id: Uuid::new_v4(),
            ..decision
        };
        tokio_test::assert_err!(repo.create_decision(orphan).await);
    }
}
