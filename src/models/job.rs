// src/models/job.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---
// Estados de um job assíncrono
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    // Criado, ainda não enfileirado
    Created,
    // Esperando o lock do owner
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
    // A tarefa de execução morreu (panic) ou não pôde ser agendada
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Cancelled | JobState::Aborted
        )
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match self {
            Created => matches!(next, Queued | Running | Cancelled | Aborted),
            Queued => matches!(next, Running | Cancelled | Aborted),
            Running => matches!(next, Finished | Failed | Aborted),
            Finished | Failed | Cancelled | Aborted => false,
        }
    }
}

// ---
// O que o job executa
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    #[serde(rename_all = "camelCase")]
    RefreshPools { owner_key: String, lazy_regen: bool, auto_create_owner: bool },
    #[serde(rename_all = "camelCase")]
    RegenEntitlementCertificates { owner_key: String, lazy_regen: bool },
    #[serde(rename_all = "camelCase")]
    Autoheal { owner_key: String },
}

impl JobKind {
    pub fn owner_key(&self) -> &str {
        match self {
            JobKind::RefreshPools { owner_key, .. }
            | JobKind::RegenEntitlementCertificates { owner_key, .. }
            | JobKind::Autoheal { owner_key } => owner_key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::RefreshPools { .. } => "refresh_pools",
            JobKind::RegenEntitlementCertificates { .. } => "regen_entitlement_certificates",
            JobKind::Autoheal { .. } => "autoheal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub previous_state: Option<JobState>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_move() {
        for state in [JobState::Finished, JobState::Failed, JobState::Cancelled, JobState::Aborted] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(JobState::Running));
        }
    }

    #[test]
    fn running_jobs_cannot_be_cancelled() {
        assert!(JobState::Created.can_transition_to(JobState::Cancelled));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Running.can_transition_to(JobState::Cancelled));
    }
}
