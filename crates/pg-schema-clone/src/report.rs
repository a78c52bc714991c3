//! Clone state machine and outcome report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Progress of a clone. States are only ever entered in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneState {
    Init,
    SchemaCreated,
    StructuresBuilt,
    DataCopied,
    ForeignKeysApplied,
    IndexesApplied,
    ViewsBuilt,
    Done,
}

impl CloneState {
    /// The state that follows this one.
    pub fn next(self) -> Self {
        match self {
            CloneState::Init => CloneState::SchemaCreated,
            CloneState::SchemaCreated => CloneState::StructuresBuilt,
            CloneState::StructuresBuilt => CloneState::DataCopied,
            CloneState::DataCopied => CloneState::ForeignKeysApplied,
            CloneState::ForeignKeysApplied => CloneState::IndexesApplied,
            CloneState::IndexesApplied => CloneState::ViewsBuilt,
            CloneState::ViewsBuilt | CloneState::Done => CloneState::Done,
        }
    }
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloneState::Init => "init",
            CloneState::SchemaCreated => "schema_created",
            CloneState::StructuresBuilt => "structures_built",
            CloneState::DataCopied => "data_copied",
            CloneState::ForeignKeysApplied => "foreign_keys_applied",
            CloneState::IndexesApplied => "indexes_applied",
            CloneState::ViewsBuilt => "views_built",
            CloneState::Done => "done",
        };
        f.write_str(s)
    }
}

/// The write phases, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Structure,
    Data,
    ForeignKeys,
    Indexes,
    Views,
}

impl PhaseKind {
    /// State reached once this phase has run.
    pub fn completes(self) -> CloneState {
        match self {
            PhaseKind::Structure => CloneState::StructuresBuilt,
            PhaseKind::Data => CloneState::DataCopied,
            PhaseKind::ForeignKeys => CloneState::ForeignKeysApplied,
            PhaseKind::Indexes => CloneState::IndexesApplied,
            PhaseKind::Views => CloneState::ViewsBuilt,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseKind::Structure => "structure",
            PhaseKind::Data => "data",
            PhaseKind::ForeignKeys => "foreign_keys",
            PhaseKind::Indexes => "indexes",
            PhaseKind::Views => "views",
        };
        f.write_str(s)
    }
}

/// An object a best-effort phase could not create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFailure {
    /// Object name, e.g. `contacts.contacts_parent_id_fkey`.
    pub object: String,

    /// Server error text.
    pub error: String,
}

/// Outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: PhaseKind,

    /// Objects created (or tables filled).
    pub applied: usize,

    /// Objects left alone because they already existed (or already held rows).
    pub skipped: usize,

    /// Objects that failed individually.
    pub failed: Vec<ObjectFailure>,

    /// Phase-level failure, e.g. a lost connection. The clone continued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn new(phase: PhaseKind) -> Self {
        Self {
            phase,
            applied: 0,
            skipped: 0,
            failed: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn fail(&mut self, object: impl Into<String>, error: impl Into<String>) {
        self.failed.push(ObjectFailure {
            object: object.into(),
            error: error.into(),
        });
    }

    /// Whether every object of the phase was handled.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

/// Result of a clone run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Template schema.
    pub source: String,

    /// Created schema.
    pub target: String,

    /// Last state reached.
    pub state: CloneState,

    /// When the clone started.
    pub started_at: DateTime<Utc>,

    /// When the clone completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// SHA-256 of the configuration the orchestrator was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// One entry per phase that ran.
    pub phases: Vec<PhaseReport>,
}

impl CloneReport {
    pub(crate) fn new(run_id: String, source: &str, target: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            source: source.to_string(),
            target: target.to_string(),
            state: CloneState::Init,
            started_at,
            completed_at: started_at,
            duration_seconds: 0.0,
            config_hash: None,
            phases: Vec::new(),
        }
    }

    /// Report of a phase, if it ran.
    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == kind)
    }

    /// Whether every phase completed without per-object or phase errors.
    pub fn is_clean(&self) -> bool {
        self.state == CloneState::Done && self.phases.iter().all(PhaseReport::is_clean)
    }

    /// All per-object failures across phases.
    pub fn failures(&self) -> impl Iterator<Item = (PhaseKind, &ObjectFailure)> {
        self.phases
            .iter()
            .flat_map(|p| p.failed.iter().map(move |f| (p.phase, f)))
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Utc::now();
        self.duration_seconds =
            (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
