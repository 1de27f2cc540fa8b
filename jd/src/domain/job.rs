//! Job definition domain type

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on a job's repeat interval (one year)
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Reasons a job definition is rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobValidationError {
    #[error("job name must not be empty")]
    EmptyName,

    #[error("job command must not be empty")]
    EmptyCommand,

    #[error("interval must be between 1 and {MAX_INTERVAL_SECS} seconds, got {0}")]
    InvalidInterval(u64),
}

/// A scheduled job definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier (UUIDv7, time ordered)
    pub id: String,

    /// Human-readable unique name
    pub name: String,

    /// Command the job stands for
    pub command: String,

    /// Seconds between runs
    pub interval_secs: u64,

    /// Disabled jobs are never due
    pub enabled: bool,

    /// How many times the scheduling loop has dispatched this job
    pub run_count: u64,

    /// When the job next becomes due
    pub next_run_at: Option<DateTime<Utc>>,

    /// Last dispatch time
    pub last_run_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a job from a validated request, first due one interval from `now`
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Result<Self, JobValidationError> {
        new.validate()?;
        let next_run_at = new.enabled.then(|| now + interval(new.interval_secs));
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            name: new.name.trim().to_string(),
            command: new.command,
            interval_secs: new.interval_secs,
            enabled: new.enabled,
            run_count: 0,
            next_run_at,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the scheduling loop should dispatch this job at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Record a dispatch at `ran_at` and push the next run one interval out
    pub fn mark_run(&mut self, ran_at: DateTime<Utc>) {
        self.run_count += 1;
        self.last_run_at = Some(ran_at);
        self.next_run_at = Some(ran_at + interval(self.interval_secs));
        self.updated_at = ran_at;
    }

    /// Apply a partial update
    ///
    /// Changing the interval or re-enabling a job reschedules it from `now`.
    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) -> Result<(), JobValidationError> {
        patch.validate()?;

        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(command) = patch.command {
            self.command = command;
        }

        let mut reschedule = false;
        if let Some(secs) = patch.interval_secs.filter(|&secs| secs != self.interval_secs) {
            self.interval_secs = secs;
            reschedule = true;
        }
        if let Some(enabled) = patch.enabled {
            reschedule |= enabled && !self.enabled;
            self.enabled = enabled;
        }
        if reschedule && self.enabled {
            self.next_run_at = Some(now + interval(self.interval_secs));
        }

        self.updated_at = now;
        Ok(())
    }
}

/// Request to create a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub command: String,
    pub interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            interval_secs,
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), JobValidationError> {
        validate_name(&self.name)?;
        validate_command(&self.command)?;
        validate_interval(self.interval_secs)
    }
}

/// Partial update of a job; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), JobValidationError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(command) = &self.command {
            validate_command(command)?;
        }
        if let Some(secs) = self.interval_secs {
            validate_interval(secs)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), JobValidationError> {
    if name.trim().is_empty() {
        return Err(JobValidationError::EmptyName);
    }
    Ok(())
}

fn validate_command(command: &str) -> Result<(), JobValidationError> {
    if command.trim().is_empty() {
        return Err(JobValidationError::EmptyCommand);
    }
    Ok(())
}

fn validate_interval(secs: u64) -> Result<(), JobValidationError> {
    if secs == 0 || secs > MAX_INTERVAL_SECS {
        return Err(JobValidationError::InvalidInterval(secs));
    }
    Ok(())
}

// Bounded by MAX_INTERVAL_SECS, so the cast cannot wrap.
fn interval(secs: u64) -> Duration {
    Duration::seconds(secs as i64)
}
