//! Session domain model.
//!
//! This module contains the replicated [`SessionRecord`], the terminal
//! [`CompletedEntry`] written on stop, and the run-state enums.

use crate::error::{Result, TempoError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Run state carried by a live session record.
///
/// There is no `Idle` variant: the absence of a record denotes idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
}

/// Observable state of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
}

impl SessionState {
    /// Derives the machine state from an optional live record.
    pub fn of(record: Option<&SessionRecord>) -> Self {
        match record.map(|r| r.run_state) {
            None => SessionState::Idle,
            Some(RunState::Running) => SessionState::Running,
            Some(RunState::Paused) => SessionState::Paused,
        }
    }
}

/// Returns the next `updated_at` stamp after `previous`.
///
/// Stamps are strictly increasing per record even when the wall clock has
/// not moved (or moved backwards) since the previous write.
pub fn next_update_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > floor { now } else { floor }
}

/// The replicated representation of an in-progress timed interval.
///
/// At most one live record exists per owner. `updated_at` is the only field
/// compared when two stores disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// Identity of the user owning the session
    pub owner_id: String,
    /// Project or category being timed
    pub subject_id: String,
    /// Optional free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Start of the current running interval, rebased on every resume
    pub started_at: DateTime<Utc>,
    pub run_state: RunState,
    /// Seconds banked at the most recent pause
    #[serde(default)]
    pub paused_accumulated: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Creates a fresh running record.
    pub fn start(
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            subject_id: subject_id.into(),
            note,
            started_at: now,
            run_state: RunState::Running,
            paused_accumulated: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::of(Some(self))
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Elapsed seconds at `now`.
    ///
    /// While running, `started_at` already accounts for banked time because it
    /// is rebased on resume. While paused the value is frozen and does not
    /// depend on the clock.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        match self.run_state {
            RunState::Running => (now - self.started_at).num_seconds().max(0),
            RunState::Paused => self.paused_accumulated,
        }
    }

    /// Bumps `updated_at` for a new write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = next_update_stamp(self.updated_at, now);
    }

    /// Freezes elapsed time and moves to `Paused`.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.run_state != RunState::Running {
            return Err(TempoError::InvalidTransition {
                from: self.state().to_string(),
                operation: "pause",
            });
        }
        self.paused_accumulated = self.elapsed_secs(now);
        self.run_state = RunState::Paused;
        self.touch(now);
        Ok(())
    }

    /// Rebases `started_at` so that elapsed time continues from the banked value.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.run_state != RunState::Paused {
            return Err(TempoError::InvalidTransition {
                from: self.state().to_string(),
                operation: "resume",
            });
        }
        self.started_at = now - Duration::seconds(self.paused_accumulated);
        self.run_state = RunState::Running;
        self.touch(now);
        Ok(())
    }

    /// Builds the terminal entry for a stop at `ended_at`.
    pub fn complete(&self, ended_at: DateTime<Utc>) -> CompletedEntry {
        CompletedEntry {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            subject_id: self.subject_id.clone(),
            note: self.note.clone(),
            started_at: self.started_at,
            run_state: self.run_state,
            paused_accumulated: self.paused_accumulated,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at,
            total_duration: self.elapsed_secs(ended_at),
        }
    }
}

/// A finished interval, written once on stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEntry {
    pub id: String,
    pub owner_id: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Run state at the moment of stopping
    pub run_state: RunState,
    #[serde(default)]
    pub paused_accumulated: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Total tracked seconds
    pub total_duration: i64,
}
