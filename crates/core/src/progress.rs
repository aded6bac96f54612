//! Progress Gate
//!
//! Per-user, per-language lesson progress. Completion is idempotent per
//! `(level, unit, artifact)`, the current unit only ever moves forward and
//! the completed set only ever grows.

use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const STARTING_LEVEL: u32 = 1;
pub const STARTING_UNIT: u32 = 1;

/// Identifies one completion event for idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompletionKey {
    pub level: u32,
    pub unit: u32,
    pub artifact_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Recorded { advanced: bool },
    AlreadyRecorded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLessonProgress {
    pub user_id: String,
    pub language: Language,
    pub level: u32,
    pub current_unit: u32,
    pub completed: BTreeSet<(u32, u32)>,
    pub completion_keys: BTreeSet<CompletionKey>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub streak: u32,
    pub listening_secs: f64,
}

impl UserLessonProgress {
    pub fn new(user_id: impl Into<String>, language: Language) -> Self {
        Self {
            user_id: user_id.into(),
            language,
            level: STARTING_LEVEL,
            current_unit: STARTING_UNIT,
            completed: BTreeSet::new(),
            completion_keys: BTreeSet::new(),
            last_completed_at: None,
            streak: 0,
            listening_secs: 0.0,
        }
    }

    /// Units up to the current one are open on the user's level; every unit
    /// of an earlier level is open; later levels are closed.
    pub fn is_unlocked(&self, level: u32, unit: u32) -> bool {
        if level == 0 || unit == 0 {
            return false;
        }
        level < self.level || (level == self.level && unit <= self.current_unit)
    }

    pub fn is_completed(&self, level: u32, unit: u32) -> bool {
        self.completed.contains(&(level, unit))
    }

    /// Records a completion. Replaying the same `(level, unit, artifact)`
    /// changes nothing.
    pub fn apply_completion(
        &mut self,
        level: u32,
        unit: u32,
        artifact_id: Uuid,
        listened_secs: f64,
        now: DateTime<Utc>,
    ) -> CompletionOutcome {
        let key = CompletionKey {
            level,
            unit,
            artifact_id,
        };
        if !self.completion_keys.insert(key) {
            return CompletionOutcome::AlreadyRecorded;
        }
        self.completed.insert((level, unit));

        let advanced = level == self.level && unit == self.current_unit;
        if advanced {
            self.current_unit += 1;
        }

        let today = now.date_naive();
        self.streak = match self.last_completed_at.map(|at| at.date_naive()) {
            Some(day) if day >= today => self.streak.max(1),
            Some(day) if day.succ_opt() == Some(today) => self.streak + 1,
            _ => 1,
        };
        self.last_completed_at = Some(self.last_completed_at.map_or(now, |at| at.max(now)));
        self.listening_secs += listened_secs.max(0.0);

        CompletionOutcome::Recorded { advanced }
    }
}
