//! Admission control for long-running requests.
//!
//! At most one request of each kind per user is in flight. A duplicate is
//! rejected at once rather than queued. The table is process-local.

use crate::error::{LessonError, LessonResult};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Lesson,
    CustomLesson,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Lesson => "lesson",
            RequestKind::CustomLesson => "custom lesson",
        }
    }
}

type InFlight = Arc<Mutex<HashSet<(String, RequestKind)>>>;

#[derive(Debug, Clone, Default)]
pub struct AdmissionTable {
    in_flight: InFlight,
}

impl AdmissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the `(user, kind)` slot. The slot is released when the returned
    /// guard is dropped, whatever the outcome of the request.
    pub fn try_admit(&self, user_id: &str, kind: RequestKind) -> LessonResult<AdmissionGuard> {
        let key = (user_id.to_string(), kind);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            debug!(user_id, kind = kind.as_str(), "Rejecting duplicate request");
            return Err(LessonError::AlreadyProcessing(kind.as_str()));
        }
        Ok(AdmissionGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        })
    }

    pub fn is_in_flight(&self, user_id: &str, kind: RequestKind) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(user_id.to_string(), kind))
    }
}

#[derive(Debug)]
pub struct AdmissionGuard {
    in_flight: InFlight,
    key: (String, RequestKind),
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
