//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources
//! shared by every handler.

use lingocast_core::LessonService;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: LessonService,
}
