pub mod admission;
pub mod audio;
pub mod curriculum;
pub mod error;
pub mod language;
pub mod lesson;
pub mod llm_client;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod script;
pub mod service;
pub mod speech;
pub mod store;
pub mod validator;

pub use error::{GenerationError, LessonError, LessonResult, SynthesisError};
pub use language::Language;
pub use service::LessonService;
