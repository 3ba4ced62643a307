//! Lesson progression and course completion.
//!
//! Tracks which lessons a learner has finished, derives unlock state and
//! completion percentage from the course's lesson order, and issues
//! completion certificates.

#![warn(missing_docs)]

pub mod tracker;
pub mod navigation;
pub mod completion;
pub mod certificate;
pub mod config;
pub mod error;

pub use tracker::{ProgressTracker, BasicProgressTracker, CompletionOutcome, CourseView, LessonEntry};
pub use navigation::{is_lesson_locked, resolve_current_lesson, blocking_lesson, progress_map, ProgressMap};
pub use completion::{CourseProgress, completion_percent};
pub use certificate::generate_verification_code;
pub use config::TrackerConfig;
pub use error::{TrackerError, Result};
