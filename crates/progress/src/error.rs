//! Errors surfaced by the progress tracker.

use academy_core::LessonId;
use academy_storage::StorageError;

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failure conditions reported to callers of the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A course, module or lesson is missing from the catalog
    #[error("Not found: {0}")]
    NotFound(String),

    /// Certificate requested before every lesson was completed
    #[error("Not eligible for a certificate: course is {percent}% complete")]
    NotEligible {
        /// Live completion percentage at the time of the request
        percent: u8,
    },

    /// Navigation into a lesson whose predecessor is not completed
    #[error("Lesson {lesson} is locked until lesson {blocked_by} is completed")]
    Locked {
        /// Requested lesson
        lesson: LessonId,
        /// Lesson that has to be completed first
        blocked_by: LessonId,
    },

    /// No unused verification code was found
    #[error("Could not generate a unique verification code after {attempts} attempts")]
    CodeGeneration {
        /// Number of codes tried
        attempts: u32,
    },

    /// Storage failure, passed through unchanged
    #[error(transparent)]
    Persistence(#[from] StorageError),
}
