//! Storage trait abstraction.

use async_trait::async_trait;
use academy_core::{
    Certificate, Course, CourseId, Enrollment, Lesson, LessonId, LessonProgress, Module,
    ModuleId, Time, UserId, VerificationCode,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A unique key other than the record's natural key is already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Read-modify-write step applied to a lesson progress row.
///
/// Receives the stored row (if any) and returns the row to store. Backends
/// run it while holding whatever guarantees the (user, lesson) key is
/// written by one caller at a time.
pub type ProgressUpdate<'a> =
    &'a (dyn Fn(Option<LessonProgress>) -> LessonProgress + Send + Sync);

/// Storage abstraction for academy data.
///
/// Every write that creates a keyed record is an atomic insert-or-get, so
/// concurrent callers never produce a second row for the same key.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Catalog operations ===

    /// Save a course (create or update).
    async fn save_course(&self, course: &Course) -> Result<()>;

    /// Load a course by ID.
    async fn load_course(&self, id: CourseId) -> Result<Option<Course>>;

    /// List all courses.
    async fn list_courses(&self) -> Result<Vec<Course>>;

    /// Save a module (create or update).
    async fn save_module(&self, module: &Module) -> Result<()>;

    /// Load a module by ID.
    async fn load_module(&self, id: ModuleId) -> Result<Option<Module>>;

    /// List the modules of a course, in no particular order.
    async fn list_modules(&self, course_id: CourseId) -> Result<Vec<Module>>;

    /// Save a lesson (create or update).
    async fn save_lesson(&self, lesson: &Lesson) -> Result<()>;

    /// Load a lesson by ID.
    async fn load_lesson(&self, id: LessonId) -> Result<Option<Lesson>>;

    /// List the lessons of a module, in no particular order.
    async fn list_lessons(&self, module_id: ModuleId) -> Result<Vec<Lesson>>;

    // === Enrollment operations ===

    /// Load the enrollment for (user, course).
    async fn load_enrollment(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Enrollment>>;

    /// Insert an enrollment unless one exists for the same (user, course).
    ///
    /// Returns whichever record is stored afterwards.
    async fn insert_enrollment_if_absent(&self, enrollment: &Enrollment) -> Result<Enrollment>;

    /// Set `completed_at` if it is still unset. Returns `None` when there is
    /// no enrollment for (user, course).
    async fn mark_enrollment_completed(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        at: Time,
    ) -> Result<Option<Enrollment>>;

    /// List all enrollments of a user.
    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<Enrollment>>;

    // === Lesson progress operations ===

    /// Load the progress row for (user, lesson).
    async fn load_lesson_progress(&self, user_id: &UserId, lesson_id: LessonId) -> Result<Option<LessonProgress>>;

    /// Atomically apply `update` to the row for (user, lesson), creating it
    /// if absent.
    async fn update_lesson_progress(
        &self,
        user_id: &UserId,
        lesson_id: LessonId,
        update: ProgressUpdate<'_>,
    ) -> Result<LessonProgress>;

    /// List a user's progress rows restricted to the given lessons.
    async fn list_lesson_progress(&self, user_id: &UserId, lesson_ids: &[LessonId]) -> Result<Vec<LessonProgress>>;

    // === Certificate operations ===

    /// Load the certificate for (user, course).
    async fn load_certificate(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Certificate>>;

    /// Find a certificate by its verification code.
    async fn load_certificate_by_code(&self, code: &VerificationCode) -> Result<Option<Certificate>>;

    /// Insert a certificate unless one exists for the same (user, course).
    ///
    /// Returns whichever record is stored afterwards. Fails with
    /// [`StorageError::Conflict`] if the verification code is taken by
    /// another certificate.
    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate>;

    /// List all certificates of a user.
    async fn list_certificates(&self, user_id: &UserId) -> Result<Vec<Certificate>>;
}
