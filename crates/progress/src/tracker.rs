//! Progress tracking service.

use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use academy_core::{
    Certificate, Course, CourseId, CourseState, Enrollment, Lesson, LessonId, LessonProgress,
    LessonSequence, UserId, VerificationCode,
};
use academy_storage::{Storage, StorageError};

use crate::certificate::generate_verification_code;
use crate::completion::CourseProgress;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::navigation::{
    blocking_lesson, is_completed, is_lesson_locked, progress_map, resolve_current_lesson, ProgressMap,
};

/// Progress tracking service.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Return the user's enrollment in the course, creating it on first access.
    async fn ensure_enrollment(&self, user_id: &UserId, course_id: CourseId) -> Result<Enrollment>;

    /// Canonical lesson order of a course.
    async fn course_sequence(&self, course_id: CourseId) -> Result<LessonSequence>;

    /// Move a lesson to the target completion state and recompute the
    /// course percentage. Calling it twice with the same target is a no-op
    /// the second time.
    async fn set_lesson_completion(
        &self,
        user_id: &UserId,
        lesson_id: LessonId,
        completed: bool,
        watch_time: Option<u64>,
    ) -> Result<CompletionOutcome>;

    /// Record a playback progress ping.
    async fn record_watch_time(&self, user_id: &UserId, lesson_id: LessonId, seconds: u64) -> Result<LessonProgress>;

    /// Check that the learner may move to a lesson from the course outline.
    async fn navigate_to_lesson(&self, user_id: &UserId, course_id: CourseId, lesson_id: LessonId) -> Result<Lesson>;

    /// Build the learning view of a course, auto-enrolling the user.
    async fn open_course(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        requested_lesson: Option<LessonId>,
    ) -> Result<CourseView>;

    /// Live completion of a course.
    async fn course_progress(&self, user_id: &UserId, course_id: CourseId) -> Result<CourseProgress>;

    /// Lifecycle state of the user in a course.
    async fn course_state(&self, user_id: &UserId, course_id: CourseId) -> Result<CourseState>;

    /// Issue the completion certificate, or return the one already issued.
    async fn issue_certificate(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        signature: Option<String>,
    ) -> Result<Certificate>;

    /// Look up a certificate by the code printed on it.
    async fn verify_certificate(&self, code: &str) -> Result<Option<Certificate>>;
}

/// Result of a completion change.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    /// Stored progress row after the change
    pub progress: LessonProgress,

    /// Course completion recomputed after the change
    pub course: CourseProgress,

    /// This call took the course to 100% for the first time
    pub course_completed_now: bool,
}

impl CompletionOutcome {
    /// Recomputed course completion percentage.
    pub fn course_completion_percent(&self) -> u8 {
        self.course.percent
    }
}

/// One lesson in the course outline of the learning view.
#[derive(Debug, Clone, Serialize)]
pub struct LessonEntry {
    /// The lesson
    pub lesson: Lesson,

    /// Marked complete by the learner
    pub completed: bool,

    /// Cannot be navigated to from the outline yet
    pub locked: bool,

    /// Seconds watched so far
    pub watch_time: u64,
}

/// Everything the learning view needs for one course.
#[derive(Debug, Clone, Serialize)]
pub struct CourseView {
    /// The course
    pub course: Course,

    /// The learner's enrollment
    pub enrollment: Enrollment,

    /// Lesson to display, `None` only for a course without lessons
    pub current_lesson: Option<LessonId>,

    /// Outline in course order
    pub lessons: Vec<LessonEntry>,

    /// Live completion
    pub progress: CourseProgress,

    /// Lifecycle state
    pub state: CourseState,
}

/// Basic progress tracker implementation.
pub struct BasicProgressTracker<S: Storage> {
    storage: Arc<S>,
    config: TrackerConfig,
}

impl<S: Storage> BasicProgressTracker<S> {
    /// Create a new progress tracker.
    pub fn new(storage: S) -> Self {
        Self::from_shared(Arc::new(storage))
    }

    /// Create a tracker over a storage handle shared with other services.
    pub fn from_shared(storage: Arc<S>) -> Self {
        Self {
            storage,
            config: TrackerConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The storage this tracker writes to.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn load_course(&self, course_id: CourseId) -> Result<Course> {
        self.storage
            .load_course(course_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("course {}", course_id)))
    }

    /// Find the course a lesson belongs to through its module.
    async fn owning_course(&self, lesson_id: LessonId) -> Result<CourseId> {
        let lesson = self
            .storage
            .load_lesson(lesson_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("lesson {}", lesson_id)))?;
        let module = self
            .storage
            .load_module(lesson.module_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("module {}", lesson.module_id)))?;
        Ok(module.course_id)
    }

    async fn load_progress(&self, user_id: &UserId, sequence: &LessonSequence) -> Result<ProgressMap> {
        let rows = self
            .storage
            .list_lesson_progress(user_id, &sequence.lesson_ids())
            .await?;
        Ok(progress_map(rows))
    }
}

#[async_trait]
impl<S: Storage + 'static> ProgressTracker for BasicProgressTracker<S> {
    async fn ensure_enrollment(&self, user_id: &UserId, course_id: CourseId) -> Result<Enrollment> {
        if let Some(existing) = self.storage.load_enrollment(user_id, course_id).await? {
            return Ok(existing);
        }

        self.load_course(course_id).await?;
        let candidate = Enrollment::new(user_id.clone(), course_id, Utc::now());
        let enrollment = self.storage.insert_enrollment_if_absent(&candidate).await?;
        if enrollment.id == candidate.id {
            info!(user = %user_id, course = %course_id, "enrolled");
        }
        Ok(enrollment)
    }

    async fn course_sequence(&self, course_id: CourseId) -> Result<LessonSequence> {
        self.load_course(course_id).await?;

        let modules = self.storage.list_modules(course_id).await?;
        let mut lessons = Vec::new();
        for module in &modules {
            lessons.extend(self.storage.list_lessons(module.id).await?);
        }

        Ok(LessonSequence::from_catalog(course_id, modules, lessons))
    }

    async fn set_lesson_completion(
        &self,
        user_id: &UserId,
        lesson_id: LessonId,
        completed: bool,
        watch_time: Option<u64>,
    ) -> Result<CompletionOutcome> {
        let course_id = self.owning_course(lesson_id).await?;
        let sequence = self.course_sequence(course_id).await?;
        self.ensure_enrollment(user_id, course_id).await?;

        let now = Utc::now();
        let owner = user_id.clone();
        let progress = self
            .storage
            .update_lesson_progress(user_id, lesson_id, &move |current: Option<LessonProgress>| {
                let mut row = current.unwrap_or_else(|| LessonProgress::new(owner.clone(), lesson_id, now));
                row.set_completed(completed, now);
                if let Some(seconds) = watch_time {
                    row.record_watch_time(seconds, now);
                }
                row
            })
            .await?;

        if completed {
            debug!(user = %user_id, lesson = %lesson_id, "lesson completed");
        } else {
            debug!(user = %user_id, lesson = %lesson_id, "lesson marked incomplete");
        }

        let progress_by_lesson = self.load_progress(user_id, &sequence).await?;
        let course = CourseProgress::measure(&sequence, &progress_by_lesson);

        let mut course_completed_now = false;
        if course.is_complete() {
            let enrollment = self
                .storage
                .mark_enrollment_completed(user_id, course_id, now)
                .await?
                .ok_or_else(|| TrackerError::NotFound(format!("enrollment {}/{}", user_id, course_id)))?;
            course_completed_now = enrollment.completed_at == Some(now);
            if course_completed_now {
                info!(user = %user_id, course = %course_id, "course completed");
            }
        }

        Ok(CompletionOutcome {
            progress,
            course,
            course_completed_now,
        })
    }

    async fn record_watch_time(&self, user_id: &UserId, lesson_id: LessonId, seconds: u64) -> Result<LessonProgress> {
        self.owning_course(lesson_id).await?;

        let now = Utc::now();
        let owner = user_id.clone();
        let progress = self
            .storage
            .update_lesson_progress(user_id, lesson_id, &move |current: Option<LessonProgress>| {
                let mut row = current.unwrap_or_else(|| LessonProgress::new(owner.clone(), lesson_id, now));
                row.record_watch_time(seconds, now);
                row
            })
            .await?;

        Ok(progress)
    }

    async fn navigate_to_lesson(&self, user_id: &UserId, course_id: CourseId, lesson_id: LessonId) -> Result<Lesson> {
        let sequence = self.course_sequence(course_id).await?;
        let lesson = sequence
            .get(lesson_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("lesson {} in course {}", lesson_id, course_id)))?;

        let progress_by_lesson = self.load_progress(user_id, &sequence).await?;
        if let Some(blocker) = blocking_lesson(lesson_id, &sequence, &progress_by_lesson) {
            warn!(user = %user_id, lesson = %lesson_id, blocked_by = %blocker.id, "navigation into locked lesson refused");
            return Err(TrackerError::Locked {
                lesson: lesson_id,
                blocked_by: blocker.id,
            });
        }

        Ok(lesson)
    }

    async fn open_course(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        requested_lesson: Option<LessonId>,
    ) -> Result<CourseView> {
        let course = self.load_course(course_id).await?;
        let enrollment = self.ensure_enrollment(user_id, course_id).await?;
        let sequence = self.course_sequence(course_id).await?;
        let progress_by_lesson = self.load_progress(user_id, &sequence).await?;

        let current_lesson = resolve_current_lesson(&sequence, requested_lesson, &progress_by_lesson).map(|l| l.id);
        let lessons = sequence
            .lessons()
            .iter()
            .map(|lesson| LessonEntry {
                lesson: lesson.clone(),
                completed: is_completed(&progress_by_lesson, lesson.id),
                locked: is_lesson_locked(lesson.id, &sequence, &progress_by_lesson),
                watch_time: progress_by_lesson.get(&lesson.id).map_or(0, |p| p.watch_time),
            })
            .collect();
        let progress = CourseProgress::measure(&sequence, &progress_by_lesson);
        let state = enrollment.state();

        Ok(CourseView {
            course,
            enrollment,
            current_lesson,
            lessons,
            progress,
            state,
        })
    }

    async fn course_progress(&self, user_id: &UserId, course_id: CourseId) -> Result<CourseProgress> {
        let sequence = self.course_sequence(course_id).await?;
        let progress_by_lesson = self.load_progress(user_id, &sequence).await?;
        Ok(CourseProgress::measure(&sequence, &progress_by_lesson))
    }

    async fn course_state(&self, user_id: &UserId, course_id: CourseId) -> Result<CourseState> {
        self.load_course(course_id).await?;
        let enrollment = self.storage.load_enrollment(user_id, course_id).await?;
        Ok(CourseState::of(enrollment.as_ref()))
    }

    async fn issue_certificate(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        signature: Option<String>,
    ) -> Result<Certificate> {
        if let Some(existing) = self.storage.load_certificate(user_id, course_id).await? {
            return Ok(existing);
        }

        let progress = self.course_progress(user_id, course_id).await?;
        if !progress.is_complete() {
            return Err(TrackerError::NotEligible {
                percent: progress.percent,
            });
        }

        for attempt in 1..=self.config.max_code_attempts {
            let code = generate_verification_code(&self.config);
            if self.storage.load_certificate_by_code(&code).await?.is_some() {
                debug!(attempt, "verification code already taken, drawing another");
                continue;
            }

            let candidate = Certificate::new(user_id.clone(), course_id, code, signature.clone(), Utc::now());
            match self.storage.insert_certificate(&candidate).await {
                Ok(certificate) => {
                    if certificate.id == candidate.id {
                        info!(user = %user_id, course = %course_id, code = %certificate.verification_code, "certificate issued");
                    }
                    return Ok(certificate);
                }
                Err(StorageError::Conflict(reason)) => {
                    debug!(attempt, %reason, "verification code collided on insert");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TrackerError::CodeGeneration {
            attempts: self.config.max_code_attempts,
        })
    }

    async fn verify_certificate(&self, code: &str) -> Result<Option<Certificate>> {
        let code = VerificationCode::parse(code);
        Ok(self.storage.load_certificate_by_code(&code).await?)
    }
}
