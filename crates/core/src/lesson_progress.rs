//! Per-lesson progress of a learner.

use serde::{Deserialize, Serialize};
use crate::id::{LessonId, LessonProgressId, UserId};
use crate::Time;

/// Completion and watch time of one user on one lesson.
///
/// Unique per (user, lesson). Created on first interaction and updated in
/// place afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    /// Unique identifier
    pub id: LessonProgressId,

    /// Learner
    pub user_id: UserId,

    /// Lesson
    pub lesson_id: LessonId,

    /// Whether the lesson is marked complete
    pub completed: bool,

    /// Set on the false -> true transition, cleared on true -> false
    pub completed_at: Option<Time>,

    /// Cumulative seconds watched; never decreases
    pub watch_time: u64,

    /// Created at
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl LessonProgress {
    /// Create an empty, incomplete record.
    pub fn new(user_id: UserId, lesson_id: LessonId, now: Time) -> Self {
        Self {
            id: LessonProgressId::new(),
            user_id,
            lesson_id,
            completed: false,
            completed_at: None,
            watch_time: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to the target completion state.
    ///
    /// Setting the value it already holds leaves `completed_at` alone.
    /// Returns whether the completion flag changed.
    pub fn set_completed(&mut self, completed: bool, now: Time) -> bool {
        if self.completed == completed {
            return false;
        }
        self.completed = completed;
        self.completed_at = if completed { Some(now) } else { None };
        self.updated_at = now;
        true
    }

    /// Fold in a reported watch time. Lower values than stored are ignored.
    pub fn record_watch_time(&mut self, seconds: u64, now: Time) {
        if seconds > self.watch_time {
            self.watch_time = seconds;
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn progress() -> LessonProgress {
        LessonProgress::new(UserId::from("u1"), LessonId::new(), Utc::now())
    }

    #[test]
    fn test_completion_timestamp_fixed_on_repeat() {
        let mut p = progress();
        let t1 = Utc::now();
        assert!(p.set_completed(true, t1));
        assert!(!p.set_completed(true, t1 + Duration::seconds(30)));
        assert_eq!(p.completed_at, Some(t1));
    }

    #[test]
    fn test_regression_clears_timestamp() {
        let mut p = progress();
        let t1 = Utc::now();
        p.set_completed(true, t1);
        assert!(p.set_completed(false, t1 + Duration::seconds(1)));
        assert!(!p.completed);
        assert!(p.completed_at.is_none());
    }

    #[test]
    fn test_watch_time_is_monotonic() {
        let mut p = progress();
        let now = Utc::now();
        p.record_watch_time(120, now);
        p.record_watch_time(30, now);
        assert_eq!(p.watch_time, 120);
    }
}
