//! Enrollment model - a learner taking a course.

use serde::{Deserialize, Serialize};
use crate::id::{CourseId, EnrollmentId, UserId};
use crate::Time;

/// Ties one user to one course. Unique per (user, course).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    /// Unique identifier
    pub id: EnrollmentId,

    /// Learner
    pub user_id: UserId,

    /// Course being taken
    pub course_id: CourseId,

    /// When the learner first opened the course. Never changes.
    pub started_at: Time,

    /// First time the course reached 100%. Set once, never cleared.
    pub completed_at: Option<Time>,
}

impl Enrollment {
    /// Create a fresh enrollment starting at `now`.
    pub fn new(user_id: UserId, course_id: CourseId, now: Time) -> Self {
        Self {
            id: EnrollmentId::new(),
            user_id,
            course_id,
            started_at: now,
            completed_at: None,
        }
    }

    /// Record that the course reached 100%.
    ///
    /// Returns `false` if it had already been recorded; the original
    /// timestamp is kept.
    pub fn mark_completed(&mut self, now: Time) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(now);
        true
    }

    /// Lifecycle state of this enrollment.
    pub fn state(&self) -> CourseState {
        if self.completed_at.is_some() {
            CourseState::Completed
        } else {
            CourseState::InProgress
        }
    }
}

/// Lifecycle of a user within a course.
///
/// `Completed` is terminal: it reflects that the course reached 100% at
/// some point, not the live percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourseState {
    /// No enrollment exists yet
    NotStarted,
    /// Enrolled, never reached 100%
    InProgress,
    /// Reached 100% at least once
    Completed,
}

impl CourseState {
    /// Derive the state from an optional enrollment record.
    pub fn of(enrollment: Option<&Enrollment>) -> Self {
        enrollment.map_or(CourseState::NotStarted, Enrollment::state)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseState::NotStarted => "NotStarted",
            CourseState::InProgress => "InProgress",
            CourseState::Completed => "Completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_mark_completed_is_one_way() {
        let start = Utc::now();
        let mut enrollment = Enrollment::new(UserId::from("u1"), CourseId::new(), start);
        assert_eq!(enrollment.state(), CourseState::InProgress);

        let first = start + Duration::minutes(5);
        assert!(enrollment.mark_completed(first));
        assert!(!enrollment.mark_completed(first + Duration::minutes(5)));

        assert_eq!(enrollment.completed_at, Some(first));
        assert_eq!(enrollment.started_at, start);
        assert_eq!(enrollment.state(), CourseState::Completed);
    }

    #[test]
    fn test_state_without_enrollment() {
        assert_eq!(CourseState::of(None), CourseState::NotStarted);
    }
}
