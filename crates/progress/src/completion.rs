//! Course completion percentage.

use serde::Serialize;
use academy_core::LessonSequence;
use crate::navigation::{is_completed, ProgressMap};

/// A learner's completion of one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourseProgress {
    /// Lessons of the course marked complete
    pub completed_lessons: usize,

    /// Lessons in the course
    pub total_lessons: usize,

    /// `round(100 * completed / total)`, 0 for a course without lessons
    pub percent: u8,
}

impl CourseProgress {
    /// Count completed lessons of `sequence` in `progress`.
    pub fn measure(sequence: &LessonSequence, progress: &ProgressMap) -> Self {
        let completed_lessons = sequence
            .lessons()
            .iter()
            .filter(|l| is_completed(progress, l.id))
            .count();
        let total_lessons = sequence.len();

        Self {
            completed_lessons,
            total_lessons,
            percent: completion_percent(completed_lessons, total_lessons),
        }
    }

    /// The percentage has reached 100. This gates enrollment completion and
    /// certificate issuance. An empty course is never complete.
    pub fn is_complete(&self) -> bool {
        self.percent >= 100
    }

    /// Every lesson is marked complete, with no rounding involved.
    pub fn all_lessons_completed(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons >= self.total_lessons
    }
}

/// Percentage of `completed` over `total`, rounded half up.
///
/// In courses with 200 or more lessons a single missing lesson already
/// rounds to 100.
pub fn completion_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(completion_percent(2, 6), 33);
        assert_eq!(completion_percent(1, 3), 33);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(1, 4), 25);
        assert_eq!(completion_percent(1, 8), 13);
        assert_eq!(completion_percent(4, 4), 100);
    }

    #[test]
    fn test_empty_course_is_zero() {
        assert_eq!(completion_percent(0, 0), 0);
    }

    #[test]
    fn test_large_course_rounds_to_full() {
        assert_eq!(completion_percent(199, 200), 100);
        assert_eq!(completion_percent(399, 400), 100);
        assert_eq!(completion_percent(198, 200), 99);

        let progress = CourseProgress {
            completed_lessons: 199,
            total_lessons: 200,
            percent: completion_percent(199, 200),
        };
        assert!(progress.is_complete());
        assert!(!progress.all_lessons_completed());
    }

    #[test]
    fn test_empty_course_never_complete() {
        let progress = CourseProgress {
            completed_lessons: 0,
            total_lessons: 0,
            percent: completion_percent(0, 0),
        };
        assert!(!progress.is_complete());
        assert!(!progress.all_lessons_completed());
    }
}
