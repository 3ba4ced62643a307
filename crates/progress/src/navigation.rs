//! Lesson unlocking and resume rules.
//!
//! Lessons are consumed strictly in course order: a lesson opens once the
//! lesson right before it (module boundaries included) is completed. The
//! rules here are pure functions over a [`LessonSequence`] and the
//! learner's progress rows.

use std::collections::HashMap;
use academy_core::{Lesson, LessonId, LessonProgress, LessonSequence};

/// A learner's progress rows keyed by lesson.
pub type ProgressMap = HashMap<LessonId, LessonProgress>;

/// Index progress rows by lesson id.
pub fn progress_map(rows: impl IntoIterator<Item = LessonProgress>) -> ProgressMap {
    rows.into_iter().map(|p| (p.lesson_id, p)).collect()
}

/// Whether the learner has the lesson marked complete. No row counts as
/// not completed.
pub fn is_completed(progress: &ProgressMap, lesson_id: LessonId) -> bool {
    progress.get(&lesson_id).is_some_and(|p| p.completed)
}

/// The lesson that has to be completed before `lesson_id` opens, if any.
pub fn blocking_lesson<'a>(
    lesson_id: LessonId,
    sequence: &'a LessonSequence,
    progress: &ProgressMap,
) -> Option<&'a Lesson> {
    sequence
        .previous(lesson_id)
        .filter(|prev| !is_completed(progress, prev.id))
}

/// A lesson is locked iff it is not the first lesson of the course and its
/// immediate predecessor is not completed.
///
/// Lessons that are not part of `sequence` have no predecessor and are
/// reported as unlocked; callers check membership first.
pub fn is_lesson_locked(lesson_id: LessonId, sequence: &LessonSequence, progress: &ProgressMap) -> bool {
    blocking_lesson(lesson_id, sequence, progress).is_some()
}

/// Pick the lesson to show when a learner opens a course.
///
/// 1. The requested lesson, if it belongs to the course. Locks are not
///    applied here; direct links may show a locked lesson's page.
/// 2. Otherwise the first lesson not yet completed.
/// 3. Otherwise, everything being complete, the last lesson.
///
/// Returns `None` only for a course without lessons.
pub fn resolve_current_lesson<'a>(
    sequence: &'a LessonSequence,
    requested: Option<LessonId>,
    progress: &ProgressMap,
) -> Option<&'a Lesson> {
    if let Some(lesson) = requested.and_then(|id| sequence.get(id)) {
        return Some(lesson);
    }

    sequence
        .lessons()
        .iter()
        .find(|l| !is_completed(progress, l.id))
        .or_else(|| sequence.last())
}
