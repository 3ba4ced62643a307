//! Catalog model - courses, modules and lessons.
//!
//! The catalog is managed from the admin side; the tracker only reads it
//! to learn the order of lessons within a course.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::id::{CourseId, LessonId, ModuleId};
use crate::video::VideoRef;
use crate::Time;

/// A course is an ordered list of modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    /// Unique identifier
    pub id: CourseId,

    /// Course title
    pub title: String,

    /// Whether learners can see the course
    pub published: bool,

    /// Created at
    pub created_at: Time,
}

impl Course {
    /// Create a new, unpublished course.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: CourseId::new(),
            title: title.into(),
            published: false,
            created_at: chrono::Utc::now(),
        }
    }
}

/// A module groups lessons within a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Unique identifier
    pub id: ModuleId,

    /// Owning course
    pub course_id: CourseId,

    /// Module title
    pub title: String,

    /// Position within the course, unique per course
    pub order: i32,
}

impl Module {
    /// Create a new module.
    pub fn new(course_id: CourseId, title: impl Into<String>, order: i32) -> Self {
        Self {
            id: ModuleId::new(),
            course_id,
            title: title.into(),
            order,
        }
    }
}

/// A downloadable resource attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Display name
    pub title: String,

    /// Where the file lives
    pub url: String,
}

/// A single unit of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// Unique identifier
    pub id: LessonId,

    /// Owning module
    pub module_id: ModuleId,

    /// Lesson title
    pub title: String,

    /// Position within the module, unique per module
    pub order: i32,

    /// Optional video
    pub video: Option<VideoRef>,

    /// Optional static notes
    pub notes: Option<String>,

    /// Attached resources
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Whether learners can see the lesson
    pub published: bool,
}

impl Lesson {
    /// Create a new published lesson with no content attached.
    pub fn new(module_id: ModuleId, title: impl Into<String>, order: i32) -> Self {
        Self {
            id: LessonId::new(),
            module_id,
            title: title.into(),
            order,
            video: None,
            notes: None,
            resources: Vec::new(),
            published: true,
        }
    }
}

/// The canonical, flattened lesson order of a course.
///
/// Modules are taken in ascending `order`, and within each module its
/// lessons in ascending `order`. Built once per read of the catalog and
/// handed to the lock and resume rules so they all see the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonSequence {
    course_id: CourseId,
    lessons: Vec<Lesson>,
}

impl LessonSequence {
    /// Flatten a course's modules and lessons into course order.
    ///
    /// Lessons whose module is not among `modules` are dropped.
    pub fn from_catalog(course_id: CourseId, mut modules: Vec<Module>, lessons: Vec<Lesson>) -> Self {
        modules.retain(|m| m.course_id == course_id);
        modules.sort_by_key(|m| m.order);

        let mut by_module: HashMap<ModuleId, Vec<Lesson>> = HashMap::new();
        for lesson in lessons {
            by_module.entry(lesson.module_id).or_default().push(lesson);
        }

        let mut ordered = Vec::new();
        for module in &modules {
            if let Some(mut group) = by_module.remove(&module.id) {
                group.sort_by_key(|l| l.order);
                ordered.extend(group);
            }
        }

        Self {
            course_id,
            lessons: ordered,
        }
    }

    /// Course this sequence belongs to.
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    /// Lessons in course order.
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    /// Total number of lessons in the course.
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// True if the course has no lessons at all.
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Index of a lesson in course order.
    pub fn position(&self, lesson_id: LessonId) -> Option<usize> {
        self.lessons.iter().position(|l| l.id == lesson_id)
    }

    /// Look up a lesson of this course.
    pub fn get(&self, lesson_id: LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }

    /// Whether the lesson belongs to this course.
    pub fn contains(&self, lesson_id: LessonId) -> bool {
        self.position(lesson_id).is_some()
    }

    /// The lesson immediately before `lesson_id`, crossing module boundaries.
    pub fn previous(&self, lesson_id: LessonId) -> Option<&Lesson> {
        match self.position(lesson_id)? {
            0 => None,
            idx => self.lessons.get(idx - 1),
        }
    }

    /// First lesson of the course.
    pub fn first(&self) -> Option<&Lesson> {
        self.lessons.first()
    }

    /// Last lesson of the course.
    pub fn last(&self) -> Option<&Lesson> {
        self.lessons.last()
    }

    /// Lesson ids in course order.
    pub fn lesson_ids(&self) -> Vec<LessonId> {
        self.lessons.iter().map(|l| l.id).collect()
    }
}
