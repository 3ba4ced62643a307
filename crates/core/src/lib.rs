//! Viral Academy core data models.
//!
//! This crate defines the catalog structure and the per-learner records
//! that the progress tracker reads and writes.

#![warn(missing_docs)]

// Core identities
mod id;

// Catalog
mod catalog;
pub mod video;

// Learner records
mod enrollment;
mod lesson_progress;
mod certificate;

// Re-exports
pub use id::*;

// Catalog
pub use catalog::{Course, Module, Lesson, Resource, LessonSequence};
pub use video::{VideoRef, VideoProvider};

// Learner records
pub use enrollment::{Enrollment, CourseState};
pub use lesson_progress::LessonProgress;
pub use certificate::{Certificate, VerificationCode};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
