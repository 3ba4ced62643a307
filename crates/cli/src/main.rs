//! Viral Academy CLI - catalog and learner progress from the terminal.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use academy_core::{Course, CourseId, Lesson, LessonId, Module, ModuleId, UserId, VideoRef};
use academy_progress::{BasicProgressTracker, ProgressTracker, TrackerConfig, TrackerError};
use academy_storage::{JsonStorage, Storage};

#[derive(Parser)]
#[command(name = "academy")]
#[command(about = "Course progress tracking for Viral Academy", long_about = None)]
struct Cli {
    /// Directory holding the academy data
    #[arg(long, env = "ACADEMY_DATA_DIR", default_value = ".academy", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a course
    AddCourse {
        /// Course title
        title: String,
        /// Make it visible to learners
        #[arg(long)]
        published: bool,
    },
    /// Add a module to a course
    AddModule {
        /// Course ID
        course: CourseId,
        /// Module title
        title: String,
        /// Position within the course
        #[arg(long)]
        order: i32,
    },
    /// Add a lesson to a module
    AddLesson {
        /// Module ID
        module: ModuleId,
        /// Lesson title
        title: String,
        /// Position within the module
        #[arg(long)]
        order: i32,
        /// YouTube video id
        #[arg(long, conflicts_with = "vimeo")]
        youtube: Option<String>,
        /// Vimeo video id
        #[arg(long)]
        vimeo: Option<String>,
        /// Static lesson notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List courses
    Courses,
    /// Show a course's lessons in order
    Outline {
        /// Course ID
        course: CourseId,
    },
    /// Open a course as a learner (enrolls on first use)
    Open {
        /// User ID
        user: String,
        /// Course ID
        course: CourseId,
        /// Lesson to jump to
        #[arg(long)]
        lesson: Option<LessonId>,
    },
    /// Mark a lesson complete (or incomplete with --undo)
    Complete {
        /// User ID
        user: String,
        /// Lesson ID
        lesson: LessonId,
        /// Mark incomplete instead
        #[arg(long)]
        undo: bool,
        /// Seconds watched
        #[arg(long)]
        watch_time: Option<u64>,
    },
    /// Report seconds watched on a lesson
    Watch {
        /// User ID
        user: String,
        /// Lesson ID
        lesson: LessonId,
        /// Seconds watched
        seconds: u64,
    },
    /// Move to a lesson from the course outline
    Goto {
        /// User ID
        user: String,
        /// Course ID
        course: CourseId,
        /// Lesson ID
        lesson: LessonId,
    },
    /// Show completion of a course
    Progress {
        /// User ID
        user: String,
        /// Course ID
        course: CourseId,
    },
    /// List a user's enrollments and certificates
    Enrollments {
        /// User ID
        user: String,
    },
    /// Issue the completion certificate
    Certificate {
        /// User ID
        user: String,
        /// Course ID
        course: CourseId,
        /// Signature image reference
        #[arg(long)]
        signature: Option<String>,
    },
    /// Look up a certificate by verification code
    Verify {
        /// Verification code
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let storage = JsonStorage::new(&cli.data_dir)
        .await
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;
    let config = load_config(&cli.data_dir)?;
    let tracker = BasicProgressTracker::new(storage).with_config(config);
    let storage = tracker.storage();

    match cli.command {
        Commands::AddCourse { title, published } => {
            let mut course = Course::new(title);
            course.published = published;
            storage.save_course(&course).await?;
            println!("Added course: {} - {}", course.id, course.title);
        }
        Commands::AddModule { course, title, order } => {
            storage
                .load_course(course)
                .await?
                .with_context(|| format!("course {} not found", course))?;
            let module = Module::new(course, title, order);
            storage.save_module(&module).await?;
            println!("Added module: {} - {}", module.id, module.title);
        }
        Commands::AddLesson { module, title, order, youtube, vimeo, notes } => {
            storage
                .load_module(module)
                .await?
                .with_context(|| format!("module {} not found", module))?;
            let mut lesson = Lesson::new(module, title, order);
            lesson.video = youtube.map(VideoRef::youtube).or(vimeo.map(VideoRef::vimeo));
            lesson.notes = notes;
            storage.save_lesson(&lesson).await?;
            println!("Added lesson: {} - {}", lesson.id, lesson.title);
        }
        Commands::Courses => {
            let courses = storage.list_courses().await?;
            println!("Courses ({})", courses.len());
            for course in courses {
                println!("  {} | {} | {}",
                    course.id,
                    if course.published { "PUBLISHED" } else { "DRAFT" },
                    course.title,
                );
            }
        }
        Commands::Outline { course } => {
            let sequence = tracker.course_sequence(course).await?;
            println!("Lessons ({})", sequence.len());
            for (idx, lesson) in sequence.lessons().iter().enumerate() {
                let video = lesson
                    .video
                    .as_ref()
                    .map(|v| format!(" [{:?} {}]", v.provider, v.encoded_id()))
                    .unwrap_or_default();
                println!("  {:>3}. {} - {}{}", idx + 1, lesson.id, lesson.title, video);
            }
        }
        Commands::Open { user, course, lesson } => {
            let view = tracker.open_course(&UserId::new(user), course, lesson).await?;
            println!("{} ({}, {}%)", view.course.title, view.state.as_str(), view.progress.percent);
            for entry in &view.lessons {
                let marker = if Some(entry.lesson.id) == view.current_lesson { ">" } else { " " };
                let status = if entry.completed {
                    "DONE"
                } else if entry.locked {
                    "LOCKED"
                } else {
                    "OPEN"
                };
                println!("  {} {:<6} {} - {}", marker, status, entry.lesson.id, entry.lesson.title);
            }
        }
        Commands::Complete { user, lesson, undo, watch_time } => {
            let user = UserId::new(user);
            let outcome = tracker.set_lesson_completion(&user, lesson, !undo, watch_time).await?;
            println!("Lesson {}: {}", lesson, if outcome.progress.completed { "completed" } else { "not completed" });
            println!("Course: {}%", outcome.course_completion_percent());
            if outcome.course_completed_now {
                println!("Course complete! Request your certificate with `academy certificate`.");
            }
        }
        Commands::Watch { user, lesson, seconds } => {
            let progress = tracker.record_watch_time(&UserId::new(user), lesson, seconds).await?;
            println!("Watched {}s of lesson {}", progress.watch_time, lesson);
        }
        Commands::Goto { user, course, lesson } => {
            match tracker.navigate_to_lesson(&UserId::new(user), course, lesson).await {
                Ok(lesson) => println!("Now on: {} - {}", lesson.id, lesson.title),
                Err(TrackerError::Locked { blocked_by, .. }) => {
                    anyhow::bail!("This lesson is locked. Complete lesson {} first.", blocked_by)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Progress { user, course } => {
            let user = UserId::new(user);
            let progress = tracker.course_progress(&user, course).await?;
            let state = tracker.course_state(&user, course).await?;
            println!("Course {}", course);
            println!("  State: {}", state.as_str());
            println!("  Lessons: {}/{}", progress.completed_lessons, progress.total_lessons);
            println!("  Complete: {}%", progress.percent);
        }
        Commands::Enrollments { user } => {
            let user = UserId::new(user);
            let enrollments = storage.list_enrollments(&user).await?;
            println!("Enrollments ({})", enrollments.len());
            for enrollment in enrollments {
                let certificate = storage.load_certificate(&user, enrollment.course_id).await?;
                println!("  {} | {} | started {} | certificate {}",
                    enrollment.course_id,
                    enrollment.state().as_str(),
                    enrollment.started_at.format("%Y-%m-%d"),
                    certificate.map(|c| c.verification_code.to_string()).unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        Commands::Certificate { user, course, signature } => {
            let certificate = tracker.issue_certificate(&UserId::new(user), course, signature).await?;
            println!("Certificate: {}", certificate.verification_code);
            println!("  Issued: {}", certificate.issued_at);
        }
        Commands::Verify { code } => {
            match tracker.verify_certificate(&code).await? {
                Some(certificate) => {
                    let course = storage.load_course(certificate.course_id).await?;
                    println!("Valid certificate {}", certificate.verification_code);
                    println!("  Learner: {}", certificate.user_id);
                    println!("  Course: {}", course.map(|c| c.title).unwrap_or_else(|| certificate.course_id.to_string()));
                    println!("  Issued: {}", certificate.issued_at);
                }
                None => println!("No certificate with code {}", code),
            }
        }
    }

    Ok(())
}

/// Read `<data-dir>/config.json` if present.
fn load_config(data_dir: &Path) -> Result<TrackerConfig> {
    let path = data_dir.join("config.json");
    match std::fs::read_to_string(&path) {
        Ok(json) => {
            debug!("loading config from {}", path.display());
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TrackerConfig::default()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
