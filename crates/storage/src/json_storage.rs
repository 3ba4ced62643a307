//! JSON file storage implementation.
//!
//! Stores one JSON file per record under a data directory. Learner records
//! are named after their unique key (`<user>.<course>` or `<user>.<lesson>`)
//! so the key itself is the file name. Inserts publish the record with a
//! hard link, which fails when the file already exists, so insert-if-absent
//! holds across processes sharing a data directory, and a progress row is
//! never created twice. An in-process lock serialises read-modify-write for
//! all handles cloned from the same storage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use academy_core::{
    Certificate, Course, CourseId, Enrollment, Lesson, LessonId, LessonProgress, Module,
    ModuleId, Time, UserId, VerificationCode,
};
use super::{ProgressUpdate, Result, Storage, StorageError};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DIRS: &[&str] = &[
    "courses",
    "modules",
    "lessons",
    "enrollments",
    "progress",
    "certificates",
    "codes",
];

/// Longest escaped user key used verbatim in a file name.
const MAX_USER_KEY_LEN: usize = 96;

/// File-based JSON storage backend.
#[derive(Clone)]
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonStorage {
    /// Create storage, creating the record directories under `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for dir in DIRS {
            fs::create_dir_all(root.join(dir)).await?;
        }

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn course_path(&self, id: CourseId) -> PathBuf {
        self.root.join("courses").join(format!("{}.json", id))
    }
    fn module_path(&self, id: ModuleId) -> PathBuf {
        self.root.join("modules").join(format!("{}.json", id))
    }
    fn lesson_path(&self, id: LessonId) -> PathBuf {
        self.root.join("lessons").join(format!("{}.json", id))
    }
    fn enrollment_path(&self, user_id: &UserId, course_id: CourseId) -> PathBuf {
        self.root
            .join("enrollments")
            .join(format!("{}.{}.json", user_key(user_id), course_id))
    }
    fn progress_path(&self, user_id: &UserId, lesson_id: LessonId) -> PathBuf {
        self.root
            .join("progress")
            .join(format!("{}.{}.json", user_key(user_id), lesson_id))
    }
    fn certificate_path(&self, user_id: &UserId, course_id: CourseId) -> PathBuf {
        self.root
            .join("certificates")
            .join(format!("{}.{}.json", user_key(user_id), course_id))
    }
    fn code_path(&self, code: &VerificationCode) -> PathBuf {
        self.root.join("codes").join(file_key(code.as_str()))
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_course(&self, course: &Course) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.course_path(course.id), course).await
    }

    async fn load_course(&self, id: CourseId) -> Result<Option<Course>> {
        read_json(&self.course_path(id)).await
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let mut courses: Vec<Course> = list_dir(&self.root.join("courses")).await?;
        courses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(courses)
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.module_path(module.id), module).await
    }

    async fn load_module(&self, id: ModuleId) -> Result<Option<Module>> {
        read_json(&self.module_path(id)).await
    }

    async fn list_modules(&self, course_id: CourseId) -> Result<Vec<Module>> {
        let all = list_dir(&self.root.join("modules")).await?;
        Ok(all.into_iter()
            .filter(|m: &Module| m.course_id == course_id)
            .collect())
    }

    async fn save_lesson(&self, lesson: &Lesson) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.lesson_path(lesson.id), lesson).await
    }

    async fn load_lesson(&self, id: LessonId) -> Result<Option<Lesson>> {
        read_json(&self.lesson_path(id)).await
    }

    async fn list_lessons(&self, module_id: ModuleId) -> Result<Vec<Lesson>> {
        let all = list_dir(&self.root.join("lessons")).await?;
        Ok(all.into_iter()
            .filter(|l: &Lesson| l.module_id == module_id)
            .collect())
    }

    async fn load_enrollment(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Enrollment>> {
        read_json(&self.enrollment_path(user_id, course_id)).await
    }

    async fn insert_enrollment_if_absent(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        let _guard = self.write_lock.lock().await;
        let path = self.enrollment_path(&enrollment.user_id, enrollment.course_id);

        if let Some(existing) = read_json::<Enrollment>(&path).await? {
            return Ok(existing);
        }
        if create_json(&path, enrollment).await? {
            return Ok(enrollment.clone());
        }
        read_winner(&path).await
    }

    async fn mark_enrollment_completed(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        at: Time,
    ) -> Result<Option<Enrollment>> {
        let _guard = self.write_lock.lock().await;
        let path = self.enrollment_path(user_id, course_id);

        let Some(mut enrollment) = read_json::<Enrollment>(&path).await? else {
            return Ok(None);
        };
        if enrollment.mark_completed(at) {
            write_json(&path, &enrollment).await?;
        }
        Ok(Some(enrollment))
    }

    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<Enrollment>> {
        let all = list_dir(&self.root.join("enrollments")).await?;
        Ok(all.into_iter()
            .filter(|e: &Enrollment| &e.user_id == user_id)
            .collect())
    }

    async fn load_lesson_progress(&self, user_id: &UserId, lesson_id: LessonId) -> Result<Option<LessonProgress>> {
        read_json(&self.progress_path(user_id, lesson_id)).await
    }

    async fn update_lesson_progress(
        &self,
        user_id: &UserId,
        lesson_id: LessonId,
        update: ProgressUpdate<'_>,
    ) -> Result<LessonProgress> {
        let _guard = self.write_lock.lock().await;
        let path = self.progress_path(user_id, lesson_id);

        loop {
            let current = read_json::<LessonProgress>(&path).await?;
            let is_new = current.is_none();
            let updated = update(current);
            if &updated.user_id != user_id || updated.lesson_id != lesson_id {
                return Err(StorageError::Other(format!(
                    "progress update for {}/{} returned a row for {}/{}",
                    user_id, lesson_id, updated.user_id, updated.lesson_id
                )));
            }

            if !is_new {
                write_json(&path, &updated).await?;
                return Ok(updated);
            }
            // Another process created the row meanwhile: apply the update to theirs.
            if create_json(&path, &updated).await? {
                return Ok(updated);
            }
        }
    }

    async fn list_lesson_progress(&self, user_id: &UserId, lesson_ids: &[LessonId]) -> Result<Vec<LessonProgress>> {
        let mut rows = Vec::new();
        for lesson_id in lesson_ids {
            if let Some(row) = read_json(&self.progress_path(user_id, *lesson_id)).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn load_certificate(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Certificate>> {
        read_json(&self.certificate_path(user_id, course_id)).await
    }

    async fn load_certificate_by_code(&self, code: &VerificationCode) -> Result<Option<Certificate>> {
        let all: Vec<Certificate> = list_dir(&self.root.join("certificates")).await?;
        Ok(all.into_iter().find(|c| &c.verification_code == code))
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let _guard = self.write_lock.lock().await;
        let path = self.certificate_path(&certificate.user_id, certificate.course_id);

        if let Some(existing) = read_json::<Certificate>(&path).await? {
            return Ok(existing);
        }

        // The code file reserves the code before the certificate is published.
        let code_path = self.code_path(&certificate.verification_code);
        if !create_json(&code_path, &certificate.id).await? {
            return Err(StorageError::Conflict(format!(
                "verification code {} already issued",
                certificate.verification_code
            )));
        }

        if create_json(&path, certificate).await? {
            return Ok(certificate.clone());
        }
        if let Err(e) = fs::remove_file(&code_path).await {
            warn!(path = %code_path.display(), error = %e, "failed to release verification code");
        }
        read_winner(&path).await
    }

    async fn list_certificates(&self, user_id: &UserId) -> Result<Vec<Certificate>> {
        let all = list_dir(&self.root.join("certificates")).await?;
        Ok(all.into_iter()
            .filter(|c: &Certificate| &c.user_id == user_id)
            .collect())
    }
}

/// File-name-safe form of a user id.
///
/// Anything outside `[A-Za-z0-9-]` is escaped as `_xx` so distinct ids never
/// map to the same name. Keys longer than [`MAX_USER_KEY_LEN`] are replaced
/// by `_h<sha256>` to stay under file system name limits. Escaping always
/// puts two hex digits after `_`, so `_h` never starts an escaped key.
fn user_key(user_id: &UserId) -> String {
    let key = file_key(user_id.as_str());
    if key.len() <= MAX_USER_KEY_LEN {
        return key;
    }
    let digest = Sha256::digest(user_id.as_str().as_bytes());
    format!("_h{}", hex::encode(digest))
}

fn file_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            key.push(b as char);
        } else {
            key.push_str(&format!("_{:02x}", b));
        }
    }
    key
}

/// Temp file next to `path`, unique per process and call.
fn tmp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.{}.tmp", std::process::id(), n));
    path.with_file_name(name)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file and rename so readers never see a torn record.
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "wrote record");
    Ok(())
}

/// Publish a record only if `path` does not exist yet. The content is
/// written to a temp file first and hard-linked into place, so the record
/// appears complete or not at all. Returns `false` when another writer got
/// there first.
async fn create_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<bool> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json.as_bytes()).await?;

    let linked = fs::hard_link(&tmp, path).await;
    if let Err(e) = fs::remove_file(&tmp).await {
        warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
    }

    match linked {
        Ok(()) => {
            debug!(path = %path.display(), "created record");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reread a record after losing a `create_json` race.
async fn read_winner<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    read_json(path)
        .await?
        .ok_or_else(|| StorageError::NotFound(path.display().to_string()))
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use academy_core::CertificateId;
    use chrono::{Duration, Utc};

    async fn storage() -> (tempfile::TempDir, JsonStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_catalog_operations() {
        let (_dir, storage) = storage().await;

        let course = Course::new("Marketing 101");
        let module = Module::new(course.id, "Basics", 1);
        let lesson = Lesson::new(module.id, "Intro", 1);
        storage.save_course(&course).await.unwrap();
        storage.save_module(&module).await.unwrap();
        storage.save_lesson(&lesson).await.unwrap();

        assert_eq!(storage.load_course(course.id).await.unwrap().unwrap().title, "Marketing 101");
        assert_eq!(storage.list_modules(course.id).await.unwrap().len(), 1);
        assert_eq!(storage.list_lessons(module.id).await.unwrap()[0].id, lesson.id);
        assert!(storage.list_modules(CourseId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enrollment_insert_keeps_first() {
        let (_dir, storage) = storage().await;
        let user = UserId::from("user@example.com");
        let course_id = CourseId::new();

        let first = Enrollment::new(user.clone(), course_id, Utc::now());
        let second = Enrollment::new(user.clone(), course_id, Utc::now() + Duration::hours(1));

        let a = storage.insert_enrollment_if_absent(&first).await.unwrap();
        let b = storage.insert_enrollment_if_absent(&second).await.unwrap();

        assert_eq!(a.id, first.id);
        assert_eq!(b.id, first.id);
        assert_eq!(storage.list_enrollments(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_enrollment_completed_sets_once() {
        let (_dir, storage) = storage().await;
        let user = UserId::from("u1");
        let course_id = CourseId::new();

        assert!(storage.mark_enrollment_completed(&user, course_id, Utc::now()).await.unwrap().is_none());

        storage.insert_enrollment_if_absent(&Enrollment::new(user.clone(), course_id, Utc::now())).await.unwrap();
        let t1 = Utc::now();
        let first = storage.mark_enrollment_completed(&user, course_id, t1).await.unwrap().unwrap();
        let again = storage
            .mark_enrollment_completed(&user, course_id, t1 + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.completed_at, Some(t1));
        assert_eq!(again.completed_at, Some(t1));
    }

    #[tokio::test]
    async fn test_concurrent_progress_updates_share_one_row() {
        let (_dir, storage) = storage().await;
        let user = UserId::from("u1");
        let lesson_id = LessonId::new();

        let mut handles = Vec::new();
        for seconds in 1..=8u64 {
            let storage = storage.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .update_lesson_progress(&user, lesson_id, &|current: Option<LessonProgress>| {
                        let now = Utc::now();
                        let mut row = current.unwrap_or_else(|| LessonProgress::new(user.clone(), lesson_id, now));
                        row.record_watch_time(seconds * 10, now);
                        row
                    })
                    .await
                    .unwrap()
            }));
        }
        let ids: Vec<_> = join_ids(handles).await;
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let stored = storage.load_lesson_progress(&user, lesson_id).await.unwrap().unwrap();
        assert_eq!(stored.watch_time, 80);
    }

    async fn join_ids(handles: Vec<tokio::task::JoinHandle<LessonProgress>>) -> Vec<academy_core::LessonProgressId> {
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().id);
        }
        ids
    }

    #[tokio::test]
    async fn test_certificate_insert_and_lookup() {
        let (_dir, storage) = storage().await;
        let user = UserId::from("u1");
        let course_id = CourseId::new();
        let code = VerificationCode::parse("VA-AAAA-BBBB-CCCC");

        let cert = Certificate::new(user.clone(), course_id, code.clone(), None, Utc::now());
        let stored = storage.insert_certificate(&cert).await.unwrap();
        assert_eq!(stored.id, cert.id);

        let mut duplicate = Certificate::new(user.clone(), course_id, VerificationCode::parse("VA-OTHER"), None, Utc::now());
        duplicate.id = CertificateId::new();
        assert_eq!(storage.insert_certificate(&duplicate).await.unwrap().id, cert.id);

        let found = storage.load_certificate_by_code(&VerificationCode::parse("va-aaaa-bbbb-cccc")).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(cert.id));
    }

    #[tokio::test]
    async fn test_certificate_code_collision_is_conflict() {
        let (_dir, storage) = storage().await;
        let code = VerificationCode::parse("VA-SAME");

        let a = Certificate::new(UserId::from("a"), CourseId::new(), code.clone(), None, Utc::now());
        let b = Certificate::new(UserId::from("b"), CourseId::new(), code, None, Utc::now());

        storage.insert_certificate(&a).await.unwrap();
        assert!(matches!(storage.insert_certificate(&b).await, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_enrollment_insert_across_independent_handles() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::from("u1");
        let course_id = CourseId::new();

        // Separate handles do not share the in-process lock, like two CLI processes.
        let mut handles = Vec::new();
        for offset in 0..8i64 {
            let root = dir.path().to_path_buf();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                let storage = JsonStorage::new(&root).await.unwrap();
                let candidate = Enrollment::new(user, course_id, Utc::now() + Duration::minutes(offset));
                storage.insert_enrollment_if_absent(&candidate).await.unwrap()
            }));
        }
        let mut winners = Vec::new();
        for h in handles {
            winners.push(h.await.unwrap());
        }

        let reader = JsonStorage::new(dir.path()).await.unwrap();
        let stored = reader.load_enrollment(&user, course_id).await.unwrap().unwrap();
        assert!(winners.iter().all(|e| e.id == stored.id && e.started_at == stored.started_at));
        assert_eq!(reader.list_enrollments(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_handle_cannot_replace_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let a = JsonStorage::new(dir.path()).await.unwrap();
        let b = JsonStorage::new(dir.path()).await.unwrap();
        let user = UserId::from("u1");
        let course_id = CourseId::new();

        let first = Enrollment::new(user.clone(), course_id, Utc::now());
        let second = Enrollment::new(user.clone(), course_id, Utc::now() + Duration::hours(1));
        a.insert_enrollment_if_absent(&first).await.unwrap();

        assert_eq!(b.insert_enrollment_if_absent(&second).await.unwrap().id, first.id);
        // Losing a publish race rereads the winner instead of overwriting it.
        assert!(!create_json(&b.enrollment_path(&user, course_id), &second).await.unwrap());
        assert_eq!(a.load_enrollment(&user, course_id).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_certificate_insert_across_independent_handles() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::from("u1");
        let course_id = CourseId::new();

        let mut handles = Vec::new();
        for n in 0..8 {
            let root = dir.path().to_path_buf();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                let storage = JsonStorage::new(&root).await.unwrap();
                let code = VerificationCode::parse(&format!("VA-RACE-{:04}", n));
                let cert = Certificate::new(user, course_id, code, None, Utc::now());
                storage.insert_certificate(&cert).await.unwrap()
            }));
        }
        let mut codes = Vec::new();
        for h in handles {
            codes.push(h.await.unwrap().verification_code);
        }
        assert!(codes.windows(2).all(|w| w[0] == w[1]));

        let reader = JsonStorage::new(dir.path()).await.unwrap();
        assert_eq!(reader.list_certificates(&user).await.unwrap().len(), 1);

        // Codes reserved by losing inserts are released again.
        let loser = VerificationCode::parse(&format!("VA-RACE-{:04}", 0));
        if loser != codes[0] {
            let other = Certificate::new(UserId::from("u2"), CourseId::new(), loser, None, Utc::now());
            assert!(reader.insert_certificate(&other).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_progress_row_created_once_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::from("u1");
        let lesson_id = LessonId::new();

        let mut handles = Vec::new();
        for seconds in 1..=8u64 {
            let root = dir.path().to_path_buf();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                let storage = JsonStorage::new(&root).await.unwrap();
                storage
                    .update_lesson_progress(&user, lesson_id, &|current: Option<LessonProgress>| {
                        let now = Utc::now();
                        let mut row = current.unwrap_or_else(|| LessonProgress::new(user.clone(), lesson_id, now));
                        row.record_watch_time(seconds, now);
                        row
                    })
                    .await
                    .unwrap()
            }));
        }
        let ids = join_ids(handles).await;

        let reader = JsonStorage::new(dir.path()).await.unwrap();
        let stored = reader.load_lesson_progress(&user, lesson_id).await.unwrap().unwrap();
        assert!(ids.iter().all(|id| *id == stored.id));
    }

    #[tokio::test]
    async fn test_long_user_id_round_trips() {
        let (_dir, storage) = storage().await;
        let user = UserId::from("a.".repeat(200).as_str());
        let course_id = CourseId::new();

        let enrollment = Enrollment::new(user.clone(), course_id, Utc::now());
        storage.insert_enrollment_if_absent(&enrollment).await.unwrap();
        let loaded = storage.load_enrollment(&user, course_id).await.unwrap().unwrap();
        assert_eq!(loaded.id, enrollment.id);
        assert_eq!(loaded.user_id, user);
    }

    #[test]
    fn test_long_user_key_is_hashed() {
        let long = UserId::from("x/".repeat(100).as_str());
        let key = user_key(&long);
        assert!(key.starts_with("_h"));
        assert_eq!(key.len(), 2 + 64);
        assert_eq!(key, user_key(&long));
        assert_ne!(key, user_key(&UserId::from("x/".repeat(101).as_str())));

        let short = UserId::from("x".repeat(MAX_USER_KEY_LEN).as_str());
        assert_eq!(user_key(&short), "x".repeat(MAX_USER_KEY_LEN));
    }

    #[test]
    fn test_user_key_escapes_separators() {
        assert_eq!(user_key(&UserId::from("abc-1")), "abc-1");
        assert_eq!(user_key(&UserId::from("a.b/c")), "a_2eb_2fc");
        assert_ne!(user_key(&UserId::from("a_b")), user_key(&UserId::from("a.b")));
    }
}
