//! SQLite storage backend for Viral Academy.
//!
//! Catalog entities are stored as JSON documents; learner records get real
//! columns so the database enforces their unique keys. Creation is done
//! with `INSERT ... ON CONFLICT DO NOTHING` followed by a read of the key,
//! and progress updates run inside `BEGIN IMMEDIATE` so the read and the
//! write cannot interleave with another writer.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use academy_core::{
    Certificate, Course, CourseId, Enrollment, Lesson, LessonId, LessonProgress, Module,
    ModuleId, Time, UserId, VerificationCode,
};
use std::str::FromStr;
use tracing::warn;

use super::trait_::{ProgressUpdate, Result, Storage, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn parse_id<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(db_err)?;
    raw.parse()
        .map_err(|e: T::Err| StorageError::Other(format!("bad {} '{}': {}", column, raw, e)))
}

impl SqliteStorage {
    /// Open (creating if needed) a database at `db_path`.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Limited to one connection, since every `:memory:` connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        const SCHEMA: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS modules (
                id TEXT PRIMARY KEY,
                course_id TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                module_id TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS enrollments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                UNIQUE (user_id, course_id)
            )",
            "CREATE TABLE IF NOT EXISTS lesson_progress (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                lesson_id TEXT NOT NULL,
                completed INTEGER NOT NULL,
                completed_at TEXT,
                watch_time INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, lesson_id)
            )",
            "CREATE TABLE IF NOT EXISTS certificates (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                verification_code TEXT NOT NULL UNIQUE,
                issued_at TEXT NOT NULL,
                signature TEXT,
                UNIQUE (user_id, course_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_modules_course ON modules(course_id)",
            "CREATE INDEX IF NOT EXISTS idx_lessons_module ON lessons(module_id)",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }

    /// Helper to decode the `data` column of a catalog row.
    fn decode_data<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T> {
        let data: String = row.try_get("data").map_err(db_err)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn enrollment_from_row(row: &SqliteRow) -> Result<Enrollment> {
        Ok(Enrollment {
            id: parse_id(row, "id")?,
            user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(db_err)?),
            course_id: parse_id(row, "course_id")?,
            started_at: row.try_get("started_at").map_err(db_err)?,
            completed_at: row.try_get("completed_at").map_err(db_err)?,
        })
    }

    fn progress_from_row(row: &SqliteRow) -> Result<LessonProgress> {
        let watch_time: i64 = row.try_get("watch_time").map_err(db_err)?;
        Ok(LessonProgress {
            id: parse_id(row, "id")?,
            user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(db_err)?),
            lesson_id: parse_id(row, "lesson_id")?,
            completed: row.try_get("completed").map_err(db_err)?,
            completed_at: row.try_get("completed_at").map_err(db_err)?,
            watch_time: watch_time.max(0) as u64,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
        })
    }

    fn certificate_from_row(row: &SqliteRow) -> Result<Certificate> {
        let code: String = row.try_get("verification_code").map_err(db_err)?;
        Ok(Certificate {
            id: parse_id(row, "id")?,
            user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(db_err)?),
            course_id: parse_id(row, "course_id")?,
            verification_code: VerificationCode::parse(&code),
            issued_at: row.try_get("issued_at").map_err(db_err)?,
            signature: row.try_get("signature").map_err(db_err)?,
        })
    }

    /// Select, apply and upsert one progress row on an open transaction.
    async fn apply_progress_update(
        conn: &mut SqliteConnection,
        user_id: &UserId,
        lesson_id: LessonId,
        update: ProgressUpdate<'_>,
    ) -> Result<LessonProgress> {
        let row = sqlx::query("SELECT * FROM lesson_progress WHERE user_id = ? AND lesson_id = ?")
            .bind(user_id.as_str())
            .bind(lesson_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;

        let current = row.as_ref().map(Self::progress_from_row).transpose()?;
        let updated = update(current);
        if &updated.user_id != user_id || updated.lesson_id != lesson_id {
            return Err(StorageError::Other(format!(
                "progress update for {}/{} returned a row for {}/{}",
                user_id, lesson_id, updated.user_id, updated.lesson_id
            )));
        }

        sqlx::query(
            "INSERT INTO lesson_progress
                (id, user_id, lesson_id, completed, completed_at, watch_time, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, lesson_id) DO UPDATE SET
                completed = excluded.completed,
                completed_at = excluded.completed_at,
                watch_time = excluded.watch_time,
                updated_at = excluded.updated_at",
        )
        .bind(updated.id.to_string())
        .bind(updated.user_id.as_str())
        .bind(updated.lesson_id.to_string())
        .bind(updated.completed)
        .bind(updated.completed_at)
        .bind(i64::try_from(updated.watch_time).unwrap_or(i64::MAX))
        .bind(updated.created_at)
        .bind(updated.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(updated)
    }

    /// Check that the database is reachable.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    // === Catalog operations ===

    async fn save_course(&self, course: &Course) -> Result<()> {
        let data = serde_json::to_string(course)?;

        sqlx::query("INSERT OR REPLACE INTO courses (id, data, created_at) VALUES (?, ?, ?)")
            .bind(course.id.to_string())
            .bind(data)
            .bind(course.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn load_course(&self, id: CourseId) -> Result<Option<Course>> {
        let row = sqlx::query("SELECT data FROM courses WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::decode_data).transpose()
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query("SELECT data FROM courses ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::decode_data).collect()
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        let data = serde_json::to_string(module)?;

        sqlx::query("INSERT OR REPLACE INTO modules (id, course_id, data) VALUES (?, ?, ?)")
            .bind(module.id.to_string())
            .bind(module.course_id.to_string())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn load_module(&self, id: ModuleId) -> Result<Option<Module>> {
        let row = sqlx::query("SELECT data FROM modules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::decode_data).transpose()
    }

    async fn list_modules(&self, course_id: CourseId) -> Result<Vec<Module>> {
        let rows = sqlx::query("SELECT data FROM modules WHERE course_id = ?")
            .bind(course_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::decode_data).collect()
    }

    async fn save_lesson(&self, lesson: &Lesson) -> Result<()> {
        let data = serde_json::to_string(lesson)?;

        sqlx::query("INSERT OR REPLACE INTO lessons (id, module_id, data) VALUES (?, ?, ?)")
            .bind(lesson.id.to_string())
            .bind(lesson.module_id.to_string())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn load_lesson(&self, id: LessonId) -> Result<Option<Lesson>> {
        let row = sqlx::query("SELECT data FROM lessons WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::decode_data).transpose()
    }

    async fn list_lessons(&self, module_id: ModuleId) -> Result<Vec<Lesson>> {
        let rows = sqlx::query("SELECT data FROM lessons WHERE module_id = ?")
            .bind(module_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::decode_data).collect()
    }

    // === Enrollment operations ===

    async fn load_enrollment(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Enrollment>> {
        let row = sqlx::query("SELECT * FROM enrollments WHERE user_id = ? AND course_id = ?")
            .bind(user_id.as_str())
            .bind(course_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::enrollment_from_row).transpose()
    }

    async fn insert_enrollment_if_absent(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        sqlx::query(
            "INSERT INTO enrollments (id, user_id, course_id, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id, course_id) DO NOTHING",
        )
        .bind(enrollment.id.to_string())
        .bind(enrollment.user_id.as_str())
        .bind(enrollment.course_id.to_string())
        .bind(enrollment.started_at)
        .bind(enrollment.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.load_enrollment(&enrollment.user_id, enrollment.course_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("enrollment {}/{}", enrollment.user_id, enrollment.course_id)))
    }

    async fn mark_enrollment_completed(
        &self,
        user_id: &UserId,
        course_id: CourseId,
        at: Time,
    ) -> Result<Option<Enrollment>> {
        sqlx::query(
            "UPDATE enrollments SET completed_at = COALESCE(completed_at, ?)
            WHERE user_id = ? AND course_id = ?",
        )
        .bind(at)
        .bind(user_id.as_str())
        .bind(course_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.load_enrollment(user_id, course_id).await
    }

    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query("SELECT * FROM enrollments WHERE user_id = ? ORDER BY started_at")
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::enrollment_from_row).collect()
    }

    // === Lesson progress operations ===

    async fn load_lesson_progress(&self, user_id: &UserId, lesson_id: LessonId) -> Result<Option<LessonProgress>> {
        let row = sqlx::query("SELECT * FROM lesson_progress WHERE user_id = ? AND lesson_id = ?")
            .bind(user_id.as_str())
            .bind(lesson_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::progress_from_row).transpose()
    }

    async fn update_lesson_progress(
        &self,
        user_id: &UserId,
        lesson_id: LessonId,
        update: ProgressUpdate<'_>,
    ) -> Result<LessonProgress> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

        match Self::apply_progress_update(&mut *conn, user_id, lesson_id, update).await {
            Ok(updated) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                Ok(updated)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!("rollback of progress update failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn list_lesson_progress(&self, user_id: &UserId, lesson_ids: &[LessonId]) -> Result<Vec<LessonProgress>> {
        let rows = sqlx::query("SELECT * FROM lesson_progress WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let wanted: std::collections::HashSet<_> = lesson_ids.iter().collect();
        let mut progress = rows
            .iter()
            .map(Self::progress_from_row)
            .collect::<Result<Vec<_>>>()?;
        progress.retain(|p| wanted.contains(&p.lesson_id));

        Ok(progress)
    }

    // === Certificate operations ===

    async fn load_certificate(&self, user_id: &UserId, course_id: CourseId) -> Result<Option<Certificate>> {
        let row = sqlx::query("SELECT * FROM certificates WHERE user_id = ? AND course_id = ?")
            .bind(user_id.as_str())
            .bind(course_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::certificate_from_row).transpose()
    }

    async fn load_certificate_by_code(&self, code: &VerificationCode) -> Result<Option<Certificate>> {
        let row = sqlx::query("SELECT * FROM certificates WHERE verification_code = ?")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::certificate_from_row).transpose()
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let inserted = sqlx::query(
            "INSERT INTO certificates (id, user_id, course_id, verification_code, issued_at, signature)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, course_id) DO NOTHING",
        )
        .bind(certificate.id.to_string())
        .bind(certificate.user_id.as_str())
        .bind(certificate.course_id.to_string())
        .bind(certificate.verification_code.as_str())
        .bind(certificate.issued_at)
        .bind(certificate.signature.as_deref())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StorageError::Conflict(format!(
                    "verification code {} already issued",
                    certificate.verification_code
                )));
            }
            Err(e) => return Err(db_err(e)),
        }

        self.load_certificate(&certificate.user_id, certificate.course_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("certificate {}/{}", certificate.user_id, certificate.course_id)))
    }

    async fn list_certificates(&self, user_id: &UserId) -> Result<Vec<Certificate>> {
        let rows = sqlx::query("SELECT * FROM certificates WHERE user_id = ? ORDER BY issued_at")
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::certificate_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_catalog_round_trip() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let course = Course::new("Marketing 101");
        let module = Module::new(course.id, "Basics", 1);
        let lesson = Lesson::new(module.id, "Intro", 1);
        storage.save_course(&course).await.unwrap();
        storage.save_module(&module).await.unwrap();
        storage.save_lesson(&lesson).await.unwrap();

        assert_eq!(storage.list_courses().await.unwrap().len(), 1);
        assert_eq!(storage.list_modules(course.id).await.unwrap()[0].id, module.id);
        assert_eq!(storage.load_lesson(lesson.id).await.unwrap().unwrap().title, "Intro");
    }

    #[tokio::test]
    async fn test_enrollment_unique_per_user_and_course() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = UserId::from("u1");
        let course_id = CourseId::new();

        let first = Enrollment::new(user.clone(), course_id, Utc::now());
        let second = Enrollment::new(user.clone(), course_id, Utc::now());

        storage.insert_enrollment_if_absent(&first).await.unwrap();
        let stored = storage.insert_enrollment_if_absent(&second).await.unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(storage.list_enrollments(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_at_is_sticky() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = UserId::from("u1");
        let course_id = CourseId::new();
        storage
            .insert_enrollment_if_absent(&Enrollment::new(user.clone(), course_id, Utc::now()))
            .await
            .unwrap();

        let t1 = Utc::now();
        storage.mark_enrollment_completed(&user, course_id, t1).await.unwrap();
        let later = storage
            .mark_enrollment_completed(&user, course_id, t1 + Duration::days(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(later.completed_at, Some(t1));
    }

    #[tokio::test]
    async fn test_progress_update_upserts_in_place() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = UserId::from("u1");
        let lesson_id = LessonId::new();

        let update = |current: Option<LessonProgress>| {
            let now = Utc::now();
            let mut row = current.unwrap_or_else(|| LessonProgress::new(UserId::from("u1"), lesson_id, now));
            row.set_completed(true, now);
            row
        };

        let first = storage.update_lesson_progress(&user, lesson_id, &update).await.unwrap();
        let second = storage.update_lesson_progress(&user, lesson_id, &update).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.completed_at, second.completed_at);
        assert_eq!(storage.list_lesson_progress(&user, &[lesson_id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_certificate_code_collision() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let code = VerificationCode::parse("VA-SAME");

        let a = Certificate::new(UserId::from("a"), CourseId::new(), code.clone(), None, Utc::now());
        let b = Certificate::new(UserId::from("b"), CourseId::new(), code.clone(), None, Utc::now());

        storage.insert_certificate(&a).await.unwrap();
        assert!(matches!(storage.insert_certificate(&b).await, Err(StorageError::Conflict(_))));
        assert_eq!(storage.load_certificate_by_code(&code).await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_health_check() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(storage.health_check().await);
    }
}
