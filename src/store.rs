//! Local JSON-file store standing in for the platform's backend tables:
//! courses, lessons, profiles and lesson comments, one file per table under
//! the data directory.
//!
//! The dispatcher runs handlers for different chats concurrently, so every
//! read-modify-write holds [`lock_tables`] and tables are replaced with an
//! atomic rename. Readers never see a half-written file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::lesson::{Category, Course, Lesson};
use crate::quiz::QuizQuestion;
use crate::roles::Role;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub user_id: i64,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Comment {
    pub id: i64,
    pub lesson_id: i64,
    pub user_id: i64,
    pub text: String,
    pub created_at: String,
}

pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

static TABLE_LOCK: Mutex<()> = Mutex::new(());

/// Serializes mutations to the table files. Held across each load/save pair.
pub(crate) fn lock_tables() -> MutexGuard<'static, ()> {
    TABLE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn table_path(base: &Path, name: &str) -> PathBuf {
    base.join(format!("{}.json", name))
}

pub(crate) fn load_table<T: DeserializeOwned>(base: &Path, name: &str) -> io::Result<Vec<T>> {
    let path = table_path(base, name);
    if !path.exists() {
        // Таблицы еще нет -- это нормально
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path)?;
    serde_json::from_str(&contents)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{} parse error: {e}", name)))
}

pub(crate) fn save_table<T: Serialize>(base: &Path, name: &str, rows: &[T]) -> io::Result<()> {
    fs::create_dir_all(base)?;
    let json = serde_json::to_string_pretty(rows)?;
    let path = table_path(base, name);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(tmp, path)
}

fn next_id(ids: impl Iterator<Item = i64>) -> i64 {
    ids.max().unwrap_or(0) + 1
}

// --- courses ---

pub fn list_courses(base: &Path) -> io::Result<Vec<Course>> {
    load_table(base, "courses")
}

pub fn add_course(
    base: &Path,
    title: &str,
    description: Option<String>,
    teacher_id: i64,
) -> io::Result<Course> {
    let _guard = lock_tables();
    let mut courses: Vec<Course> = load_table(base, "courses")?;
    if courses.iter().any(|c| c.title == title) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("course \"{title}\" already exists"),
        ));
    }
    let course = Course {
        id: next_id(courses.iter().map(|c| c.id)),
        title: title.to_string(),
        description,
        teacher_id,
        created_at: iso_now(),
    };
    courses.push(course.clone());
    save_table(base, "courses", &courses)?;
    Ok(course)
}

// --- lessons ---

pub fn lessons_for_course(base: &Path, course_id: i64) -> io::Result<Vec<Lesson>> {
    let mut lessons: Vec<Lesson> = load_table(base, "lessons")?;
    lessons.retain(|l| l.course_id == course_id);
    lessons.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(lessons)
}

pub fn get_lesson(base: &Path, lesson_id: i64) -> io::Result<Option<Lesson>> {
    let lessons: Vec<Lesson> = load_table(base, "lessons")?;
    Ok(lessons.into_iter().find(|l| l.id == lesson_id))
}

pub fn add_lesson(
    base: &Path,
    course_id: i64,
    title: &str,
    category: Category,
    content_link: Option<String>,
) -> io::Result<Lesson> {
    let _guard = lock_tables();
    let mut lessons: Vec<Lesson> = load_table(base, "lessons")?;
    if lessons
        .iter()
        .any(|l| l.course_id == course_id && l.title == title)
    {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("lesson \"{title}\" already exists in course {course_id}"),
        ));
    }
    let lesson = Lesson {
        id: next_id(lessons.iter().map(|l| l.id)),
        course_id,
        title: title.to_string(),
        category,
        content_link,
        created_at: iso_now(),
        quiz_data: None,
    };
    lessons.push(lesson.clone());
    save_table(base, "lessons", &lessons)?;
    Ok(lesson)
}

pub fn update_content_link(
    base: &Path,
    lesson_id: i64,
    content_link: Option<String>,
) -> io::Result<()> {
    let _guard = lock_tables();
    let mut lessons: Vec<Lesson> = load_table(base, "lessons")?;
    if let Some(l) = lessons.iter_mut().find(|l| l.id == lesson_id) {
        l.content_link = content_link;
    }
    save_table(base, "lessons", &lessons)
}

pub fn save_quiz(base: &Path, lesson_id: i64, questions: Vec<QuizQuestion>) -> io::Result<()> {
    let _guard = lock_tables();
    let mut lessons: Vec<Lesson> = load_table(base, "lessons")?;
    if let Some(l) = lessons.iter_mut().find(|l| l.id == lesson_id) {
        l.quiz_data = Some(questions);
    }
    save_table(base, "lessons", &lessons)
}

pub fn delete_lesson(base: &Path, lesson_id: i64) -> io::Result<()> {
    let _guard = lock_tables();
    let mut lessons: Vec<Lesson> = load_table(base, "lessons")?;
    lessons.retain(|l| l.id != lesson_id);
    save_table(base, "lessons", &lessons)
}

// --- profiles ---

pub fn get_profile(base: &Path, user_id: i64) -> io::Result<Option<Profile>> {
    let profiles: Vec<Profile> = load_table(base, "profiles")?;
    Ok(profiles.into_iter().find(|p| p.user_id == user_id))
}

pub fn list_profiles(base: &Path) -> io::Result<Vec<Profile>> {
    load_table(base, "profiles")
}

pub fn upsert_profile(base: &Path, profile: Profile) -> io::Result<()> {
    let _guard = lock_tables();
    let mut profiles: Vec<Profile> = load_table(base, "profiles")?;
    match profiles.iter_mut().find(|p| p.user_id == profile.user_id) {
        Some(existing) => *existing = profile,
        None => profiles.push(profile),
    }
    save_table(base, "profiles", &profiles)
}

// --- comments ---

pub fn comments_for_lesson(base: &Path, lesson_id: i64) -> io::Result<Vec<Comment>> {
    let mut comments: Vec<Comment> = load_table(base, "comments")?;
    comments.retain(|c| c.lesson_id == lesson_id);
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(comments)
}

pub fn add_comment(base: &Path, lesson_id: i64, user_id: i64, text: &str) -> io::Result<Comment> {
    let _guard = lock_tables();
    let mut comments: Vec<Comment> = load_table(base, "comments")?;
    let comment = Comment {
        id: next_id(comments.iter().map(|c| c.id)),
        lesson_id,
        user_id,
        text: text.to_string(),
        created_at: iso_now(),
    };
    comments.push(comment.clone());
    save_table(base, "comments", &comments)?;
    Ok(comment)
}

pub fn delete_comment(base: &Path, comment_id: i64) -> io::Result<()> {
    let _guard = lock_tables();
    let mut comments: Vec<Comment> = load_table(base, "comments")?;
    comments.retain(|c| c.id != comment_id);
    save_table(base, "comments", &comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_base(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "phys-tutor-store-{}-{}",
            name,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lessons_crud_round_trip() {
        let base = temp_base("lessons");
        let course = add_course(&base, "Механика", None, 10).unwrap();
        let lesson = add_lesson(&base, course.id, "Сила Архимеда", Category::Lab, None).unwrap();

        let loaded = get_lesson(&base, lesson.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Сила Архимеда");
        assert!(loaded.content_link.is_none());
        assert!(loaded.quiz_data.is_none());

        update_content_link(&base, lesson.id, Some("https://youtu.be/dQw4w9WgXcQ".to_string()))
            .unwrap();
        let loaded = get_lesson(&base, lesson.id).unwrap().unwrap();
        assert_eq!(
            loaded.content_link.as_deref(),
            Some("https://youtu.be/dQw4w9WgXcQ")
        );

        delete_lesson(&base, lesson.id).unwrap();
        assert!(get_lesson(&base, lesson.id).unwrap().is_none());
    }

    #[test]
    fn quiz_data_is_saved_onto_the_lesson() {
        let base = temp_base("quiz");
        let lesson = add_lesson(&base, 1, "Тест по оптике", Category::Test, None).unwrap();

        let questions = vec![QuizQuestion::new(
            "1".to_string(),
            "Скорость света?".to_string(),
            vec!["3·10⁸ м/с".to_string(), "3·10⁶ м/с".to_string()],
            0,
        )];
        save_quiz(&base, lesson.id, questions.clone()).unwrap();

        let loaded = get_lesson(&base, lesson.id).unwrap().unwrap();
        assert_eq!(loaded.quiz_data, Some(questions));
        assert!(loaded.has_quiz());
    }

    #[test]
    fn lessons_are_scoped_to_their_course() {
        let base = temp_base("scope");
        add_lesson(&base, 1, "a", Category::Lab, None).unwrap();
        add_lesson(&base, 2, "b", Category::Inter, None).unwrap();
        add_lesson(&base, 1, "c", Category::Test, None).unwrap();

        let lessons = lessons_for_course(&base, 1).unwrap();
        assert_eq!(lessons.len(), 2);
        assert!(lessons.iter().all(|l| l.course_id == 1));
    }

    #[test]
    fn profile_upsert_replaces_existing() {
        let base = temp_base("profiles");
        upsert_profile(
            &base,
            Profile {
                user_id: 7,
                full_name: "Аня".to_string(),
                role: Role::Student,
            },
        )
        .unwrap();
        upsert_profile(
            &base,
            Profile {
                user_id: 7,
                full_name: "Анна".to_string(),
                role: Role::Teacher,
            },
        )
        .unwrap();

        let profiles = list_profiles(&base).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].full_name, "Анна");
        assert_eq!(profiles[0].role, Role::Teacher);
    }

    #[test]
    fn duplicate_titles_are_refused() {
        let base = temp_base("dup-titles");
        add_course(&base, "Механика", None, 10).unwrap();
        let err = add_course(&base, "Механика", None, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(list_courses(&base).unwrap().len(), 1);

        add_lesson(&base, 1, "Сила трения", Category::Lab, None).unwrap();
        let err = add_lesson(&base, 1, "Сила трения", Category::Lab, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(lessons_for_course(&base, 1).unwrap().len(), 1);
        // в другом курсе такое же название допустимо
        add_lesson(&base, 2, "Сила трения", Category::Lab, None).unwrap();
    }

    #[test]
    fn concurrent_writers_do_not_lose_comments() {
        let base = temp_base("race");
        let handles: Vec<_> = (0..8)
            .map(|u| {
                let base = base.clone();
                std::thread::spawn(move || add_comment(&base, 5, u, "ок").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let comments = comments_for_lesson(&base, 5).unwrap();
        assert_eq!(comments.len(), 8);
        let mut ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn comments_add_and_delete() {
        let base = temp_base("comments");
        let c1 = add_comment(&base, 5, 7, "Не понял третий пункт").unwrap();
        add_comment(&base, 5, 8, "Смотри формулу в начале").unwrap();
        add_comment(&base, 6, 7, "другой урок").unwrap();

        assert_eq!(comments_for_lesson(&base, 5).unwrap().len(), 2);

        delete_comment(&base, c1.id).unwrap();
        let left = comments_for_lesson(&base, 5).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "Смотри формулу в начале");
    }
}
