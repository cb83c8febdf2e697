//! Completion tracking: who finished which lesson.
//!
//! Duplicate completion signals are expected (quiz retries, repeated button
//! presses) and must neither error nor double-count, so the (user, lesson)
//! pair is kept unique here.

use std::io;
use std::path::Path;

use crate::lesson::Lesson;
use crate::store::{self, Profile};
use crate::roles::Role;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Completion {
    pub user_id: i64,
    pub lesson_id: i64,
    pub completed_at: String,
}

/// Per-student progress over one course, for the teacher's roster view.
#[derive(Debug, Clone)]
pub struct StudentProgress {
    pub user_id: i64,
    pub full_name: String,
    pub completed_count: usize,
}

fn load(base: &Path) -> io::Result<Vec<Completion>> {
    store::load_table(base, "completions")
}

fn save(base: &Path, completions: &[Completion]) -> io::Result<()> {
    store::save_table(base, "completions", completions)
}

/// Records that a user finished a lesson. Returns `true` when the record is
/// new and `false` when the lesson was already completed. Safe to call from
/// concurrently running handlers.
pub fn record_completion(base: &Path, user_id: i64, lesson_id: i64) -> io::Result<bool> {
    let _guard = store::lock_tables();
    let mut completions = load(base)?;
    if completions
        .iter()
        .any(|c| c.user_id == user_id && c.lesson_id == lesson_id)
    {
        return Ok(false);
    }
    completions.push(Completion {
        user_id,
        lesson_id,
        completed_at: store::iso_now(),
    });
    save(base, &completions)?;
    Ok(true)
}

pub fn completed_lessons(base: &Path, user_id: i64) -> io::Result<Vec<i64>> {
    let completions = load(base)?;
    Ok(completions
        .iter()
        .filter(|c| c.user_id == user_id)
        .map(|c| c.lesson_id)
        .collect())
}

pub fn is_completed(base: &Path, user_id: i64, lesson_id: i64) -> io::Result<bool> {
    Ok(completed_lessons(base, user_id)?.contains(&lesson_id))
}

/// Completed-lesson counts for every student over the given course lessons,
/// most diligent first.
pub fn course_stats(
    base: &Path,
    profiles: &[Profile],
    lessons: &[Lesson],
) -> io::Result<Vec<StudentProgress>> {
    let completions = load(base)?;
    let lesson_ids: Vec<i64> = lessons.iter().map(|l| l.id).collect();

    let mut stats: Vec<StudentProgress> = profiles
        .iter()
        .filter(|p| p.role == Role::Student)
        .map(|p| {
            let completed_count = completions
                .iter()
                .filter(|c| c.user_id == p.user_id && lesson_ids.contains(&c.lesson_id))
                .count();
            StudentProgress {
                user_id: p.user_id,
                full_name: p.full_name.clone(),
                completed_count,
            }
        })
        .collect();

    // Кто больше сделал -- тот выше
    stats.sort_by(|a, b| b.completed_count.cmp(&a.completed_count));
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::Category;

    fn temp_base(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "phys-tutor-progress-{}-{}",
            name,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn lesson(id: i64, course_id: i64) -> Lesson {
        Lesson {
            id,
            course_id,
            title: format!("урок {}", id),
            category: Category::Lab,
            content_link: None,
            created_at: store::iso_now(),
            quiz_data: None,
        }
    }

    #[test]
    fn duplicate_completions_are_ignored() {
        let base = temp_base("dupe");
        assert!(record_completion(&base, 1, 100).unwrap());
        assert!(!record_completion(&base, 1, 100).unwrap());
        assert!(record_completion(&base, 1, 101).unwrap());

        assert_eq!(completed_lessons(&base, 1).unwrap(), vec![100, 101]);
        assert!(is_completed(&base, 1, 100).unwrap());
        assert!(!is_completed(&base, 2, 100).unwrap());
    }

    #[test]
    fn simultaneous_completions_all_land() {
        let base = temp_base("race");
        let handles: Vec<_> = (0..8)
            .map(|u| {
                let base = base.clone();
                std::thread::spawn(move || record_completion(&base, u, 42).unwrap())
            })
            .collect();
        // каждая запись новая, ни одна не теряется
        for h in handles {
            assert!(h.join().unwrap());
        }
        for u in 0..8 {
            assert!(is_completed(&base, u, 42).unwrap());
        }
    }

    #[test]
    fn stats_count_only_this_course_and_sort_descending() {
        let base = temp_base("stats");
        let profiles = vec![
            Profile {
                user_id: 1,
                full_name: "Петя".to_string(),
                role: Role::Student,
            },
            Profile {
                user_id: 2,
                full_name: "Маша".to_string(),
                role: Role::Student,
            },
            Profile {
                user_id: 3,
                full_name: "Учитель".to_string(),
                role: Role::Teacher,
            },
        ];
        let lessons = vec![lesson(10, 1), lesson(11, 1)];

        record_completion(&base, 1, 10).unwrap();
        record_completion(&base, 2, 10).unwrap();
        record_completion(&base, 2, 11).unwrap();
        // чужой курс не считается
        record_completion(&base, 1, 99).unwrap();

        let stats = course_stats(&base, &profiles, &lessons).unwrap();
        assert_eq!(stats.len(), 2); // учитель не в журнале
        assert_eq!(stats[0].full_name, "Маша");
        assert_eq!(stats[0].completed_count, 2);
        assert_eq!(stats[1].completed_count, 1);
    }
}
