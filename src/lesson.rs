use std::sync::OnceLock;

use regex::Regex;

use crate::quiz::QuizQuestion;

/// The storage bucket path segment the platform uploads course files into.
/// Links pointing there are offered as downloads instead of being embedded.
pub const COURSE_MATERIALS_SEGMENT: &str = "course_materials";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub teacher_id: i64,
    pub created_at: String,
}

// Категории заданий: лабораторная, интерактив, тест
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Lab,
    Inter,
    Test,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Lab => "🧪 Лабораторная",
            Category::Inter => "🎮 Интерактив",
            Category::Test => "📝 Тест",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "🧪 Лабораторная" => Some(Category::Lab),
            "🎮 Интерактив" => Some(Category::Inter),
            "📝 Тест" => Some(Category::Test),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub category: Category,
    pub content_link: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub quiz_data: Option<Vec<QuizQuestion>>,
}

impl Lesson {
    pub fn has_quiz(&self) -> bool {
        self.quiz_data.as_ref().map(|q| !q.is_empty()).unwrap_or(false)
    }
}

/// How a lesson's material should be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderMode {
    Quiz,
    Empty,
    Youtube { embed_url: String },
    Image { url: String },
    Pdf { url: String },
    File { url: String },
    Website { url: String },
}

/// Classifies a lesson into exactly one render mode.
///
/// Pure function of `quiz_data` and `content_link`; every lesson maps to
/// exactly one mode, malformed links degrade to `Website` or `Empty`.
/// The order of the checks is a priority policy: a quiz wins over any
/// attached link.
pub fn resolve(lesson: &Lesson) -> RenderMode {
    // 1. Есть вопросы теста -- это тест
    if lesson.has_quiz() {
        return RenderMode::Quiz;
    }

    let link = match &lesson.content_link {
        Some(l) if !l.is_empty() => l.as_str(),
        _ => return RenderMode::Empty,
    };

    if link.contains("youtube.com") || link.contains("youtu.be") {
        // Если не удалось достать id ролика, показываем как обычный сайт
        return match youtube_embed_url(link) {
            Some(embed_url) => RenderMode::Youtube { embed_url },
            None => RenderMode::Website {
                url: link.to_string(),
            },
        };
    }

    let lower = link.to_lowercase();
    if [".jpeg", ".jpg", ".gif", ".png", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        return RenderMode::Image {
            url: link.to_string(),
        };
    }
    if lower.ends_with(".pdf") {
        return RenderMode::Pdf {
            url: link.to_string(),
        };
    }
    if lower.contains(COURSE_MATERIALS_SEGMENT) {
        return RenderMode::File {
            url: link.to_string(),
        };
    }

    RenderMode::Website {
        url: link.to_string(),
    }
}

/// Extracts the 11-character video id out of any of the usual YouTube link
/// shapes and builds an embeddable player URL.
pub fn youtube_embed_url(link: &str) -> Option<String> {
    static YOUTUBE_ID: OnceLock<Regex> = OnceLock::new();
    let re = YOUTUBE_ID.get_or_init(|| {
        Regex::new(r"(?:youtu\.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]{11})")
            .expect("youtube id pattern is valid")
    });

    let id = re.captures(link)?.get(1)?.as_str();
    Some(format!("https://www.youtube.com/embed/{}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(link: Option<&str>, quiz: Option<Vec<QuizQuestion>>) -> Lesson {
        Lesson {
            id: 1,
            course_id: 1,
            title: "Сила Архимеда".to_string(),
            category: Category::Lab,
            content_link: link.map(|l| l.to_string()),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            quiz_data: quiz,
        }
    }

    fn one_question() -> QuizQuestion {
        QuizQuestion {
            id: "q1".to_string(),
            question: "Формула силы?".to_string(),
            options: vec!["F = ma".to_string(), "E = mc²".to_string()],
            correct_index: 0,
        }
    }

    #[test]
    fn quiz_data_wins_over_any_link() {
        let l = lesson(Some("https://youtu.be/dQw4w9WgXcQ"), Some(vec![one_question()]));
        assert_eq!(resolve(&l), RenderMode::Quiz);

        let l = lesson(Some("%%%not a url%%%"), Some(vec![one_question()]));
        assert_eq!(resolve(&l), RenderMode::Quiz);

        let l = lesson(None, Some(vec![one_question()]));
        assert_eq!(resolve(&l), RenderMode::Quiz);
    }

    #[test]
    fn empty_quiz_data_does_not_trigger_quiz_mode() {
        let l = lesson(None, Some(vec![]));
        assert_eq!(resolve(&l), RenderMode::Empty);

        let l = lesson(Some("https://youtu.be/dQw4w9WgXcQ"), Some(vec![]));
        assert_eq!(
            resolve(&l),
            RenderMode::Youtube {
                embed_url: "https://www.youtube.com/embed/dQw4w9WgXcQ".to_string()
            }
        );
    }

    #[test]
    fn no_link_means_empty() {
        assert_eq!(resolve(&lesson(None, None)), RenderMode::Empty);
        assert_eq!(resolve(&lesson(Some(""), None)), RenderMode::Empty);
    }

    #[test]
    fn youtube_links_get_embed_urls() {
        let cases = [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=shared&v=dQw4w9WgXcQ",
        ];
        for link in cases {
            let mode = resolve(&lesson(Some(link), None));
            assert_eq!(
                mode,
                RenderMode::Youtube {
                    embed_url: "https://www.youtube.com/embed/dQw4w9WgXcQ".to_string()
                },
                "link: {}",
                link
            );
        }
    }

    #[test]
    fn youtube_link_without_id_falls_back_to_website() {
        let link = "https://www.youtube.com/feed/subscriptions";
        assert_eq!(
            resolve(&lesson(Some(link), None)),
            RenderMode::Website {
                url: link.to_string()
            }
        );
    }

    #[test]
    fn image_extensions_are_case_insensitive() {
        for link in ["https://a.b/c.PNG", "https://a.b/c.jpg", "https://a.b/c.WebP"] {
            assert_eq!(
                resolve(&lesson(Some(link), None)),
                RenderMode::Image {
                    url: link.to_string()
                }
            );
        }
    }

    #[test]
    fn pdf_extension_is_pdf_mode() {
        let link = "https://a.b/lecture.PDF";
        assert_eq!(
            resolve(&lesson(Some(link), None)),
            RenderMode::Pdf {
                url: link.to_string()
            }
        );
    }

    #[test]
    fn storage_bucket_links_are_downloads() {
        let link = "https://backend.example/storage/v1/object/public/course_materials/7/1700000000.zip";
        assert_eq!(
            resolve(&lesson(Some(link), None)),
            RenderMode::File {
                url: link.to_string()
            }
        );
    }

    #[test]
    fn anything_else_is_a_website() {
        let link = "https://phet.colorado.edu/sims/html/forces-and-motion-basics";
        assert_eq!(
            resolve(&lesson(Some(link), None)),
            RenderMode::Website {
                url: link.to_string()
            }
        );
    }

    #[test]
    fn resolve_is_total_over_odd_links() {
        // Ни одна ссылка не должна уронить резолвер
        for link in ["", " ", "htp:/??", "youtu.be/short", "file.pdf.exe", "....."] {
            let _ = resolve(&lesson(Some(link), None));
        }
    }
}
