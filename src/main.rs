mod lesson;
mod progress;
mod quiz;
mod roles;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use dotenv::dotenv;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup},
};

use lesson::{resolve, Category, Lesson, RenderMode};
use quiz::{builder, OptionMark, QuizAttempt, QuizError, QuizQuestion};
use roles::{Capabilities, Role};
use store::Profile;

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DataDir = Arc<PathBuf>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveFullName,
    ReceiveRole {
        full_name: String,
    },
    CourseMenu,
    NewCourseTitle,
    LessonMenu {
        course_id: i64,
    },
    NewLessonTitle {
        course_id: i64,
    },
    NewLessonCategory {
        course_id: i64,
        title: String,
    },
    NewLessonLink {
        course_id: i64,
        title: String,
        category: Category,
    },
    Viewing {
        lesson_id: i64,
    },
    CommentInput {
        lesson_id: i64,
    },
    Quiz {
        lesson_id: i64,
        attempt: QuizAttempt,
        cursor: usize,
    },
    QuizReview {
        lesson_id: i64,
        attempt: QuizAttempt,
    },
    QuizResult {
        lesson_id: i64,
        attempt: QuizAttempt,
    },
    EditQuizPick {
        course_id: i64,
    },
    BuilderReview {
        lesson_id: i64,
        draft: Vec<QuizQuestion>,
    },
    BuilderPrompt {
        lesson_id: i64,
        draft: Vec<QuizQuestion>,
    },
    BuilderOptions {
        lesson_id: i64,
        draft: Vec<QuizQuestion>,
        prompt: String,
    },
    BuilderCorrect {
        lesson_id: i64,
        draft: Vec<QuizQuestion>,
        prompt: String,
        options: Vec<String>,
    },
}

type UserInfoStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() {
    dotenv().expect("Failed to load .env file");

    pretty_env_logger::init();
    log::info!("Starting physics tutor bot...");

    let bot = Bot::from_env();

    println!("Establishing connection to the database...");
    let storage: UserInfoStorage = SqliteStorage::open("db.sqlite", Json)
        .await
        .unwrap()
        .erase();
    println!("Connection established");

    let data_dir: DataDir = Arc::new(PathBuf::from(
        std::env::var("DATA_PATH").unwrap_or_else(|_| "data".to_string()),
    ));
    log::info!("Using data directory {:?}", data_dir);

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveFullName].endpoint(receive_full_name))
            .branch(dptree::case![State::ReceiveRole { full_name }].endpoint(receive_role))
            .branch(dptree::case![State::CourseMenu].endpoint(course_menu))
            .branch(dptree::case![State::NewCourseTitle].endpoint(new_course_title))
            .branch(dptree::case![State::LessonMenu { course_id }].endpoint(lesson_menu))
            .branch(dptree::case![State::NewLessonTitle { course_id }].endpoint(new_lesson_title))
            .branch(
                dptree::case![State::NewLessonCategory { course_id, title }]
                    .endpoint(new_lesson_category),
            )
            .branch(
                dptree::case![State::NewLessonLink {
                    course_id,
                    title,
                    category
                }]
                .endpoint(new_lesson_link),
            )
            .branch(dptree::case![State::Viewing { lesson_id }].endpoint(viewing))
            .branch(dptree::case![State::CommentInput { lesson_id }].endpoint(comment_input))
            .branch(
                dptree::case![State::Quiz {
                    lesson_id,
                    attempt,
                    cursor
                }]
                .endpoint(quiz_question),
            )
            .branch(dptree::case![State::QuizReview { lesson_id, attempt }].endpoint(quiz_review))
            .branch(dptree::case![State::QuizResult { lesson_id, attempt }].endpoint(quiz_result))
            .branch(dptree::case![State::EditQuizPick { course_id }].endpoint(edit_quiz_pick))
            .branch(
                dptree::case![State::BuilderReview { lesson_id, draft }].endpoint(builder_review),
            )
            .branch(
                dptree::case![State::BuilderPrompt { lesson_id, draft }].endpoint(builder_prompt),
            )
            .branch(
                dptree::case![State::BuilderOptions {
                    lesson_id,
                    draft,
                    prompt
                }]
                .endpoint(builder_options),
            )
            .branch(
                dptree::case![State::BuilderCorrect {
                    lesson_id,
                    draft,
                    prompt,
                    options
                }]
                .endpoint(builder_correct),
            ),
    )
    .dependencies(dptree::deps![storage, data_dir])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

// В личном чате id чата совпадает с id пользователя
fn user_id(msg: &Message) -> i64 {
    msg.chat.id.0
}

fn capabilities(data: &DataDir, uid: i64) -> Capabilities {
    let role = store::get_profile(data, uid)
        .ok()
        .flatten()
        .map(|p| p.role)
        .unwrap_or(Role::Student);
    Capabilities::for_role(role)
}

const BACK_TO_COURSES: &str = "⬅️ К курсам";
const BACK_TO_LESSONS: &str = "⬅️ К урокам";
const NEW_COURSE: &str = "➕ Новый курс";
const NEW_LESSON: &str = "➕ Добавить урок";
const EDIT_QUIZ: &str = "✏️ Тест к уроку";
const ROSTER: &str = "📊 Журнал";
const COMPLETE_LESSON: &str = "✅ Завершить урок";
const DISCUSSION: &str = "💬 Обсуждение";
const DELETE_LESSON: &str = "🗑 Удалить урок";
const SKIP_QUESTION: &str = "Пропустить";
const SUBMIT_QUIZ: &str = "📨 Завершить тест";
const LEAVE_QUIZ: &str = "⬅️ Выйти";
const RETRY_QUIZ: &str = "🔁 Пройти заново";
const ADD_QUESTION: &str = "➕ Добавить вопрос";
const SAVE_QUIZ: &str = "💾 Сохранить тест";
const CANCEL: &str = "⬅️ Отмена";

const GREETING_TEXT: &str =
    "Привет! Я -- бот-репетитор по физике. Здесь можно проходить уроки курсов и решать тесты. Давай познакомимся! Как тебя зовут?";

async fn start(bot: Bot, dialogue: QuizDialogue, data: DataDir, msg: Message) -> HandlerResult {
    // Знакомого пользователя сразу пускаем к курсам
    if let Some(profile) = store::get_profile(&data, user_id(&msg))? {
        bot.send_message(msg.chat.id, format!("С возвращением, {}!", profile.full_name))
            .await?;
        show_course_menu(&bot, &data, &msg).await?;
        dialogue.update(State::CourseMenu).await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    dialogue.update(State::ReceiveFullName).await?;
    Ok(())
}

const ROLE_STUDENT: &str = "Я ученик";
const ROLE_TEACHER: &str = "Я учитель";

async fn receive_full_name(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let Some(full_name) = msg.text() else {
        bot.send_message(msg.chat.id, "Пожалуйста, напиши свое имя (текстом)")
            .await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(ROLE_STUDENT),
        KeyboardButton::new(ROLE_TEACHER),
    ]]);
    bot.send_message(
        msg.chat.id,
        format!("Приятно познакомиться, {}! Кто ты на платформе?", full_name),
    )
    .reply_markup(keyboard)
    .await?;

    dialogue
        .update(State::ReceiveRole {
            full_name: full_name.to_string(),
        })
        .await?;
    Ok(())
}

async fn receive_role(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    full_name: String,
    msg: Message,
) -> HandlerResult {
    let role = match msg.text() {
        Some(ROLE_STUDENT) => Role::Student,
        Some(ROLE_TEACHER) => Role::Teacher,
        _ => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери один из вариантов")
                .await?;
            return Ok(());
        }
    };

    store::upsert_profile(
        &data,
        Profile {
            user_id: user_id(&msg),
            full_name,
            role,
        },
    )?;

    show_course_menu(&bot, &data, &msg).await?;
    dialogue.update(State::CourseMenu).await?;
    Ok(())
}

async fn show_course_menu(bot: &Bot, data: &DataDir, msg: &Message) -> HandlerResult {
    let caps = capabilities(data, user_id(msg));
    let courses = store::list_courses(data)?;

    let mut rows: Vec<Vec<KeyboardButton>> = courses
        .iter()
        .map(|c| vec![KeyboardButton::new(c.title.clone())])
        .collect();
    if caps.can_author {
        rows.push(vec![KeyboardButton::new(NEW_COURSE)]);
    }

    let text = if courses.is_empty() {
        "Курсов пока нет."
    } else {
        "Выбери курс:"
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn course_menu(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    msg: Message,
) -> HandlerResult {
    let caps = capabilities(&data, user_id(&msg));
    match msg.text() {
        Some(NEW_COURSE) if caps.can_author => {
            bot.send_message(msg.chat.id, "Название нового курса?")
                .await?;
            dialogue.update(State::NewCourseTitle).await?;
        }
        Some(text) => {
            let courses = store::list_courses(&data)?;
            match courses.iter().find(|c| c.title == text) {
                Some(course) => {
                    show_lesson_menu(&bot, &data, &msg, course.id).await?;
                    dialogue
                        .update(State::LessonMenu {
                            course_id: course.id,
                        })
                        .await?;
                }
                None => {
                    bot.send_message(msg.chat.id, "Пожалуйста, выбери курс из списка")
                        .await?;
                }
            }
        }
        None => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери курс из списка")
                .await?;
        }
    }
    Ok(())
}

async fn new_course_title(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    msg: Message,
) -> HandlerResult {
    let Some(title) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        bot.send_message(msg.chat.id, "Название не может быть пустым")
            .await?;
        return Ok(());
    };

    let course = match store::add_course(&data, title, None, user_id(&msg)) {
        Ok(course) => course,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            bot.send_message(msg.chat.id, "Курс с таким названием уже есть. Напиши другое")
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("Course {} created: {}", course.id, course.title);
    bot.send_message(msg.chat.id, "Курс создан").await?;

    show_course_menu(&bot, &data, &msg).await?;
    dialogue.update(State::CourseMenu).await?;
    Ok(())
}

async fn show_lesson_menu(
    bot: &Bot,
    data: &DataDir,
    msg: &Message,
    course_id: i64,
) -> HandlerResult {
    let uid = user_id(msg);
    let caps = capabilities(data, uid);
    let lessons = store::lessons_for_course(data, course_id)?;
    let completed = progress::completed_lessons(data, uid)?;

    let mut rows: Vec<Vec<KeyboardButton>> = lessons
        .iter()
        .map(|l| vec![KeyboardButton::new(lesson_button_label(l, &completed))])
        .collect();
    if caps.can_author {
        rows.push(vec![
            KeyboardButton::new(NEW_LESSON),
            KeyboardButton::new(EDIT_QUIZ),
        ]);
    }
    if caps.can_view_roster {
        rows.push(vec![KeyboardButton::new(ROSTER)]);
    }
    rows.push(vec![KeyboardButton::new(BACK_TO_COURSES)]);

    let text = if lessons.is_empty() {
        "В курсе пока нет уроков."
    } else {
        "Выбери урок:"
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

fn lesson_button_label(lesson: &Lesson, completed: &[i64]) -> String {
    if completed.contains(&lesson.id) {
        format!("✅ {}", lesson.title)
    } else {
        lesson.title.clone()
    }
}

fn find_lesson_by_button<'a>(lessons: &'a [Lesson], text: &str) -> Option<&'a Lesson> {
    let title = text.strip_prefix("✅ ").unwrap_or(text);
    lessons.iter().find(|l| l.title == title)
}

async fn lesson_menu(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    course_id: i64,
    msg: Message,
) -> HandlerResult {
    let caps = capabilities(&data, user_id(&msg));
    match msg.text() {
        Some(BACK_TO_COURSES) => {
            show_course_menu(&bot, &data, &msg).await?;
            dialogue.update(State::CourseMenu).await?;
        }
        Some(NEW_LESSON) if caps.can_author => {
            bot.send_message(msg.chat.id, "Название урока?").await?;
            dialogue.update(State::NewLessonTitle { course_id }).await?;
        }
        Some(EDIT_QUIZ) if caps.can_author => {
            bot.send_message(
                msg.chat.id,
                "К какому уроку редактируем тест? Напиши название",
            )
            .await?;
            dialogue.update(State::EditQuizPick { course_id }).await?;
        }
        Some(ROSTER) if caps.can_view_roster => {
            send_roster(&bot, &data, &msg, course_id).await?;
        }
        Some(text) => {
            let lessons = store::lessons_for_course(&data, course_id)?;
            match find_lesson_by_button(&lessons, text) {
                Some(lesson) => open_lesson(&bot, &dialogue, &data, &msg, lesson.clone()).await?,
                None => {
                    bot.send_message(msg.chat.id, "Пожалуйста, выбери урок из списка")
                        .await?;
                }
            }
        }
        None => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери урок из списка")
                .await?;
        }
    }
    Ok(())
}

async fn send_roster(bot: &Bot, data: &DataDir, msg: &Message, course_id: i64) -> HandlerResult {
    let profiles = store::list_profiles(data)?;
    let lessons = store::lessons_for_course(data, course_id)?;
    let stats = progress::course_stats(data, &profiles, &lessons)?;

    if stats.is_empty() {
        bot.send_message(msg.chat.id, "Нет учеников").await?;
        return Ok(());
    }

    let total = lessons.len();
    let mut text = String::from("Журнал успеваемости:\n");
    for s in &stats {
        text.push_str(&format!(
            "\n{} -- {} из {} уроков",
            s.full_name, s.completed_count, total
        ));
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

// --- создание урока ---

async fn new_lesson_title(
    bot: Bot,
    dialogue: QuizDialogue,
    course_id: i64,
    msg: Message,
) -> HandlerResult {
    let Some(title) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        bot.send_message(msg.chat.id, "Название не может быть пустым")
            .await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(Category::Lab.label()),
        KeyboardButton::new(Category::Inter.label()),
        KeyboardButton::new(Category::Test.label()),
    ]]);
    bot.send_message(msg.chat.id, "Категория задания?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::NewLessonCategory {
            course_id,
            title: title.to_string(),
        })
        .await?;
    Ok(())
}

async fn new_lesson_category(
    bot: Bot,
    dialogue: QuizDialogue,
    (course_id, title): (i64, String),
    msg: Message,
) -> HandlerResult {
    let Some(category) = msg.text().and_then(Category::parse) else {
        bot.send_message(msg.chat.id, "Пожалуйста, выбери категорию из списка")
            .await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        "Ссылка на материал (YouTube, картинка, PDF, файл или сайт)? Напиши «нет», если материалов пока нет",
    )
    .await?;

    dialogue
        .update(State::NewLessonLink {
            course_id,
            title,
            category,
        })
        .await?;
    Ok(())
}

async fn new_lesson_link(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    (course_id, title, category): (i64, String, Category),
    msg: Message,
) -> HandlerResult {
    let Some(text) = msg.text().map(str::trim) else {
        bot.send_message(msg.chat.id, "Пожалуйста, пришли ссылку текстом или «нет»")
            .await?;
        return Ok(());
    };

    let content_link = match text {
        "нет" | "Нет" | "-" => None,
        link => Some(link.to_string()),
    };

    let lesson = match store::add_lesson(&data, course_id, &title, category, content_link) {
        Ok(lesson) => lesson,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            bot.send_message(
                msg.chat.id,
                "Урок с таким названием уже есть в курсе. Напиши другое название",
            )
            .await?;
            dialogue.update(State::NewLessonTitle { course_id }).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("Lesson {} added to course {}", lesson.id, course_id);
    bot.send_message(msg.chat.id, "Задание добавлено").await?;

    show_lesson_menu(&bot, &data, &msg, course_id).await?;
    dialogue.update(State::LessonMenu { course_id }).await?;
    Ok(())
}

// --- просмотр урока ---

async fn open_lesson(
    bot: &Bot,
    dialogue: &QuizDialogue,
    data: &DataDir,
    msg: &Message,
    lesson: Lesson,
) -> HandlerResult {
    match resolve(&lesson) {
        RenderMode::Quiz => {
            // quiz_data непустой, раз резолвер выбрал тест
            let questions = lesson.quiz_data.clone().unwrap_or_default();
            match QuizAttempt::new(questions) {
                Ok(attempt) => {
                    bot.send_message(msg.chat.id, format!("Проверка знаний: {}", lesson.title))
                        .await?;
                    ask_question(bot, msg, &attempt, 0).await?;
                    dialogue
                        .update(State::Quiz {
                            lesson_id: lesson.id,
                            attempt,
                            cursor: 0,
                        })
                        .await?;
                }
                Err(e) => {
                    bot.send_message(msg.chat.id, e.to_string()).await?;
                }
            }
            return Ok(());
        }
        RenderMode::Empty => {
            bot.send_message(msg.chat.id, "Нет материалов.").await?;
        }
        RenderMode::Youtube { embed_url } => {
            bot.send_message(msg.chat.id, format!("▶️ Видео урока:\n{}", embed_url))
                .await?;
        }
        RenderMode::Image { url } => {
            bot.send_message(msg.chat.id, format!("🖼 Изображение:\n{}", url))
                .await?;
        }
        RenderMode::Pdf { url } => {
            bot.send_message(msg.chat.id, format!("📄 PDF-материал:\n{}", url))
                .await?;
        }
        RenderMode::File { url } => {
            bot.send_message(
                msg.chat.id,
                format!("📎 Файл материала. Скачайте файл для просмотра:\n{}", url),
            )
            .await?;
        }
        RenderMode::Website { url } => {
            bot.send_message(msg.chat.id, format!("🔗 Материал урока:\n{}", url))
                .await?;
        }
    }

    send_lesson_footer(bot, data, msg, &lesson).await?;
    dialogue
        .update(State::Viewing {
            lesson_id: lesson.id,
        })
        .await?;
    Ok(())
}

async fn send_lesson_footer(
    bot: &Bot,
    data: &DataDir,
    msg: &Message,
    lesson: &Lesson,
) -> HandlerResult {
    let uid = user_id(msg);
    let caps = capabilities(data, uid);

    let mut rows = vec![
        vec![KeyboardButton::new(COMPLETE_LESSON)],
        vec![KeyboardButton::new(DISCUSSION)],
    ];
    if caps.can_author {
        rows.push(vec![KeyboardButton::new(DELETE_LESSON)]);
    }
    rows.push(vec![KeyboardButton::new(BACK_TO_LESSONS)]);

    let status = if progress::is_completed(data, uid, lesson.id)? {
        format!(
            "{} ({}) -- ✅ выполнено",
            lesson.title,
            lesson.category.label()
        )
    } else {
        format!("{} ({})", lesson.title, lesson.category.label())
    };
    bot.send_message(msg.chat.id, status)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn viewing(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    lesson_id: i64,
    msg: Message,
) -> HandlerResult {
    let uid = user_id(&msg);
    let caps = capabilities(&data, uid);
    let Some(lesson) = store::get_lesson(&data, lesson_id)? else {
        bot.send_message(msg.chat.id, "Урок не найден").await?;
        show_course_menu(&bot, &data, &msg).await?;
        dialogue.update(State::CourseMenu).await?;
        return Ok(());
    };

    match msg.text() {
        Some(COMPLETE_LESSON) => {
            if progress::record_completion(&data, uid, lesson_id)? {
                bot.send_message(msg.chat.id, "Молодец! Урок пройден 🎉")
                    .await?;
            } else {
                bot.send_message(msg.chat.id, "Урок уже был пройден").await?;
            }
            send_lesson_footer(&bot, &data, &msg, &lesson).await?;
        }
        Some(DISCUSSION) => {
            send_comments(&bot, &data, &msg, lesson_id).await?;
            dialogue.update(State::CommentInput { lesson_id }).await?;
        }
        Some(DELETE_LESSON) if caps.can_author => {
            store::delete_lesson(&data, lesson_id)?;
            log::info!("Lesson {} deleted", lesson_id);
            bot.send_message(msg.chat.id, "Урок удален").await?;
            show_lesson_menu(&bot, &data, &msg, lesson.course_id).await?;
            dialogue
                .update(State::LessonMenu {
                    course_id: lesson.course_id,
                })
                .await?;
        }
        Some(BACK_TO_LESSONS) => {
            show_lesson_menu(&bot, &data, &msg, lesson.course_id).await?;
            dialogue
                .update(State::LessonMenu {
                    course_id: lesson.course_id,
                })
                .await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                .await?;
        }
    }
    Ok(())
}

// --- обсуждение урока ---

const BACK: &str = "⬅️ Назад";

async fn send_comments(bot: &Bot, data: &DataDir, msg: &Message, lesson_id: i64) -> HandlerResult {
    let comments = store::comments_for_lesson(data, lesson_id)?;
    let profiles = store::list_profiles(data)?;
    let caps = capabilities(data, user_id(msg));

    let mut text = if comments.is_empty() {
        "Обсуждение пока пустое.".to_string()
    } else {
        let mut t = String::from("Обсуждение урока:\n");
        for (i, c) in comments.iter().enumerate() {
            let author = profiles
                .iter()
                .find(|p| p.user_id == c.user_id)
                .map(|p| p.full_name.clone())
                .unwrap_or_else(|| "Без имени".to_string());
            t.push_str(&format!("\n{}. {}: {}", i + 1, author, c.text));
        }
        t
    };
    text.push_str("\n\nНапиши сообщение, чтобы оставить его в обсуждении");
    if caps.can_author {
        text.push_str(", или «удалить N», чтобы убрать чужое");
    }

    bot.send_message(msg.chat.id, text)
        .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(BACK)]]))
        .await?;
    Ok(())
}

async fn comment_input(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    lesson_id: i64,
    msg: Message,
) -> HandlerResult {
    let uid = user_id(&msg);
    let caps = capabilities(&data, uid);
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Пожалуйста, напиши сообщение текстом")
            .await?;
        return Ok(());
    };

    if text == BACK {
        let Some(lesson) = store::get_lesson(&data, lesson_id)? else {
            show_course_menu(&bot, &data, &msg).await?;
            dialogue.update(State::CourseMenu).await?;
            return Ok(());
        };
        send_lesson_footer(&bot, &data, &msg, &lesson).await?;
        dialogue.update(State::Viewing { lesson_id }).await?;
        return Ok(());
    }

    if let Some(n) = text
        .strip_prefix("удалить ")
        .and_then(|rest| rest.trim().parse::<usize>().ok())
    {
        if caps.can_author {
            let comments = store::comments_for_lesson(&data, lesson_id)?;
            match n.checked_sub(1).and_then(|i| comments.get(i)) {
                Some(comment) => {
                    store::delete_comment(&data, comment.id)?;
                    bot.send_message(msg.chat.id, "Сообщение удалено").await?;
                }
                None => {
                    bot.send_message(msg.chat.id, "Нет сообщения с таким номером")
                        .await?;
                }
            }
            send_comments(&bot, &data, &msg, lesson_id).await?;
            return Ok(());
        }
    }

    store::add_comment(&data, lesson_id, uid, text)?;
    send_comments(&bot, &data, &msg, lesson_id).await?;
    Ok(())
}

// --- прохождение теста ---

async fn ask_question(
    bot: &Bot,
    msg: &Message,
    attempt: &QuizAttempt,
    index: usize,
) -> HandlerResult {
    let question = &attempt.questions()[index];

    let text = format!(
        "Вопрос №{} из {}:\n{}",
        index + 1,
        attempt.total(),
        question.question
    );

    let mut rows: Vec<Vec<KeyboardButton>> = question
        .options
        .iter()
        .enumerate()
        .map(|(o, opt)| {
            // Текущий выбор помечаем, правильность не показываем
            let label = match attempt.option_mark(index, o) {
                OptionMark::Selected => format!("🔘 {}", opt),
                _ => opt.clone(),
            };
            vec![KeyboardButton::new(label)]
        })
        .collect();
    rows.push(vec![KeyboardButton::new(SKIP_QUESTION)]);

    bot.send_message(msg.chat.id, text)
        .reply_markup(KeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn show_review(bot: &Bot, msg: &Message, attempt: &QuizAttempt) -> HandlerResult {
    let mut text = String::from("Твои ответы:\n");
    for (i, q) in attempt.questions().iter().enumerate() {
        let answer = attempt
            .answer(i)
            .and_then(|o| q.options.get(o))
            .map(|o| o.as_str())
            .unwrap_or("--");
        text.push_str(&format!("\n{}. {} -- {}", i + 1, q.question, answer));
    }
    text.push_str("\n\nЗавершить тест? Напиши номер вопроса, чтобы изменить ответ.");

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(SUBMIT_QUIZ)],
        vec![KeyboardButton::new(LEAVE_QUIZ)],
    ]);
    bot.send_message(msg.chat.id, text)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn quiz_question(
    bot: Bot,
    dialogue: QuizDialogue,
    (lesson_id, mut attempt, cursor): (i64, QuizAttempt, usize),
    msg: Message,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Пожалуйста, выбери вариант на клавиатуре")
            .await?;
        return Ok(());
    };

    if text != SKIP_QUESTION {
        let answer = text.strip_prefix("🔘 ").unwrap_or(text);
        let question = &attempt.questions()[cursor];
        match question.options.iter().position(|o| o == answer) {
            Some(option_index) => attempt.select(cursor, option_index),
            None => {
                bot.send_message(msg.chat.id, "Пожалуйста, выбери вариант на клавиатуре")
                    .await?;
                return Ok(());
            }
        }
    }

    let next = cursor + 1;
    if next >= attempt.total() {
        show_review(&bot, &msg, &attempt).await?;
        dialogue
            .update(State::QuizReview { lesson_id, attempt })
            .await?;
        return Ok(());
    }

    ask_question(&bot, &msg, &attempt, next).await?;
    dialogue
        .update(State::Quiz {
            lesson_id,
            attempt,
            cursor: next,
        })
        .await?;
    Ok(())
}

fn feedback_text(attempt: &QuizAttempt) -> String {
    let mut text = String::new();
    for (i, q) in attempt.questions().iter().enumerate() {
        text.push_str(&format!("\n{}. {}\n", i + 1, q.question));
        for (o, opt) in q.options.iter().enumerate() {
            let mark = match attempt.option_mark(i, o) {
                OptionMark::Correct => "✅",
                OptionMark::Incorrect => "❌",
                _ => "▫️",
            };
            text.push_str(&format!("  {} {}\n", mark, opt));
        }
    }
    text
}

async fn quiz_review(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    (lesson_id, mut attempt): (i64, QuizAttempt),
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(SUBMIT_QUIZ) => match attempt.submit() {
            Ok(result) => {
                let headline = if result.perfect {
                    // конфетти
                    "🎉 Отличный результат! 🏆"
                } else {
                    "Можно лучше! Попробуй еще раз."
                };
                let text = format!(
                    "Результат: {} / {}\n{}\n{}",
                    result.score,
                    result.total,
                    headline,
                    feedback_text(&attempt)
                );
                bot.send_message(msg.chat.id, text).await?;

                if result.passed {
                    if progress::record_completion(&data, user_id(&msg), lesson_id)? {
                        bot.send_message(msg.chat.id, "Молодец! Урок пройден 🎉")
                            .await?;
                    } else {
                        bot.send_message(msg.chat.id, "Урок уже был пройден").await?;
                    }
                }

                let keyboard = KeyboardMarkup::new(vec![vec![
                    KeyboardButton::new(RETRY_QUIZ),
                    KeyboardButton::new(BACK_TO_LESSONS),
                ]]);
                bot.send_message(msg.chat.id, "Что дальше?")
                    .reply_markup(keyboard)
                    .await?;
                dialogue
                    .update(State::QuizResult { lesson_id, attempt })
                    .await?;
            }
            Err(QuizError::Unanswered(i)) => {
                bot.send_message(msg.chat.id, "Ответьте на все вопросы!")
                    .await?;
                ask_question(&bot, &msg, &attempt, i).await?;
                dialogue
                    .update(State::Quiz {
                        lesson_id,
                        attempt,
                        cursor: i,
                    })
                    .await?;
            }
            Err(e) => {
                bot.send_message(msg.chat.id, e.to_string()).await?;
            }
        },
        Some(LEAVE_QUIZ) => {
            // попытка не сохраняется
            back_to_lessons(&bot, &dialogue, &data, &msg, lesson_id).await?;
        }
        Some(text) => {
            // Номер вопроса -- вернуться и переответить
            match text.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
                Some(i) if i < attempt.total() => {
                    ask_question(&bot, &msg, &attempt, i).await?;
                    dialogue
                        .update(State::Quiz {
                            lesson_id,
                            attempt,
                            cursor: i,
                        })
                        .await?;
                }
                _ => {
                    bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                        .await?;
                }
            }
        }
        None => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                .await?;
        }
    }
    Ok(())
}

async fn quiz_result(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    (lesson_id, mut attempt): (i64, QuizAttempt),
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(RETRY_QUIZ) => {
            attempt.retry()?;
            ask_question(&bot, &msg, &attempt, 0).await?;
            dialogue
                .update(State::Quiz {
                    lesson_id,
                    attempt,
                    cursor: 0,
                })
                .await?;
        }
        Some(BACK_TO_LESSONS) => {
            back_to_lessons(&bot, &dialogue, &data, &msg, lesson_id).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                .await?;
        }
    }
    Ok(())
}

async fn back_to_lessons(
    bot: &Bot,
    dialogue: &QuizDialogue,
    data: &DataDir,
    msg: &Message,
    lesson_id: i64,
) -> HandlerResult {
    match store::get_lesson(data, lesson_id)? {
        Some(lesson) => {
            show_lesson_menu(bot, data, msg, lesson.course_id).await?;
            dialogue
                .update(State::LessonMenu {
                    course_id: lesson.course_id,
                })
                .await?;
        }
        None => {
            show_course_menu(bot, data, msg).await?;
            dialogue.update(State::CourseMenu).await?;
        }
    }
    Ok(())
}

// --- конструктор теста ---

async fn edit_quiz_pick(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    course_id: i64,
    msg: Message,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Пожалуйста, напиши название урока")
            .await?;
        return Ok(());
    };

    let lessons = store::lessons_for_course(&data, course_id)?;
    let Some(lesson) = find_lesson_by_button(&lessons, text) else {
        bot.send_message(msg.chat.id, "Урок с таким названием не найден")
            .await?;
        return Ok(());
    };

    let draft = lesson.quiz_data.clone().unwrap_or_default();
    show_builder_review(&bot, &msg, &draft).await?;
    dialogue
        .update(State::BuilderReview {
            lesson_id: lesson.id,
            draft,
        })
        .await?;
    Ok(())
}

async fn show_builder_review(bot: &Bot, msg: &Message, draft: &[QuizQuestion]) -> HandlerResult {
    let mut text = if draft.is_empty() {
        "В тесте пока нет вопросов.".to_string()
    } else {
        let mut t = String::from("Вопросы теста:\n");
        for (i, q) in draft.iter().enumerate() {
            t.push_str(&format!("\n{}. {}\n", i + 1, q.question));
            for (o, opt) in q.options.iter().enumerate() {
                let mark = if o == q.correct_index { "✅" } else { "▫️" };
                t.push_str(&format!("  {} {}. {}\n", mark, o + 1, opt));
            }
        }
        t
    };
    text.push_str("\n«удалить N» -- убрать вопрос, «удалить N.M» -- убрать вариант ответа");

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(ADD_QUESTION)],
        vec![KeyboardButton::new(SAVE_QUIZ), KeyboardButton::new(CANCEL)],
    ]);
    bot.send_message(msg.chat.id, text)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn builder_review(
    bot: Bot,
    dialogue: QuizDialogue,
    data: DataDir,
    (lesson_id, mut draft): (i64, Vec<QuizQuestion>),
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(ADD_QUESTION) => {
            bot.send_message(msg.chat.id, "Текст вопроса?").await?;
            dialogue
                .update(State::BuilderPrompt { lesson_id, draft })
                .await?;
        }
        Some(SAVE_QUIZ) => {
            store::save_quiz(&data, lesson_id, draft)?;
            log::info!("Quiz saved for lesson {}", lesson_id);
            bot.send_message(msg.chat.id, "Тест сохранен!").await?;
            back_to_lessons(&bot, &dialogue, &data, &msg, lesson_id).await?;
        }
        Some(CANCEL) => {
            back_to_lessons(&bot, &dialogue, &data, &msg, lesson_id).await?;
        }
        Some(text) => {
            if let Some(rest) = text.strip_prefix("удалить ") {
                draft = apply_builder_removal(draft, rest.trim());
                show_builder_review(&bot, &msg, &draft).await?;
                dialogue
                    .update(State::BuilderReview { lesson_id, draft })
                    .await?;
            } else {
                bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                    .await?;
            }
        }
        None => {
            bot.send_message(msg.chat.id, "Пожалуйста, выбери действие на клавиатуре")
                .await?;
        }
    }
    Ok(())
}

/// "N" removes question N, "N.M" removes option M of question N. Both are
/// 1-based, invalid references leave the draft as is.
fn apply_builder_removal(draft: Vec<QuizQuestion>, target: &str) -> Vec<QuizQuestion> {
    match target.split_once('.') {
        Some((q, o)) => {
            let (Ok(q), Ok(o)) = (q.trim().parse::<usize>(), o.trim().parse::<usize>()) else {
                return draft;
            };
            if q == 0 || o == 0 {
                return draft;
            }
            builder::remove_option(draft, q - 1, o - 1)
        }
        None => {
            let Ok(q) = target.parse::<usize>() else {
                return draft;
            };
            if q == 0 {
                return draft;
            }
            builder::remove_question(draft, q - 1)
        }
    }
}

async fn builder_prompt(
    bot: Bot,
    dialogue: QuizDialogue,
    (lesson_id, draft): (i64, Vec<QuizQuestion>),
    msg: Message,
) -> HandlerResult {
    let Some(prompt) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        bot.send_message(msg.chat.id, "Текст вопроса не может быть пустым")
            .await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        "Варианты ответа, каждый с новой строки (минимум 2)",
    )
    .await?;
    dialogue
        .update(State::BuilderOptions {
            lesson_id,
            draft,
            prompt: prompt.to_string(),
        })
        .await?;
    Ok(())
}

async fn builder_options(
    bot: Bot,
    dialogue: QuizDialogue,
    (lesson_id, draft, prompt): (i64, Vec<QuizQuestion>, String),
    msg: Message,
) -> HandlerResult {
    let options: Vec<String> = msg
        .text()
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();

    if options.len() < builder::MIN_OPTIONS {
        bot.send_message(msg.chat.id, "Нужно минимум два варианта ответа")
            .await?;
        return Ok(());
    }

    let numbered = options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, o))
        .collect::<Vec<_>>()
        .join("\n");
    bot.send_message(
        msg.chat.id,
        format!("Номер правильного варианта?\n{}", numbered),
    )
    .await?;

    dialogue
        .update(State::BuilderCorrect {
            lesson_id,
            draft,
            prompt,
            options,
        })
        .await?;
    Ok(())
}

async fn builder_correct(
    bot: Bot,
    dialogue: QuizDialogue,
    (lesson_id, mut draft, prompt, options): (i64, Vec<QuizQuestion>, String, Vec<String>),
    msg: Message,
) -> HandlerResult {
    let correct = msg
        .text()
        .and_then(|t| t.trim().parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .filter(|i| *i < options.len());
    let Some(correct_index) = correct else {
        bot.send_message(msg.chat.id, "Пожалуйста, пришли номер одного из вариантов")
            .await?;
        return Ok(());
    };

    // Новый вопрос собирается через операции конструктора
    draft = builder::add_question(draft);
    let index = draft.len() - 1;
    draft = builder::update_question_text(draft, index, prompt);
    while draft[index].options.len() < options.len() {
        draft = builder::add_option(draft, index);
    }
    while draft[index].options.len() > options.len() {
        let last = draft[index].options.len() - 1;
        draft = builder::remove_option(draft, index, last);
    }
    for (o, text) in options.into_iter().enumerate() {
        draft = builder::update_option(draft, index, o, text);
    }
    draft = builder::set_correct(draft, index, correct_index);

    show_builder_review(&bot, &msg, &draft).await?;
    dialogue
        .update(State::BuilderReview { lesson_id, draft })
        .await?;
    Ok(())
}
