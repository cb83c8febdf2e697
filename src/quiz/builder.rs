//! Quiz authoring operations.
//!
//! Every operation takes the question list by value and returns the updated
//! list (replace-at-index, no aliasing of inner vectors). `remove_option`
//! keeps `correct_index` valid: removing an option above it changes nothing,
//! removing one below it shifts it left, removing the correct one resets it
//! to the first option.

use crate::quiz::QuizQuestion;

/// A question can never drop below two options.
pub const MIN_OPTIONS: usize = 2;

/// Fresh questions start with three blank options, the first one correct.
pub fn new_question() -> QuizQuestion {
    QuizQuestion::new(
        chrono::Utc::now().timestamp_millis().to_string(),
        String::new(),
        vec![String::new(), String::new(), String::new()],
        0,
    )
}

pub fn add_question(mut questions: Vec<QuizQuestion>) -> Vec<QuizQuestion> {
    questions.push(new_question());
    questions
}

pub fn remove_question(mut questions: Vec<QuizQuestion>, index: usize) -> Vec<QuizQuestion> {
    if index < questions.len() {
        questions.remove(index);
    }
    questions
}

pub fn update_question_text(
    mut questions: Vec<QuizQuestion>,
    index: usize,
    text: String,
) -> Vec<QuizQuestion> {
    if let Some(q) = questions.get_mut(index) {
        q.question = text;
    }
    questions
}

pub fn update_option(
    mut questions: Vec<QuizQuestion>,
    question_index: usize,
    option_index: usize,
    text: String,
) -> Vec<QuizQuestion> {
    if let Some(q) = questions.get_mut(question_index) {
        if let Some(opt) = q.options.get_mut(option_index) {
            *opt = text;
        }
    }
    questions
}

pub fn set_correct(
    mut questions: Vec<QuizQuestion>,
    question_index: usize,
    option_index: usize,
) -> Vec<QuizQuestion> {
    if let Some(q) = questions.get_mut(question_index) {
        if option_index < q.options.len() {
            q.correct_index = option_index;
        }
    }
    questions
}

pub fn add_option(mut questions: Vec<QuizQuestion>, question_index: usize) -> Vec<QuizQuestion> {
    if let Some(q) = questions.get_mut(question_index) {
        q.options.push(String::new());
    }
    questions
}

pub fn remove_option(
    mut questions: Vec<QuizQuestion>,
    question_index: usize,
    option_index: usize,
) -> Vec<QuizQuestion> {
    let Some(q) = questions.get_mut(question_index) else {
        return questions;
    };
    if option_index >= q.options.len() || q.options.len() <= MIN_OPTIONS {
        return questions;
    }

    q.options.remove(option_index);
    // Если удалили правильный ответ, сбрасываем на 0
    if q.correct_index == option_index {
        q.correct_index = 0;
    } else if q.correct_index > option_index {
        q.correct_index -= 1;
    }
    questions
}
