pub mod builder;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

impl QuizQuestion {
    pub fn new(id: String, question: String, options: Vec<String>, correct_index: usize) -> Self {
        Self {
            id,
            question,
            options,
            correct_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizError {
    /// No questions at all -- nothing to play.
    EmptyQuiz,
    /// Submit refused: the question at this index has no answer yet.
    Unanswered(usize),
    /// The attempt is already submitted, answers are frozen.
    AlreadySubmitted,
    /// Retry only makes sense after a submit.
    NotSubmitted,
}

impl fmt::Display for QuizError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizError::EmptyQuiz => write!(f, "Тест пуст"),
            QuizError::Unanswered(i) => write!(f, "Вопрос №{} без ответа", i + 1),
            QuizError::AlreadySubmitted => write!(f, "Тест уже завершен"),
            QuizError::NotSubmitted => write!(f, "Тест еще не завершен"),
        }
    }
}

impl std::error::Error for QuizError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitResult {
    pub score: usize,
    pub total: usize,
    /// At least half of the questions answered correctly (ties pass).
    pub passed: bool,
    /// Everything correct -- the host shows the celebration.
    pub perfect: bool,
}

/// Styling for one option of one question, the observable feedback contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionMark {
    /// Picked by the user while the attempt is still active.
    Selected,
    /// Nothing to show for it yet.
    Neutral,
    /// After submit: this is the correct option, always highlighted.
    Correct,
    /// After submit: the user's pick, and it was wrong.
    Incorrect,
    /// After submit: everything else.
    Dimmed,
}

/// One in-memory play-through of a quiz.
///
/// Active -> Submitted -> (retry) -> Active. All transitions are synchronous
/// and run to completion; the attempt is owned by exactly one dialogue.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizAttempt {
    questions: Vec<QuizQuestion>,
    answers: Vec<Option<usize>>,
    submitted: bool,
    score: usize,
}

impl QuizAttempt {
    pub fn new(questions: Vec<QuizQuestion>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyQuiz);
        }
        let answers = vec![None; questions.len()];
        Ok(Self {
            questions,
            answers,
            submitted: false,
            score: 0,
        })
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    pub fn answer(&self, question_index: usize) -> Option<usize> {
        self.answers.get(question_index).copied().flatten()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Score is only meaningful after a successful submit.
    pub fn score(&self) -> Option<usize> {
        if self.submitted {
            Some(self.score)
        } else {
            None
        }
    }

    /// First question still without an answer, if any.
    pub fn first_unanswered(&self) -> Option<usize> {
        self.answers.iter().position(|a| a.is_none())
    }

    /// Records an answer. Last choice wins; ignored once submitted or when
    /// either index is out of range.
    pub fn select(&mut self, question_index: usize, option_index: usize) {
        if self.submitted {
            return;
        }
        let Some(question) = self.questions.get(question_index) else {
            return;
        };
        if option_index >= question.options.len() {
            return;
        }
        self.answers[question_index] = Some(option_index);
    }

    /// Scores the attempt and freezes it.
    ///
    /// Every question must be answered first; otherwise nothing changes and
    /// the index of the first gap comes back in the error. The host records
    /// a completion when `passed` is set -- re-submitting is rejected, so a
    /// single submit can only ever hand out that signal once.
    pub fn submit(&mut self) -> Result<SubmitResult, QuizError> {
        if self.submitted {
            return Err(QuizError::AlreadySubmitted);
        }
        if let Some(i) = self.first_unanswered() {
            return Err(QuizError::Unanswered(i));
        }

        let score = self
            .questions
            .iter()
            .zip(&self.answers)
            .filter(|(q, a)| **a == Some(q.correct_index))
            .count();

        self.score = score;
        self.submitted = true;

        let total = self.questions.len();
        Ok(SubmitResult {
            score,
            total,
            // score >= total / 2 с настоящим делением: 3 из 5 проходит
            passed: score * 2 >= total,
            perfect: score == total,
        })
    }

    /// Back to a blank active attempt over the same questions. Completions
    /// already handed out are not revoked.
    pub fn retry(&mut self) -> Result<(), QuizError> {
        if !self.submitted {
            return Err(QuizError::NotSubmitted);
        }
        self.answers = vec![None; self.questions.len()];
        self.submitted = false;
        self.score = 0;
        Ok(())
    }

    /// How to style option `option_index` of question `question_index`.
    pub fn option_mark(&self, question_index: usize, option_index: usize) -> OptionMark {
        let picked = self.answer(question_index);
        if !self.submitted {
            return if picked == Some(option_index) {
                OptionMark::Selected
            } else {
                OptionMark::Neutral
            };
        }

        let correct = self
            .questions
            .get(question_index)
            .map(|q| q.correct_index);
        // Правильный ответ всегда зеленый, твой неправильный выбор -- красный
        if correct == Some(option_index) {
            OptionMark::Correct
        } else if picked == Some(option_index) {
            OptionMark::Incorrect
        } else {
            OptionMark::Dimmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(prompt: &str, options: &[&str], correct: usize) -> QuizQuestion {
        QuizQuestion::new(
            prompt.to_string(),
            prompt.to_string(),
            options.iter().map(|o| o.to_string()).collect(),
            correct,
        )
    }

    fn attempt(n: usize) -> QuizAttempt {
        let questions = (0..n)
            .map(|i| question(&format!("q{}", i), &["a", "b", "c"], i % 3))
            .collect();
        QuizAttempt::new(questions).unwrap()
    }

    #[test]
    fn empty_quiz_is_refused() {
        assert_eq!(QuizAttempt::new(vec![]).unwrap_err(), QuizError::EmptyQuiz);
    }

    #[test]
    fn last_choice_wins() {
        let mut a = attempt(1);
        a.select(0, 1);
        a.select(0, 2);
        assert_eq!(a.answer(0), Some(2));
    }

    #[test]
    fn out_of_range_selections_are_ignored() {
        let mut a = attempt(2);
        a.select(5, 0);
        a.select(0, 99);
        assert_eq!(a.answer(0), None);
        assert_eq!(a.answer(1), None);
    }

    #[test]
    fn submit_requires_every_answer() {
        let mut a = attempt(3);
        a.select(0, 0);
        a.select(2, 2);
        assert_eq!(a.submit().unwrap_err(), QuizError::Unanswered(1));
        // состояние не изменилось
        assert!(!a.is_submitted());
        assert_eq!(a.score(), None);
        assert_eq!(a.answer(0), Some(0));
    }

    #[test]
    fn full_correct_answers_score_everything_and_celebrate() {
        let mut a = attempt(4);
        for i in 0..4 {
            a.select(i, i % 3);
        }
        let result = a.submit().unwrap();
        assert_eq!(result.score, 4);
        assert!(result.passed);
        assert!(result.perfect);
        assert_eq!(a.score(), Some(4));
    }

    #[test]
    fn half_threshold_is_inclusive() {
        // 2 из 4 -- проходит
        let mut a = attempt(4);
        a.select(0, 0); // верно
        a.select(1, 1); // верно
        a.select(2, 0); // неверно (верно 2)
        a.select(3, 1); // неверно (верно 0)
        let result = a.submit().unwrap();
        assert_eq!(result.score, 2);
        assert!(result.passed);
        assert!(!result.perfect);
    }

    #[test]
    fn below_half_does_not_pass() {
        // 1 из 4 -- не проходит
        let mut a = attempt(4);
        a.select(0, 0); // верно
        a.select(1, 0); // неверно
        a.select(2, 0); // неверно
        a.select(3, 1); // неверно
        let result = a.submit().unwrap();
        assert_eq!(result.score, 1);
        assert!(!result.passed);
    }

    #[test]
    fn three_of_five_passes_with_real_division() {
        let mut a = attempt(5);
        a.select(0, 0); // верно
        a.select(1, 1); // верно
        a.select(2, 2); // верно
        a.select(3, 1); // неверно (верно 0)
        a.select(4, 0); // неверно (верно 1)
        let result = a.submit().unwrap();
        assert_eq!(result.score, 3);
        assert!(result.passed);
        assert!(!result.perfect);
    }

    #[test]
    fn submitted_attempt_rejects_mutation_and_resubmit() {
        let mut a = attempt(2);
        a.select(0, 0);
        a.select(1, 1);
        a.submit().unwrap();

        a.select(0, 2);
        assert_eq!(a.answer(0), Some(0));
        assert_eq!(a.submit().unwrap_err(), QuizError::AlreadySubmitted);
    }

    #[test]
    fn retry_resets_everything_and_allows_a_second_run() {
        let mut a = attempt(2);
        assert_eq!(a.retry().unwrap_err(), QuizError::NotSubmitted);

        a.select(0, 0);
        a.select(1, 1);
        a.submit().unwrap();

        a.retry().unwrap();
        assert!(!a.is_submitted());
        assert_eq!(a.score(), None);
        assert_eq!(a.answer(0), None);
        assert_eq!(a.answer(1), None);

        // тот же самый набор вопросов, можно пройти еще раз
        a.select(0, 0);
        a.select(1, 1);
        let result = a.submit().unwrap();
        assert!(result.perfect);
    }

    #[test]
    fn marks_before_submit_only_show_the_pick() {
        let mut a = attempt(1);
        assert_eq!(a.option_mark(0, 0), OptionMark::Neutral);
        a.select(0, 1);
        assert_eq!(a.option_mark(0, 1), OptionMark::Selected);
        assert_eq!(a.option_mark(0, 0), OptionMark::Neutral);
        // никакой информации о правильности до завершения
        assert_ne!(a.option_mark(0, 0), OptionMark::Correct);
    }

    #[test]
    fn marks_after_submit_follow_the_feedback_policy() {
        let mut a = QuizAttempt::new(vec![question("q", &["a", "b", "c"], 2)]).unwrap();
        a.select(0, 0);
        a.submit().unwrap();

        // правильный вариант подсвечен всегда, даже если выбран другой
        assert_eq!(a.option_mark(0, 2), OptionMark::Correct);
        assert_eq!(a.option_mark(0, 0), OptionMark::Incorrect);
        assert_eq!(a.option_mark(0, 1), OptionMark::Dimmed);
    }

    #[test]
    fn correct_pick_is_not_doubled_as_incorrect() {
        let mut a = QuizAttempt::new(vec![question("q", &["a", "b"], 1)]).unwrap();
        a.select(0, 1);
        a.submit().unwrap();
        assert_eq!(a.option_mark(0, 1), OptionMark::Correct);
        assert_eq!(a.option_mark(0, 0), OptionMark::Dimmed);
    }
}
