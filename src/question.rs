//! Question pool and random draw
//!
//! This module defines the immutable question records and the static
//! pool they are drawn from. Draws are uniform **with replacement**:
//! the same question may recur within a match or across matches. The
//! pool is small and variety is not guaranteed; that is an accepted
//! property of the design, not a defect.

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

/// Errors that can occur while building a question pool
#[derive(Error, Debug)]
pub enum Error {
    /// The pool must contain at least one question
    #[error("question pool cannot be empty")]
    EmptyPool,
    /// The correct option index does not point at an option
    #[error("correct option index {index} is out of range for {count} options")]
    CorrectOutOfRange {
        /// The offending index
        index: usize,
        /// The number of options the question actually has
        count: usize,
    },
    /// A question failed field validation
    #[error("invalid question: {0}")]
    Invalid(String),
}

/// A single multiple-choice question
///
/// Immutable once constructed: the text, the ordered options, and the
/// index of the correct option never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The question text shown to both players
    #[garde(length(min = 1, max = constants::question::MAX_TEXT_LENGTH))]
    text: String,
    /// The ordered answer options
    #[garde(
        length(min = constants::question::MIN_OPTION_COUNT, max = constants::question::MAX_OPTION_COUNT),
        inner(length(min = 1, max = constants::question::MAX_OPTION_LENGTH))
    )]
    options: Vec<String>,
    /// Index of the correct option
    #[garde(skip)]
    correct: usize,
}

impl Question {
    /// Creates a validated question
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` if the text or options fail validation,
    /// or `Error::CorrectOutOfRange` if `correct` does not index an option.
    pub fn new(text: String, options: Vec<String>, correct: usize) -> Result<Self, Error> {
        let question = Self {
            text,
            options,
            correct,
        };
        question
            .validate()
            .map_err(|report| Error::Invalid(report.to_string()))?;
        if question.correct >= question.options.len() {
            return Err(Error::CorrectOutOfRange {
                index: question.correct,
                count: question.options.len(),
            });
        }
        Ok(question)
    }

    /// The question text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The ordered answer options
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Index of the correct option
    pub fn correct_option(&self) -> usize {
        self.correct
    }

    /// Checks whether the given option index is the correct answer
    pub fn is_correct(&self, option_index: usize) -> bool {
        option_index == self.correct
    }

    /// Checks whether the given option index points at an option at all
    pub fn has_option(&self, option_index: usize) -> bool {
        option_index < self.options.len()
    }
}

/// A static pool of questions supporting uniform random draws
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pool: Vec<Question>,
}

impl QuestionBank {
    /// Creates a question bank from a validated pool
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyPool` if `pool` is empty, or the first
    /// validation error of any contained question.
    pub fn new(pool: Vec<Question>) -> Result<Self, Error> {
        if pool.is_empty() {
            return Err(Error::EmptyPool);
        }
        for question in &pool {
            question
                .validate()
                .map_err(|report| Error::Invalid(report.to_string()))?;
            if question.correct >= question.options.len() {
                return Err(Error::CorrectOutOfRange {
                    index: question.correct,
                    count: question.options.len(),
                });
            }
        }
        Ok(Self { pool })
    }

    /// Draws one question uniformly at random, with replacement
    pub fn draw(&self) -> &Question {
        &self.pool[fastrand::usize(..self.pool.len())]
    }

    /// Returns the number of questions in the pool
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Checks whether the pool is empty (never true for a constructed bank)
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

impl Default for QuestionBank {
    /// The built-in web development question pool
    fn default() -> Self {
        let question = |text: &str, options: &[&str], correct: usize| Question {
            text: text.to_owned(),
            options: options.iter().map(|s| (*s).to_owned()).collect(),
            correct,
        };

        Self {
            pool: vec![
                question(
                    "Which HTML5 tag is used to define navigation links?",
                    &["<nav>", "<navigation>", "<menu>", "<links>"],
                    0,
                ),
                question(
                    "Which CSS property is used to set margins around an element?",
                    &["spacing", "margin", "padding", "border"],
                    1,
                ),
                question(
                    "Which JavaScript method is used to add an element to the end of an array?",
                    &["push()", "add()", "append()", "insert()"],
                    0,
                ),
                question(
                    "In responsive web design, which CSS property is used to set the viewport?",
                    &["@viewport", "@media", "@responsive", "@screen"],
                    1,
                ),
                question(
                    "In HTML, which attribute is used to specify the URL where a form should be submitted?",
                    &["url", "action", "link", "submit"],
                    1,
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_validation() {
        let question = Question::new(
            "What is 2 + 2?".to_owned(),
            vec!["3".to_owned(), "4".to_owned()],
            1,
        )
        .unwrap();
        assert!(question.is_correct(1));
        assert!(!question.is_correct(0));
    }

    #[test]
    fn test_question_rejects_out_of_range_correct() {
        let result = Question::new(
            "What is 2 + 2?".to_owned(),
            vec!["3".to_owned(), "4".to_owned()],
            2,
        );
        assert!(matches!(
            result,
            Err(Error::CorrectOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_question_rejects_single_option() {
        let result = Question::new("Pick one".to_owned(), vec!["only".to_owned()], 0);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_question_rejects_empty_text() {
        let result = Question::new(
            String::new(),
            vec!["a".to_owned(), "b".to_owned()],
            0,
        );
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_bank_rejects_empty_pool() {
        assert!(matches!(QuestionBank::new(vec![]), Err(Error::EmptyPool)));
    }

    #[test]
    fn test_default_bank_is_valid() {
        let bank = QuestionBank::default();
        assert_eq!(bank.len(), 5);
        assert!(QuestionBank::new(bank.pool.clone()).is_ok());
    }

    #[test]
    fn test_draw_stays_in_pool() {
        let bank = QuestionBank::default();
        for _ in 0..50 {
            let drawn = bank.draw();
            assert!(bank.pool.contains(drawn));
            assert!(drawn.has_option(drawn.correct_option()));
        }
    }
}
