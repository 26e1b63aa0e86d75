//! Question supply: generation, validation and per-game buffering of question batches.

#[cfg(feature = "http-generator")]
pub mod chat_completions;
pub mod generator;
pub mod supply;
pub mod validator;

pub use self::generator::{GenerationPrompt, GeneratorError, QuestionGenerator};
pub use self::supply::{QuestionSupply, SupplyError};
pub use self::validator::{QuestionDefect, ValidationError, parse_batch};

/// Number of questions produced by one generation call (and played per round).
pub const BATCH_SIZE: usize = 5;
/// Number of answer options carried by every question.
pub const OPTION_COUNT: usize = 4;

/// A validated, immutable trivia question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    /// Identifier unique within the batch the record was generated in.
    pub id: String,
    /// Question prompt shown to players.
    pub text: String,
    /// Answer options in display order.
    pub options: [String; OPTION_COUNT],
    /// Index of the correct option inside `options` (0..=3).
    pub correct_index: u8,
    /// Short explanation of the correct answer.
    pub explanation: String,
}

impl QuestionRecord {
    /// Whether `selected` designates the correct option. The timed-out sentinel never does.
    pub fn is_correct(&self, selected: i8) -> bool {
        selected >= 0 && selected as u8 == self.correct_index
    }
}
