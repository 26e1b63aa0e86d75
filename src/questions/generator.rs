//! Port to the generative text backend and the prompt it is sent.
//!
//! The backend only has to answer with raw text; turning that text into
//! questions is the validator's job.

use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;

/// Quiz-host persona used as the system message when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a quiz show host in the style of You Don't Know Jack. \
Generate engaging, witty questions with a mix of pop culture, history, science, and general knowledge. \
Each question should have 4 options with only one correct answer. \
Make the incorrect options plausible and sometimes humorous. \
Include a brief explanation for the correct answer.";

/// Fixed instruction asking for one batch spanning the five category slots, in rotation order.
pub const BATCH_INSTRUCTION: &str = "Generate 5 unique quiz show questions in JSON format. \
Each question must be from a different category:\n\n\
1. History/Politics\n\
2. Science/Nature\n\
3. Pop Culture/Entertainment\n\
4. Sports/Games\n\
5. Technology/Innovation\n\n\
Return a JSON array containing exactly 5 questions. Each question must be an object with this structure:\n\
{\n  \"text\": \"question text here\",\n  \"options\": [\"option1\", \"option2\", \"option3\", \"option4\"],\n  \"correctAnswer\": 0,\n  \"explanation\": \"brief explanation here\"\n}\n\n\
IMPORTANT: Response must be a valid JSON array that can be parsed directly. \
Do not include any text outside the JSON array.";

/// Messages sent to the generator for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    /// System message setting the host persona.
    pub system: String,
    /// User message describing the expected batch.
    pub instruction: String,
}

impl GenerationPrompt {
    /// Build the batch prompt around the given system message.
    pub fn batch(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            instruction: BATCH_INSTRUCTION.to_string(),
        }
    }
}

/// Failure reported by a generation backend.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The backend could not be reached or the request failed in transit.
    #[error("generator unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Underlying transport or decoding failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend answered with a non-success status.
    #[error("generator returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// The backend answered successfully but without any completion text.
    #[error("generator returned an empty completion")]
    EmptyCompletion,
}

impl GeneratorError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        GeneratorError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Abstraction over the generative text backend. Latency is unbounded and no retry is built in.
pub trait QuestionGenerator: Send + Sync {
    /// Run one completion and return its raw text.
    fn generate(
        &self,
        prompt: GenerationPrompt,
    ) -> BoxFuture<'static, Result<String, GeneratorError>>;
}
