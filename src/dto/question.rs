use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::questions::QuestionRecord;

/// Query string of the question-fetch endpoint.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct GenerateQuestionQuery {
    /// Game whose question buffer should be used.
    #[validate(length(min = 1, max = 64))]
    pub game_id: String,
}

/// Full question, including its answer, as served by the question-fetch endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: u8,
    pub explanation: String,
}

/// Question as shown to players while it is open: no answer, no explanation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionView {
    pub index: usize,
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub time_limit_secs: u64,
}

impl From<QuestionRecord> for QuestionResponse {
    fn from(record: QuestionRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            options: record.options.into(),
            correct_answer: record.correct_index,
            explanation: record.explanation,
        }
    }
}

impl QuestionView {
    /// Build the player-facing projection of `question`.
    pub fn new(index: usize, question: &QuestionRecord, time_limit_secs: u64) -> Self {
        Self {
            index,
            id: question.id.clone(),
            text: question.text.clone(),
            options: question.options.to_vec(),
            time_limit_secs,
        }
    }
}
