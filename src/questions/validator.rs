//! Turns raw generator output into exactly [`BATCH_SIZE`] question records.
//!
//! Parsing happens in two stages: the whole document is parsed as JSON first,
//! and only when that fails is the first balanced `[...]` span extracted and
//! parsed. Each stage reports its own failure so callers can tell them apart.

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::{BATCH_SIZE, OPTION_COUNT, QuestionRecord};

/// Reasons a generated batch is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The document was not JSON and contained no bracketed array span.
    #[error("no JSON array found in generator output (document parse failed: {document_error})")]
    NoArrayFound {
        /// Error reported by the whole-document parse.
        document_error: String,
    },
    /// Both the whole document and the extracted array span failed to parse.
    #[error(
        "generator output is not valid JSON (document: {document_error}; extracted array: {extracted_error})"
    )]
    Unparseable {
        /// Error reported by the whole-document parse.
        document_error: String,
        /// Error reported when parsing the extracted `[...]` span.
        extracted_error: String,
    },
    /// The parsed value is valid JSON but not an array.
    #[error("generator output is not a JSON array")]
    NotAnArray,
    /// The array does not hold exactly [`BATCH_SIZE`] questions.
    #[error("expected {expected} questions, got {0}", expected = BATCH_SIZE)]
    WrongLength(usize),
    /// One of the questions is structurally invalid.
    #[error("question {position} is invalid: {reason}", position = .index + 1)]
    InvalidQuestion {
        /// Zero-based position of the offending question.
        index: usize,
        /// What is wrong with it.
        reason: QuestionDefect,
    },
}

/// Structural problem found in a single generated question.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionDefect {
    /// The array entry is not a JSON object.
    #[error("entry is not an object")]
    NotAnObject,
    /// `text` is absent, not a string, or blank.
    #[error("missing or empty `text`")]
    EmptyText,
    /// `options` is absent or not an array.
    #[error("`options` is not an array")]
    OptionsNotArray,
    /// `options` has the wrong number of entries.
    #[error("`options` must hold exactly {expected} entries, got {0}", expected = OPTION_COUNT)]
    WrongOptionCount(usize),
    /// An option at the given position is not text.
    #[error("option {0} is not a string")]
    OptionNotText(usize),
    /// `correctAnswer` is absent or not an integer.
    #[error("`correctAnswer` is not an integer")]
    CorrectAnswerNotInteger,
    /// `correctAnswer` does not point at one of the options.
    #[error("`correctAnswer` {0} is outside 0..={max}", max = OPTION_COUNT - 1)]
    CorrectAnswerOutOfRange(i64),
    /// `explanation` is absent, not a string, or blank.
    #[error("missing or empty `explanation`")]
    EmptyExplanation,
}

/// Parse and validate generator output, assigning fresh identifiers to every record.
pub fn parse_batch(raw: &str) -> Result<[QuestionRecord; BATCH_SIZE], ValidationError> {
    let value = parse_document(raw)?;
    let Value::Array(entries) = value else {
        return Err(ValidationError::NotAnArray);
    };

    if entries.len() != BATCH_SIZE {
        return Err(ValidationError::WrongLength(entries.len()));
    }

    let records = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            validate_question(entry)
                .map_err(|reason| ValidationError::InvalidQuestion { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;

    records
        .try_into()
        .map_err(|records: Vec<QuestionRecord>| ValidationError::WrongLength(records.len()))
}

fn parse_document(raw: &str) -> Result<Value, ValidationError> {
    let document_error = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => return Ok(value),
        Err(err) => err.to_string(),
    };

    let Some(span) = first_array_span(raw) else {
        return Err(ValidationError::NoArrayFound { document_error });
    };

    serde_json::from_str::<Value>(span).map_err(|err| ValidationError::Unparseable {
        document_error,
        extracted_error: err.to_string(),
    })
}

/// Locate the first balanced `[...]` span, ignoring brackets inside JSON strings.
fn first_array_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn validate_question(entry: &Value) -> Result<QuestionRecord, QuestionDefect> {
    let object = entry.as_object().ok_or(QuestionDefect::NotAnObject)?;

    let text = non_empty_str(object, "text").ok_or(QuestionDefect::EmptyText)?;

    let options = object
        .get("options")
        .and_then(Value::as_array)
        .ok_or(QuestionDefect::OptionsNotArray)?;
    if options.len() != OPTION_COUNT {
        return Err(QuestionDefect::WrongOptionCount(options.len()));
    }
    let options = options
        .iter()
        .enumerate()
        .map(|(position, option)| {
            option
                .as_str()
                .map(str::to_owned)
                .ok_or(QuestionDefect::OptionNotText(position))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let options: [String; OPTION_COUNT] = options
        .try_into()
        .map_err(|options: Vec<String>| QuestionDefect::WrongOptionCount(options.len()))?;

    let correct = object
        .get("correctAnswer")
        .and_then(Value::as_i64)
        .ok_or(QuestionDefect::CorrectAnswerNotInteger)?;
    let correct_index = u8::try_from(correct)
        .ok()
        .filter(|index| usize::from(*index) < OPTION_COUNT)
        .ok_or(QuestionDefect::CorrectAnswerOutOfRange(correct))?;

    let explanation =
        non_empty_str(object, "explanation").ok_or(QuestionDefect::EmptyExplanation)?;

    Ok(QuestionRecord {
        id: Uuid::new_v4().simple().to_string(),
        text,
        options,
        correct_index,
        explanation,
    })
}

fn non_empty_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
