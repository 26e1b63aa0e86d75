//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// Validates that a display name is non-blank, short and free of control characters.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Quiz Wizard") // Ok
/// validate_display_name("   ")         // Err - blank
/// validate_display_name("tab\there")   // Err - control character
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("display_name_format");
        err.message = Some("Display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}
