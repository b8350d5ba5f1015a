use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("invalid selection '{0}'")]
    InvalidSelection(String),
    #[error("no valid selection")]
    NoValidSelection,
}

/// Strict single pick: exactly one integer literal in `[1, len]`.
///
/// A bad single pick cannot be partially honored, so anything else is an
/// error and the caller aborts before taking any action.
pub fn resolve_single(input: &str, len: usize) -> Result<usize, SelectError> {
    let trimmed = input.trim();
    match trimmed.parse::<usize>() {
        Ok(choice) if (1..=len).contains(&choice) => Ok(choice),
        _ => Err(SelectError::InvalidSelection(trimmed.to_string())),
    }
}

/// Forgiving multi pick: comma-separated tokens, keeping those that parse to
/// an in-range integer and silently dropping the rest. First occurrence wins
/// on duplicates. Fails only when nothing valid remains.
pub fn resolve_multi(input: &str, len: usize) -> Result<Vec<usize>, SelectError> {
    let mut picks = Vec::new();
    for token in input.split(',') {
        let token = token.trim();
        if let Ok(choice) = token.parse::<usize>() {
            if (1..=len).contains(&choice) && !picks.contains(&choice) {
                picks.push(choice);
            }
        }
    }
    if picks.is_empty() {
        Err(SelectError::NoValidSelection)
    } else {
        Ok(picks)
    }
}
