//! Short-term conversation history.

use tl_domain::error::{Error, Result};
use tl_domain::tool::{Message, Role};

pub const INVALID_HISTORY: &str =
    "conversation history must contain complete user/assistant rounds";

/// History must be whole `[user, assistant]` rounds.
pub fn validate_history(history: &[Message]) -> Result<()> {
    if history.len() % 2 != 0 {
        return Err(Error::InvalidHistory(INVALID_HISTORY.into()));
    }
    let well_formed = history
        .chunks(2)
        .all(|round| round[0].role == Role::User && round[1].role == Role::Assistant);
    if !well_formed {
        return Err(Error::InvalidHistory(INVALID_HISTORY.into()));
    }
    Ok(())
}

/// Keep the newest `max_rounds` rounds, then drop the oldest rounds while
/// `count` reports more than `max_tokens`. Expects validated history.
pub fn trim_history<F>(history: &[Message], max_rounds: usize, max_tokens: u32, count: F) -> Vec<Message>
where
    F: Fn(&[Message]) -> u32,
{
    let keep = (max_rounds * 2).min(history.len());
    let mut start = history.len() - keep;
    while start < history.len() && count(&history[start..]) > max_tokens {
        start += 2;
    }
    history[start..].to_vec()
}
