//! Version 1 to 2: module parameters move into the module key space.
//!
//! Version 1 kept `max_text_length` in the shared parameter store, a JSON
//! value under `posts/MaxTextLength`. The value is copied to the params key
//! of the module, or the defaults are written when it is missing. The legacy
//! entry is left untouched.

use super::MigrationContext;
use crate::error::{PostsError, Result};
use crate::posts::keys;
use crate::posts::params::Params;
use crate::storage::{CF_PARAMS, CF_POSTS};
use tracing::info;

/// Key of the legacy max text length inside the `params` column family.
pub const LEGACY_MAX_TEXT_LENGTH_KEY: &[u8] = b"posts/MaxTextLength";

/// Parses the legacy JSON value, which is either a number or a quoted number.
fn parse_legacy_max_text_length(bytes: &[u8]) -> Result<u32> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| PostsError::migration(1, format!("invalid legacy max text length: {}", e)))?;

    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            PostsError::migration(1, format!("invalid legacy max text length: {}", value))
        })
}

pub fn migrate(context: &MigrationContext<'_>) -> Result<usize> {
    let params = match context.db.get_raw(CF_PARAMS, LEGACY_MAX_TEXT_LENGTH_KEY)? {
        Some(bytes) => Params::new(parse_legacy_max_text_length(&bytes)?),
        None => {
            info!("no legacy params found, using defaults");
            Params::default()
        }
    };
    params
        .validate()
        .map_err(|e| PostsError::migration(1, e))?;

    context.db.put(CF_POSTS, keys::PARAMS_KEY, &params)?;
    info!(
        max_text_length = params.max_text_length,
        "moved params into the module key space"
    );
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_and_string() {
        assert_eq!(parse_legacy_max_text_length(b"800").unwrap(), 800);
        assert_eq!(parse_legacy_max_text_length(b"\"42\"").unwrap(), 42);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_legacy_max_text_length(b"true").is_err());
        assert!(parse_legacy_max_text_length(b"-1").is_err());
        assert!(parse_legacy_max_text_length(b"99999999999").is_err());
        assert!(parse_legacy_max_text_length(b"{").is_err());
    }
}
