use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Reads `key`, falling back to `default` when the variable is unset.
pub(crate) fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{key} must be a boolean, got '{raw}'"),
    }
}
