//! Parsing helpers shared by the loader.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

fn invalid(key: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    }
}

pub(crate) fn parse_number<T: FromStr>(key: &'static str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "must be a non-negative integer"))
}

pub(crate) fn parse_positive(key: &'static str, value: &str) -> ConfigResult<u64> {
    match parse_number::<u64>(key, value)? {
        0 => Err(invalid(key, value, "must be greater than zero")),
        parsed => Ok(parsed),
    }
}

pub(crate) fn parse_secs(key: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_positive(key, value).map(Duration::from_secs)
}

pub(crate) fn parse_millis(key: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_positive(key, value).map(Duration::from_millis)
}

pub(crate) fn parse_port(key: &'static str, value: &str) -> ConfigResult<u16> {
    match parse_number::<u16>(key, value) {
        Ok(0) | Err(_) => Err(invalid(key, value, "must be between 1 and 65535")),
        Ok(port) => Ok(port),
    }
}

pub(crate) fn parse_bool(key: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "must be a boolean")),
    }
}

pub(crate) fn parse_path(key: &'static str, value: &str) -> ConfigResult<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(key, value, "must not be empty"));
    }
    Ok(PathBuf::from(trimmed))
}

pub(crate) fn parse_path_list(key: &'static str, value: &str) -> ConfigResult<Vec<PathBuf>> {
    let roots: Vec<PathBuf> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(PathBuf::from)
        .collect();
    if roots.is_empty() {
        return Err(invalid(key, value, "must list at least one path"));
    }
    Ok(roots)
}

pub(crate) fn parse_log_format(key: &'static str, value: &str) -> ConfigResult<String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "pretty" | "json" => Ok(normalized),
        _ => Err(invalid(key, value, "must be 'pretty' or 'json'")),
    }
}
