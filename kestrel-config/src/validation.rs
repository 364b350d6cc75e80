//! Custom validation functions for configuration.
//!
//! Shared by every section that takes a time base or a file path.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    static ref TIME_BASE: Option<Regex> =
        Regex::new(r"^\s*(\d+(\.\d*)?|\.\d+)\s*(s|ms|us|ns|ps|fs|Hz|kHz|MHz|GHz)\s*$").ok();
    static ref LOG_FILTER: Option<Regex> = Regex::new(r"^[A-Za-z0-9_:=,.\-]+$").ok();
}

fn pattern(re: &'static Option<Regex>) -> Result<&'static Regex, ValidationError> {
    re.as_ref().ok_or_else(|| ValidationError::new("invalid_regex"))
}

/// Validate that a time base looks like `"1ns"`, `"2.5GHz"` or `"1 ms"`.
///
/// A zero-valued base is rejected here as well; everything else about the
/// value is checked when the simulation parses it.
pub fn validate_time_base(value: &str) -> Result<(), ValidationError> {
    let captures = pattern(&TIME_BASE)?
        .captures(value)
        .ok_or_else(|| ValidationError::new("invalid_time_base"))?;
    let number = captures.get(1).map_or("", |m| m.as_str());
    if number.chars().all(|c| c == '0' || c == '.') {
        return Err(ValidationError::new("zero_time_base"));
    }
    Ok(())
}

/// Validate a tracing filter directive such as `info` or `kestrel_core=debug,warn`.
pub fn validate_log_filter(value: &str) -> Result<(), ValidationError> {
    if pattern(&LOG_FILTER)?.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_filter"))
    }
}

/// Validate that a checkpoint path is not empty and names a file.
pub fn validate_checkpoint_path(path: &str) -> Result<(), ValidationError> {
    if path.trim().is_empty() || path.ends_with('/') {
        return Err(ValidationError::new("invalid_checkpoint_path"));
    }
    Ok(())
}
