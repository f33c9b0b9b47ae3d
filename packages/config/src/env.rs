// ABOUTME: Environment variable parsing utilities
// ABOUTME: Tolerant parsers that keep defaults and warn when a value is set but unusable

use std::str::FromStr;

/// Parse an environment variable with validation
/// Returns the parsed value if it passes validation, otherwise returns the default
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.trim().parse::<T>() {
            Ok(parsed_value) if validator(parsed_value) => parsed_value,
            Ok(_) => {
                tracing::warn!(
                    "Environment variable {} has invalid value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        // Unset is the expected case
        Err(_) => default,
    }
}

/// First non-empty value among the given variables, in order
pub fn env_string(var_names: &[&str]) -> Option<String> {
    var_names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Boolean flag in the engine's style: "1", "true", "yes" and "on" are set
pub fn env_flag(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
