//! Environment variable helpers
//!
//! Parse `SPINDLE_*` overrides with a typed default.
//!
//! ```ignore
//! use spindle_core::env::{env_get, env_get_millis};
//!
//! let batch: usize = env_get("SPINDLE_TASK_BATCH", 1024);
//! let interval = env_get_millis("SPINDLE_TIMER_INTERVAL_MS", 3000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get an environment variable parsed as `T`, or `default` when unset or
/// unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    parse_or(std::env::var(key).ok().as_deref(), default)
}

/// Parse `value` (trimmed) as `T`, or `default` when absent or unparsable.
#[inline]
pub fn parse_or<T>(value: Option<&str>, default: T) -> T
where
    T: FromStr,
{
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Get an environment variable as a boolean.
///
/// "1", "true", "yes", "on" (any case) are true; any other value is false.
/// Unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Millisecond count read from the environment as a `Duration`.
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__SPINDLE_UNSET_VAR__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_set_and_invalid() {
        std::env::set_var("__SPINDLE_TEST_NUM__", " 123 ");
        let val: usize = env_get("__SPINDLE_TEST_NUM__", 0);
        assert_eq!(val, 123);

        std::env::set_var("__SPINDLE_TEST_NUM__", "many");
        let val: usize = env_get("__SPINDLE_TEST_NUM__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__SPINDLE_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        assert!(env_get_bool("__SPINDLE_UNSET_BOOL__", true));

        for truthy in ["1", "true", "YES", "on"] {
            std::env::set_var("__SPINDLE_TEST_BOOL__", truthy);
            assert!(env_get_bool("__SPINDLE_TEST_BOOL__", false), "{truthy}");
        }
        for falsy in ["0", "off", "garbage"] {
            std::env::set_var("__SPINDLE_TEST_BOOL__", falsy);
            assert!(!env_get_bool("__SPINDLE_TEST_BOOL__", true), "{falsy}");
        }
        std::env::remove_var("__SPINDLE_TEST_BOOL__");
    }

    #[test]
    fn test_parse_or() {
        assert_eq!(parse_or(Some(" 9 "), 1usize), 9);
        assert_eq!(parse_or(Some("nine"), 1usize), 1);
        assert_eq!(parse_or::<u64>(None, 5), 5);
    }

    #[test]
    fn test_env_get_millis() {
        assert_eq!(
            env_get_millis("__SPINDLE_UNSET_MS__", 250),
            Duration::from_millis(250)
        );
    }
}
