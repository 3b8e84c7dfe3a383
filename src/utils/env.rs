// src/utils/env.rs
use log::{debug, info};
use std::env;
use std::str::FromStr;

/// Loads `.env` into the process environment if one is found.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env file loaded: {}", e),
    }
}

/// Reads and parses an environment variable, falling back to `default` when the
/// variable is unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back() {
        env::remove_var("DEDUPE_TEST_ENV_OR_MISSING");
        assert_eq!(env_or("DEDUPE_TEST_ENV_OR_MISSING", 42usize), 42);

        env::set_var("DEDUPE_TEST_ENV_OR_BAD", "not-a-number");
        assert_eq!(env_or("DEDUPE_TEST_ENV_OR_BAD", 0.5f64), 0.5);
        env::remove_var("DEDUPE_TEST_ENV_OR_BAD");

        env::set_var("DEDUPE_TEST_ENV_OR_OK", " 7 ");
        assert_eq!(env_or("DEDUPE_TEST_ENV_OR_OK", 1u32), 7);
        env::remove_var("DEDUPE_TEST_ENV_OR_OK");
    }
}
