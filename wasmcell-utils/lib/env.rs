//! Utility functions for working with environment variables.

use crate::defaults::{DEFAULT_PARALLELISM, DEFAULT_QUOTA_PAGES};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the logical guest endpoint address.
pub const TARGET_ADDR_ENV_VAR: &str = "WASMCELL_TARGET_ADDR";

/// Environment variable for the pool parallelism.
pub const PARALLELISM_ENV_VAR: &str = "WASMCELL_PARALLELISM";

/// Environment variable for the per-unit memory quota in pages.
pub const QUOTA_PAGES_ENV_VAR: &str = "WASMCELL_QUOTA_PAGES";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the target address from the environment, if set.
pub fn get_target_addr() -> Option<String> {
    std::env::var(TARGET_ADDR_ENV_VAR).ok()
}

/// Returns the pool parallelism.
/// If the WASMCELL_PARALLELISM environment variable is set and parses, returns that value.
/// Otherwise, returns the default parallelism.
pub fn get_parallelism() -> usize {
    get_parsed(PARALLELISM_ENV_VAR, DEFAULT_PARALLELISM)
}

/// Returns the per-unit memory quota in 64-KiB pages.
/// If the WASMCELL_QUOTA_PAGES environment variable is set and parses, returns that value.
/// Otherwise, returns the default quota.
pub fn get_quota_pages() -> u64 {
    get_parsed(QUOTA_PAGES_ENV_VAR, DEFAULT_QUOTA_PAGES)
}

fn get_parsed<T: std::str::FromStr + Copy>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {} value: {}", var, raw);
            default
        }),
        Err(_) => default,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
