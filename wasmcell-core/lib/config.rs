//! Configuration for the wasmcell runtime.
//!
//! This module handles:
//! - Pool construction parameters and their validation
//! - Environment-based configuration loading
//! - Peripheral tuning of the shared outbound HTTP client

use getset::{CopyGetters, Getters};
use typed_builder::TypedBuilder;

use wasmcell_utils::{env, DEFAULT_HTTP_MAX_IDLE_PER_HOST};

use crate::{WasmcellError, WasmcellResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration for a unit pool.
#[derive(Debug, Clone, Getters, CopyGetters, TypedBuilder)]
pub struct PoolConfig {
    /// Logical guest endpoint address embedded into every request.
    #[getset(get = "pub")]
    #[builder(setter(into))]
    target_addr: String,

    /// Pool capacity: number of execution units kept ready.
    #[getset(get_copy = "pub")]
    parallelism: usize,

    /// Per-unit memory quota in 64-KiB pages.
    #[getset(get_copy = "pub")]
    quota_pages: u64,

    /// Cap on idle HTTP connections kept per host by the shared client.
    #[getset(get_copy = "pub")]
    #[builder(default = DEFAULT_HTTP_MAX_IDLE_PER_HOST)]
    http_max_idle_per_host: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PoolConfig {
    /// Create a validated configuration.
    pub fn new(
        target_addr: impl Into<String>,
        parallelism: usize,
        quota_pages: u64,
    ) -> WasmcellResult<Self> {
        let config = Self::builder()
            .target_addr(target_addr)
            .parallelism(parallelism)
            .quota_pages(quota_pages)
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment.
    ///
    /// Reads `WASMCELL_TARGET_ADDR`, `WASMCELL_PARALLELISM` and
    /// `WASMCELL_QUOTA_PAGES`, falling back to defaults for the latter two.
    pub fn from_env() -> WasmcellResult<Self> {
        dotenvy::dotenv().ok();
        let target_addr = env::get_target_addr().ok_or_else(|| {
            WasmcellError::ConfigError(format!("{} is not set", env::TARGET_ADDR_ENV_VAR))
        })?;
        Self::new(target_addr, env::get_parallelism(), env::get_quota_pages())
    }

    /// Check the invariants the pool relies on.
    pub fn validate(&self) -> WasmcellResult<()> {
        if self.target_addr.is_empty() {
            return Err(WasmcellError::ConfigError(
                "target address must not be empty".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(WasmcellError::ConfigError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.quota_pages < 1 {
            return Err(WasmcellError::ConfigError(
                "memory quota must be at least 1 page".to_string(),
            ));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
