//! Client-facing entry point for the wasmcell runtime.
//!
//! This module handles:
//! - One-time construction of the process-scoped shared state (engine,
//!   compiled guest module, linker with WASI and the network bridge, tuned
//!   HTTP client)
//! - The public `dispatch`/`invoke` operations backed by the unit pool
//! - Pool teardown
//!
//! The guest's `do` and `call` exports are reserved words in Rust, so the
//! client surfaces them as `dispatch` and `invoke` respectively.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wasmtime::{Engine, Linker, Module};

use crate::{
    bridge::{self, HostState},
    config::PoolConfig,
    envelope::{CallRequest, DoRequest, Envelope},
    pool::{ProvisionUnit, UnitPool},
    unit::ExecutionUnit,
    WasmcellError, WasmcellResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A handle to a pool of sandboxed execution units for one guest binary.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct WasmcellClient {
    /// The bounded unit pool.
    pool: UnitPool,
}

/// Provisions units from the shared engine, module and linker.
struct ModuleProvisioner {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    http: reqwest::Client,
    target_addr: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProvisionUnit for ModuleProvisioner {
    async fn provision(&self) -> WasmcellResult<ExecutionUnit> {
        ExecutionUnit::provision(
            &self.engine,
            &self.module,
            &self.linker,
            self.http.clone(),
            &self.target_addr,
        )
        .await
    }
}

impl WasmcellClient {
    /// Build a client for the given compiled guest binary.
    ///
    /// Sets up the process-scoped shared state once, then provisions all
    /// initial units; construction does not return until every unit exists.
    pub async fn new(wasm: impl AsRef<[u8]>, config: PoolConfig) -> WasmcellResult<Self> {
        config.validate()?;

        let mut engine_config = wasmtime::Config::new();
        engine_config.async_support(true);
        let engine = Engine::new(&engine_config).map_err(WasmcellError::EngineSetup)?;
        let module = Module::new(&engine, wasm).map_err(WasmcellError::EngineSetup)?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |state: &mut HostState| {
            &mut state.wasi
        })
        .map_err(WasmcellError::EngineSetup)?;
        bridge::register(&mut linker)?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.http_max_idle_per_host())
            .build()
            .map_err(WasmcellError::HttpClient)?;

        let factory = Arc::new(ModuleProvisioner {
            engine,
            module,
            linker,
            http,
            target_addr: config.target_addr().clone(),
        });
        let pool = UnitPool::new(factory, config.parallelism(), config.quota_pages()).await?;
        Ok(Self { pool })
    }

    /// Run the guest's `do` operation.
    ///
    /// Returns either a well-formed envelope or an error, never both.
    pub async fn dispatch(&self, request: DoRequest) -> WasmcellResult<Envelope> {
        self.dispatch_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run the guest's `do` operation under the given cancellation token.
    ///
    /// Cancellation aborts an in-flight bridge request and releases a pending
    /// wait for a unit; an already-running guest operation completes first.
    /// The borrowed unit goes back to the pool on every exit path, including
    /// when the returned future is dropped mid-await.
    pub async fn dispatch_with_cancel(
        &self,
        request: DoRequest,
        cancel: CancellationToken,
    ) -> WasmcellResult<Envelope> {
        let mut unit = self.pool.acquire(&cancel).await?;
        unit.dispatch(&request, &cancel).await
    }

    /// Run the guest's `call` operation.
    pub async fn invoke(&self, request: CallRequest) -> WasmcellResult<Envelope> {
        self.invoke_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run the guest's `call` operation under the given cancellation token.
    pub async fn invoke_with_cancel(
        &self,
        request: CallRequest,
        cancel: CancellationToken,
    ) -> WasmcellResult<Envelope> {
        let mut unit = self.pool.acquire(&cancel).await?;
        unit.invoke(&request, &cancel).await
    }

    /// Tear down the pool; in-flight calls finish, new calls fail.
    pub fn close(&self) {
        self.pool.shutdown();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::testguest;

    async fn canned_client(parallelism: usize) -> WasmcellClient {
        let config = PoolConfig::new("guests.test:9000", parallelism, 10).unwrap();
        WasmcellClient::new(testguest::envelope_guest(), config)
            .await
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_dispatch_returns_guest_envelope() {
        let client = canned_client(1).await;
        let envelope = client
            .dispatch(DoRequest {
                fn_name: "greet".to_string(),
                content: "hello".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.msg, "ok");
        assert_eq!(envelope.data, Some(Value::String("done".to_string())));
    }

    #[test_log::test(tokio::test)]
    async fn test_invoke_returns_guest_envelope() {
        let client = canned_client(1).await;
        let mut params = serde_json::Map::new();
        params.insert("limit".to_string(), serde_json::json!(3));
        let envelope = client
            .invoke(CallRequest {
                fn_name: "greet".to_string(),
                content: String::new(),
                function: "list".to_string(),
                params,
            })
            .await
            .unwrap();
        assert_eq!(envelope.code, 200);
    }

    #[test_log::test(tokio::test)]
    async fn test_calls_run_concurrently_up_to_parallelism() {
        let client = Arc::new(canned_client(2).await);
        let mut handles = Vec::new();
        for n in 0..4 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .dispatch(DoRequest {
                        fn_name: "work".to_string(),
                        content: n.to_string(),
                    })
                    .await
            }));
        }
        for handle in handles {
            let envelope = handle.await.unwrap().unwrap();
            assert_eq!(envelope.code, 200);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_close_rejects_new_calls() {
        let client = canned_client(1).await;
        client.close();
        let result = client
            .dispatch(DoRequest {
                fn_name: "greet".to_string(),
                content: String::new(),
            })
            .await;
        assert!(matches!(result, Err(WasmcellError::PoolClosed)));
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_config_rejected_at_construction() {
        let config = PoolConfig::builder()
            .target_addr("")
            .parallelism(1)
            .quota_pages(10)
            .build();
        let result = WasmcellClient::new(testguest::envelope_guest(), config).await;
        assert!(matches!(result, Err(WasmcellError::ConfigError(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_garbage_module_rejected_at_construction() {
        let config = PoolConfig::new("guests.test:9000", 1, 10).unwrap();
        let result = WasmcellClient::new(b"\0asm not a module", config).await;
        assert!(matches!(result, Err(WasmcellError::EngineSetup(_))));
    }
}
