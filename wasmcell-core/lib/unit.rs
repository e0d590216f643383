//! A single sandboxed execution unit.
//!
//! One unit wraps exactly one guest instance plus its identity (the target
//! address it speaks for). A unit is usable by exactly one caller at a time;
//! its linear memory and allocator are not safe for concurrent use. Units are
//! created at pool construction and by the replenishment process, and
//! destroyed when their memory footprint exceeds the pool quota.

use tokio_util::sync::CancellationToken;
use wasmtime::{Engine, Instance, Linker, Module, Store};

use wasmcell_utils::{GUEST_CALL_EXPORT, GUEST_DO_EXPORT, GUEST_INIT_EXPORT};

use crate::{
    abi,
    bridge::HostState,
    envelope::{CallPayload, CallRequest, DoPayload, DoRequest, Envelope},
    WasmcellError, WasmcellResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One guest instance plus the endpoints embedded into its requests.
pub struct ExecutionUnit {
    /// Endpoint address encoded into `do` payloads.
    do_endpoint: String,

    /// Endpoint address encoded into `call` payloads.
    call_endpoint: String,

    /// The unit's private store; owns the guest's linear memory and WASI state.
    store: Store<HostState>,

    /// The instantiated guest.
    instance: Instance,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExecutionUnit {
    /// Provision a fresh unit: new store, new instance, one-time guest
    /// initialization when the guest exports it.
    pub async fn provision(
        engine: &Engine,
        module: &Module,
        linker: &Linker<HostState>,
        http: reqwest::Client,
        target_addr: &str,
    ) -> WasmcellResult<Self> {
        let mut store = Store::new(engine, HostState::new(http));
        let instance = linker
            .instantiate_async(&mut store, module)
            .await
            .map_err(WasmcellError::Provision)?;

        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, GUEST_INIT_EXPORT) {
            init.call_async(&mut store, ())
                .await
                .map_err(WasmcellError::Provision)?;
        }

        tracing::debug!(target_addr, "provisioned execution unit");
        Ok(Self {
            do_endpoint: format!("http://{target_addr}/guest/do"),
            call_endpoint: format!("http://{target_addr}/guest/call"),
            store,
            instance,
        })
    }

    /// Run the guest's `do` operation: one full ABI round-trip.
    ///
    /// The unit is idle again afterward regardless of outcome. Codec failures
    /// propagate as hard errors; guest-reported failures come back as
    /// envelopes with `code >= 400`.
    pub async fn dispatch(
        &mut self,
        request: &DoRequest,
        cancel: &CancellationToken,
    ) -> WasmcellResult<Envelope> {
        let payload = DoPayload {
            addr: &self.do_endpoint,
            fn_name: &request.fn_name,
            content: &request.content,
        };
        let encoded = serde_json::to_vec(&payload).map_err(WasmcellError::EncodeRequest)?;
        self.run(GUEST_DO_EXPORT, &encoded, cancel).await
    }

    /// Run the guest's `call` operation: one full ABI round-trip.
    pub async fn invoke(
        &mut self,
        request: &CallRequest,
        cancel: &CancellationToken,
    ) -> WasmcellResult<Envelope> {
        let payload = CallPayload {
            addr: &self.call_endpoint,
            fn_name: &request.fn_name,
            content: &request.content,
            function: &request.function,
            params: &request.params,
        };
        let encoded = serde_json::to_vec(&payload).map_err(WasmcellError::EncodeRequest)?;
        self.run(GUEST_CALL_EXPORT, &encoded, cancel).await
    }

    /// Current guest memory footprint in whole 64-KiB pages.
    pub fn memory_pages(&mut self) -> WasmcellResult<u64> {
        let memory = abi::guest_memory(&mut self.store, &self.instance)?;
        Ok(memory.size(&self.store))
    }

    async fn run(
        &mut self,
        export: &str,
        encoded: &[u8],
        cancel: &CancellationToken,
    ) -> WasmcellResult<Envelope> {
        self.store.data_mut().set_cancel(cancel.clone());
        let bytes = abi::round_trip(&mut self.store, &self.instance, export, encoded).await?;
        abi::decode_envelope(&bytes)
    }
}
