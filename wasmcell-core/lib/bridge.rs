//! Outbound HTTP host import for sandboxed guests.
//!
//! This module handles:
//! - The per-unit host state stored inside each guest's store
//! - Registration of the `net::post` import reachable from every guest
//! - Turning a guest's "make an HTTP request" call into a real network
//!   request through the shared connection-pooled client
//!
//! Policy: every handled failure (malformed input, unreachable host,
//! transport error, remote status >= 400) degrades to a normal, inspectable
//! envelope written back into the calling guest's memory. The bridge performs
//! no implicit retries; retry policy belongs to the guest.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wasmtime::{Caller, Extern, Linker};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

use wasmcell_utils::{
    GUEST_MALLOC_EXPORT, GUEST_MEMORY_EXPORT, HOST_IMPORT_NAMESPACE, HOST_POST_IMPORT,
};

use crate::{abi::PackedSlice, envelope::Envelope, WasmcellError, WasmcellResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Host-side state carried by every execution unit's store.
pub struct HostState {
    /// WASI context backing the guest's system interface.
    pub(crate) wasi: WasiP1Ctx,

    /// Shared outbound HTTP client; safe for concurrent use across units.
    http: reqwest::Client,

    /// Cancellation token for the call currently running in this unit.
    cancel: CancellationToken,
}

/// Request shape a guest hands to the `post` import.
#[derive(Debug, Deserialize)]
struct PostRequest {
    /// Target URL for the outbound POST.
    url: String,

    /// Header fields to set on the request.
    #[serde(default)]
    header: HashMap<String, String>,

    /// Request body.
    #[serde(default)]
    body: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostState {
    /// Create host state for a fresh unit, sharing the given HTTP client.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            wasi: WasiCtxBuilder::new().inherit_stderr().build_p1(),
            http,
            cancel: CancellationToken::new(),
        }
    }

    /// Install the cancellation token for the next call.
    pub fn set_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Registers the `net::post` host import into the given linker.
pub fn register(linker: &mut Linker<HostState>) -> WasmcellResult<()> {
    linker
        .func_wrap_async(
            HOST_IMPORT_NAMESPACE,
            HOST_POST_IMPORT,
            |mut caller: Caller<'_, HostState>, (ptr, len): (u32, u32)| {
                Box::new(async move {
                    let envelope = handle_post(&mut caller, ptr, len).await;
                    write_envelope(&mut caller, &envelope).await
                })
            },
        )
        .map_err(WasmcellError::EngineSetup)?;
    Ok(())
}

/// Performs the outbound POST on the guest's behalf, normalizing every
/// handled failure into an envelope.
async fn handle_post(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Envelope {
    let Some(Extern::Memory(memory)) = caller.get_export(GUEST_MEMORY_EXPORT) else {
        return Envelope::failure(500, "guest does not export a linear memory");
    };

    let mut raw = vec![0u8; len as usize];
    if memory.read(&mut *caller, ptr as usize, &mut raw).is_err() {
        return Envelope::failure(500, "read failed");
    }

    let request: PostRequest = match serde_json::from_slice(&raw) {
        Ok(request) => request,
        Err(err) => return Envelope::failure(500, err.to_string()),
    };

    let mut builder = caller.data().http.post(&request.url);
    for (name, value) in &request.header {
        builder = builder.header(name, value);
    }
    builder = builder.body(request.body);

    let cancel = caller.data().cancel.clone();
    let response = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(url = %request.url, "outbound request cancelled");
            return Envelope::failure(500, "request cancelled");
        }
        response = builder.send() => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(url = %request.url, error = %err, "outbound request failed");
            return Envelope::failure(500, err.to_string());
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return Envelope::failure(500, err.to_string()),
    };

    if status.as_u16() >= 400 {
        return Envelope::failure(status.as_u16(), body);
    }

    // Hand structured bodies back as structured data; anything else stays a
    // plain string the guest can interpret itself.
    let data = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
    Envelope::ok(data)
}

/// Writes the envelope into the calling guest's memory via its own allocator
/// and returns the packed `(offset, length)` result.
///
/// Failing to place the *response* cannot itself be reported as an envelope;
/// it traps the invocation and surfaces as an infrastructure error.
async fn write_envelope(
    caller: &mut Caller<'_, HostState>,
    envelope: &Envelope,
) -> wasmtime::Result<u64> {
    let content = serde_json::to_vec(envelope)?;

    let malloc = caller
        .get_export(GUEST_MALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export an allocator"))?
        .typed::<u64, u64>(&mut *caller)?;
    let offset = malloc.call_async(&mut *caller, content.len() as u64).await?;

    let memory = caller
        .get_export(GUEST_MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export a linear memory"))?;
    memory.write(&mut *caller, offset as usize, &content)?;

    let slice = PackedSlice {
        offset: u32::try_from(offset)?,
        len: content.len() as u32,
    };
    Ok(slice.into_packed())
}
