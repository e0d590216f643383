//! Error types for the wasmcell runtime.
//!
//! Two error layers are kept distinct throughout the crate:
//! - Infrastructure failures (this type): the sandbox machinery or host
//!   plumbing malfunctioned. Surfaced to callers as hard error values.
//! - Application-level outcomes: the guest ran and reported a result. Always
//!   represented as an [`Envelope`](crate::envelope::Envelope) with
//!   `code >= 400`, never as a value of this type.

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a wasmcell operation.
pub type WasmcellResult<T> = Result<T, WasmcellError>;

/// An error that occurred in the wasmcell runtime.
#[derive(Debug, Error)]
pub enum WasmcellError {
    /// An invalid configuration value was supplied.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The sandbox engine could not be set up or the guest module did not compile.
    #[error("engine setup failed: {0}")]
    EngineSetup(#[source] wasmtime::Error),

    /// A fresh guest instance could not be provisioned.
    #[error("unit provisioning failed: {0}")]
    Provision(#[source] wasmtime::Error),

    /// The shared outbound HTTP client could not be built.
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The guest's allocation export failed or returned an unusable pointer.
    #[error("guest allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        /// Number of bytes requested from the guest allocator.
        size: u64,
        /// Why the allocation was rejected.
        reason: String,
    },

    /// A write into guest memory fell outside the guest's current memory size.
    #[error("guest memory write of {len} bytes at offset {offset} out of bounds")]
    MemoryWrite {
        /// Offset the write started at.
        offset: u32,
        /// Number of bytes that were to be written.
        len: u32,
    },

    /// A read from guest memory fell outside the guest's current memory size.
    #[error("guest memory read of {len} bytes at offset {offset} out of bounds")]
    MemoryRead {
        /// Offset the read started at.
        offset: u32,
        /// Number of bytes that were to be read.
        len: u32,
    },

    /// A guest export was missing, had the wrong type, or trapped during execution.
    #[error("invocation of guest export `{export}` failed: {source}")]
    Invocation {
        /// Name of the export that was invoked.
        export: String,
        /// The underlying engine error or trap.
        #[source]
        source: wasmtime::Error,
    },

    /// The request payload could not be serialized for the guest.
    #[error("request encoding failed: {0}")]
    EncodeRequest(#[source] serde_json::Error),

    /// The guest returned bytes that do not decode into a response envelope.
    #[error("malformed result bytes from guest: {0}")]
    MalformedResult(#[source] serde_json::Error),

    /// The pool has been shut down and no longer hands out units.
    #[error("pool is closed")]
    PoolClosed,

    /// The background replenisher stopped; no replacement units can be produced.
    #[error("replenisher is down; pool can no longer replace recycled units")]
    ReplenisherDown,

    /// The caller cancelled the operation while waiting for a unit.
    #[error("cancelled while waiting for an execution unit")]
    Cancelled,
}
