//! Request and response payload definitions for the wasmcell runtime.
//!
//! This module defines the data structures for:
//! - Caller-constructed `do` and `call` requests
//! - The uniform response envelope used at every boundary crossing
//! - The encode-side wire payloads that carry a unit's target address
//!
//! The envelope is the *only* shape that crosses the sandbox boundary back
//! to the host caller or back to the guest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//--------------------------------------------------------------------------------------------------
// Types: Requests
//--------------------------------------------------------------------------------------------------

/// Request payload for the guest's `do` operation.
///
/// Immutable, caller-constructed, single-use per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoRequest {
    /// Name of the guest-side function to run.
    #[serde(rename = "fn")]
    pub fn_name: String,

    /// Opaque payload, typically serialized data for the guest to interpret.
    pub content: String,
}

/// Request payload for the guest's `call` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Name of the guest-side function to run.
    #[serde(rename = "fn")]
    pub fn_name: String,

    /// Opaque payload, typically serialized data for the guest to interpret.
    pub content: String,

    /// Target function to be invoked by the guest.
    pub function: String,

    /// Ordered parameters for the target function.
    pub params: Map<String, Value>,
}

//--------------------------------------------------------------------------------------------------
// Types: Envelope
//--------------------------------------------------------------------------------------------------

/// The uniform `{code, msg, reason, data}` result shape.
///
/// Produced by the guest's own operations and by the network bridge.
/// Invariant: `code >= 400` implies `msg`/`reason` are populated and `data`
/// is absent; `code < 400` implies `data` carries the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Integer status code.
    pub code: u16,

    /// Short status message.
    #[serde(default)]
    pub msg: String,

    /// Diagnostic detail, empty on success.
    #[serde(default)]
    pub reason: String,

    /// Arbitrary payload, absent on failure. Callers must know the expected
    /// shape per target function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

//--------------------------------------------------------------------------------------------------
// Types: Wire Payloads
//--------------------------------------------------------------------------------------------------

/// Encode-side payload for the `do` export, carrying the unit's endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct DoPayload<'a> {
    /// Endpoint address embedded into every request.
    pub addr: &'a str,

    /// Name of the guest-side function to run.
    #[serde(rename = "fn")]
    pub fn_name: &'a str,

    /// Opaque payload.
    pub content: &'a str,
}

/// Encode-side payload for the `call` export, carrying the unit's endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct CallPayload<'a> {
    /// Endpoint address embedded into every request.
    pub addr: &'a str,

    /// Name of the guest-side function to run.
    #[serde(rename = "fn")]
    pub fn_name: &'a str,

    /// Opaque payload.
    pub content: &'a str,

    /// Target function to be invoked by the guest.
    pub function: &'a str,

    /// Ordered parameters for the target function.
    pub params: &'a Map<String, Value>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Envelope {
    /// Create a success envelope carrying the given payload.
    pub fn ok(data: Value) -> Self {
        Self {
            code: 200,
            msg: "ok".to_string(),
            reason: String::new(),
            data: Some(data),
        }
    }

    /// Create a failure envelope with the given status code and reason.
    ///
    /// Codes below 400 are coerced to 500 to preserve the envelope invariant.
    pub fn failure(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: if code >= 400 { code } else { 500 },
            msg: "unknown error".to_string(),
            reason: reason.into(),
            data: None,
        }
    }

    /// Whether this envelope reports an application-level failure.
    pub fn is_failure(&self) -> bool {
        self.code >= 400
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
