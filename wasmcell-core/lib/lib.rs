//! `wasmcell` is a host-side runtime for running untrusted guest code in pooled,
//! memory-sandboxed WebAssembly execution units.
//!
//! # Overview
//!
//! wasmcell manages a fixed-capacity pool of isolated guest instances and
//! dispatches two kinds of calls into them. It handles:
//! - The cross-boundary calling convention between host and guest memory
//! - Bounded pooling with a per-unit memory quota and transparent recycling
//! - Asynchronous pre-warming of replacement units
//! - A host-provided network callback for sandboxed outbound HTTP
//!
//! # Architecture
//!
//! wasmcell consists of several key components:
//!
//! - **ABI codec**: encodes requests into guest linear memory and decodes
//!   packed results back out
//! - **Network bridge**: a host import that performs outbound HTTP on a
//!   guest's behalf and always returns a normalized envelope
//! - **Execution unit**: one guest instance plus its identity, exposing the
//!   `do` and `call` round-trips
//! - **Unit pool**: the bounded ready queue, the single-slot replenishment
//!   buffer, and the quota-triggered swap logic
//!
//! # Modules
//!
//! - [`abi`] - Host/guest calling convention
//! - [`bridge`] - Outbound HTTP host import
//! - [`client`] - Client-facing entry point
//! - [`config`] - Pool configuration and validation
//! - [`envelope`] - Request and response payload types
//! - [`pool`] - Bounded unit pool with quota recycling
//! - [`unit`] - Single sandboxed execution unit

#![warn(missing_docs)]

mod error;

#[cfg(test)]
pub(crate) mod testguest;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod abi;
pub mod bridge;
pub mod client;
pub mod config;
pub mod envelope;
pub mod pool;
pub mod unit;

pub use error::*;
