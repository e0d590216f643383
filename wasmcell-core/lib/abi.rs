//! Host/guest calling convention for wasmcell.
//!
//! This module handles:
//! - Packing and unpacking the `(offset, length)` pair the guest returns as a
//!   single 64-bit value
//! - Writing request bytes into guest linear memory via the guest's own
//!   allocator
//! - Invoking the guest's exported operations
//! - Reading and decoding result bytes back out of guest memory
//!
//! The packed form (high 32 bits = offset, low 32 bits = length) is an ABI
//! convention of the guest contract; it is converted to and from
//! [`PackedSlice`] only at the exact call boundary. Every failure here is a
//! distinct infrastructure error and none of them corrupt pool state.

use wasmtime::{Instance, Memory, Store};

use wasmcell_utils::{GUEST_MALLOC_EXPORT, GUEST_MEMORY_EXPORT};

use crate::{envelope::Envelope, WasmcellError, WasmcellResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A region of guest linear memory identified by offset and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedSlice {
    /// Byte offset into the guest's linear memory.
    pub offset: u32,

    /// Length of the region in bytes.
    pub len: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PackedSlice {
    /// Unpack from the guest's 64-bit return value.
    pub fn from_packed(packed: u64) -> Self {
        Self {
            offset: (packed >> 32) as u32,
            len: packed as u32,
        }
    }

    /// Pack into the 64-bit form handed across the call boundary.
    pub fn into_packed(self) -> u64 {
        ((self.offset as u64) << 32) | (self.len as u64)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks up the guest's exported linear memory.
pub fn guest_memory<T>(store: &mut Store<T>, instance: &Instance) -> WasmcellResult<Memory> {
    instance
        .get_memory(&mut *store, GUEST_MEMORY_EXPORT)
        .ok_or_else(|| WasmcellError::Invocation {
            export: GUEST_MEMORY_EXPORT.to_string(),
            source: wasmtime::Error::msg("guest does not export a linear memory"),
        })
}

/// Allocates a destination buffer inside the guest and writes `bytes` into it.
///
/// Invokes the guest's exported allocator with the byte length, then writes
/// at the returned offset. Returns the written region.
pub async fn write_guest_bytes<T: Send>(
    store: &mut Store<T>,
    instance: &Instance,
    bytes: &[u8],
) -> WasmcellResult<PackedSlice> {
    let size = bytes.len() as u64;
    let malloc = instance
        .get_typed_func::<u64, u64>(&mut *store, GUEST_MALLOC_EXPORT)
        .map_err(|err| WasmcellError::AllocationFailed {
            size,
            reason: err.to_string(),
        })?;
    let ptr = malloc
        .call_async(&mut *store, size)
        .await
        .map_err(|err| WasmcellError::AllocationFailed {
            size,
            reason: err.to_string(),
        })?;

    let slice = PackedSlice {
        offset: u32::try_from(ptr).map_err(|_| WasmcellError::AllocationFailed {
            size,
            reason: format!("allocator returned offset {ptr} beyond 32-bit memory"),
        })?,
        len: bytes.len() as u32,
    };

    let memory = guest_memory(store, instance)?;
    memory
        .write(&mut *store, slice.offset as usize, bytes)
        .map_err(|_| WasmcellError::MemoryWrite {
            offset: slice.offset,
            len: slice.len,
        })?;
    Ok(slice)
}

/// Invokes a guest export of shape `(ptr: u32, len: u32) -> packed: u64`.
pub async fn invoke_packed<T: Send>(
    store: &mut Store<T>,
    instance: &Instance,
    export: &str,
    input: PackedSlice,
) -> WasmcellResult<PackedSlice> {
    let func = instance
        .get_typed_func::<(u32, u32), u64>(&mut *store, export)
        .map_err(|source| WasmcellError::Invocation {
            export: export.to_string(),
            source,
        })?;
    let packed = func
        .call_async(&mut *store, (input.offset, input.len))
        .await
        .map_err(|source| WasmcellError::Invocation {
            export: export.to_string(),
            source,
        })?;
    Ok(PackedSlice::from_packed(packed))
}

/// Reads the identified region out of the guest's linear memory.
pub async fn read_guest_bytes<T: Send>(
    store: &mut Store<T>,
    instance: &Instance,
    slice: PackedSlice,
) -> WasmcellResult<Vec<u8>> {
    let memory = guest_memory(store, instance)?;
    let mut buf = vec![0u8; slice.len as usize];
    memory
        .read(&mut *store, slice.offset as usize, &mut buf)
        .map_err(|_| WasmcellError::MemoryRead {
            offset: slice.offset,
            len: slice.len,
        })?;
    Ok(buf)
}

/// One full ABI round-trip: write request bytes, invoke the export, read the
/// result bytes back out.
pub async fn round_trip<T: Send>(
    store: &mut Store<T>,
    instance: &Instance,
    export: &str,
    request: &[u8],
) -> WasmcellResult<Vec<u8>> {
    let input = write_guest_bytes(store, instance, request).await?;
    let output = invoke_packed(store, instance, export, input).await?;
    read_guest_bytes(store, instance, output).await
}

/// Deserializes a response envelope from guest result bytes.
pub fn decode_envelope(bytes: &[u8]) -> WasmcellResult<Envelope> {
    serde_json::from_slice(bytes).map_err(WasmcellError::MalformedResult)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DoRequest;
    use crate::testguest;
    use wasmcell_utils::{GUEST_CALL_EXPORT, GUEST_DO_EXPORT};

    #[test]
    fn test_packed_slice_bit_layout() {
        let slice = PackedSlice {
            offset: 0xDEAD_0001,
            len: 0x0000_BEEF,
        };
        let packed = slice.into_packed();
        assert_eq!(packed, 0xDEAD_0001_0000_BEEF);
        assert_eq!(PackedSlice::from_packed(packed), slice);
    }

    #[test]
    fn test_packed_slice_zero() {
        assert_eq!(
            PackedSlice::from_packed(0),
            PackedSlice { offset: 0, len: 0 }
        );
    }

    #[test]
    fn test_decode_envelope_rejects_garbage() {
        let err = decode_envelope(b"not json").unwrap_err();
        assert!(matches!(err, WasmcellError::MalformedResult(_)));
    }

    #[tokio::test]
    async fn test_round_trip_through_echo_guest() {
        let (mut store, instance) = testguest::plain_instance(&testguest::echo_guest()).await;

        let request = DoRequest {
            fn_name: "greet".to_string(),
            content: "hello sandbox".to_string(),
        };
        let encoded = serde_json::to_vec(&request).unwrap();
        let output = round_trip(&mut store, &instance, GUEST_DO_EXPORT, &encoded)
            .await
            .unwrap();

        let back: DoRequest = serde_json::from_slice(&output).unwrap();
        assert_eq!(back.fn_name, "greet");
        assert_eq!(back.content, "hello sandbox");
    }

    #[tokio::test]
    async fn test_round_trip_through_echo_call_export() {
        let (mut store, instance) = testguest::plain_instance(&testguest::echo_guest()).await;

        let output = round_trip(&mut store, &instance, GUEST_CALL_EXPORT, b"raw bytes")
            .await
            .unwrap();
        assert_eq!(output, b"raw bytes");
    }

    #[tokio::test]
    async fn test_invoke_missing_export_is_invocation_error() {
        let (mut store, instance) = testguest::plain_instance(&testguest::echo_guest()).await;

        let err = invoke_packed(
            &mut store,
            &instance,
            "no_such_export",
            PackedSlice { offset: 0, len: 0 },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WasmcellError::Invocation { ref export, .. } if export == "no_such_export"));
    }

    #[tokio::test]
    async fn test_read_out_of_bounds_is_memory_read_error() {
        let (mut store, instance) = testguest::plain_instance(&testguest::echo_guest()).await;

        let err = read_guest_bytes(
            &mut store,
            &instance,
            PackedSlice {
                offset: u32::MAX,
                len: 16,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WasmcellError::MemoryRead { .. }));
    }
}
