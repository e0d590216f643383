//! Default values and fixed names shared across the wasmcell project.

//--------------------------------------------------------------------------------------------------
// Constants: Guest Contract
//--------------------------------------------------------------------------------------------------

/// Name of the guest's exported linear memory.
pub const GUEST_MEMORY_EXPORT: &str = "memory";

/// Name of the guest's exported allocator, `malloc(size: u64) -> ptr: u64`.
pub const GUEST_MALLOC_EXPORT: &str = "malloc";

/// Name of the guest's exported "do" operation, `do(ptr: u32, len: u32) -> packed: u64`.
pub const GUEST_DO_EXPORT: &str = "do";

/// Name of the guest's exported "call" operation, `call(ptr: u32, len: u32) -> packed: u64`.
pub const GUEST_CALL_EXPORT: &str = "call";

/// Name of the guest's optional initialization export, invoked once at instantiation.
pub const GUEST_INIT_EXPORT: &str = "_initialize";

/// Module namespace under which host imports are registered.
pub const HOST_IMPORT_NAMESPACE: &str = "net";

/// Name of the host-provided outbound HTTP import.
pub const HOST_POST_IMPORT: &str = "post";

//--------------------------------------------------------------------------------------------------
// Constants: Sizing
//--------------------------------------------------------------------------------------------------

/// Default number of execution units kept in the pool.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default per-unit memory quota, in 64-KiB pages.
pub const DEFAULT_QUOTA_PAGES: u64 = 160;

/// Default cap on idle HTTP connections kept per host by the shared client.
pub const DEFAULT_HTTP_MAX_IDLE_PER_HOST: usize = 1200;
