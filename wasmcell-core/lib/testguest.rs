//! WAT guest fixtures shared by the crate's tests.
//!
//! Every fixture satisfies the guest export contract: an exported `memory`,
//! a bump-allocating `malloc(size: u64) -> ptr: u64`, and `do`/`call`
//! exports of shape `(ptr: u32, len: u32) -> packed: u64`.

use std::sync::Arc;

use async_trait::async_trait;
use wasmtime::{Config, Engine, Instance, Linker, Module, Store};

use crate::{
    bridge::{self, HostState},
    pool::ProvisionUnit,
    unit::ExecutionUnit,
    WasmcellResult,
};

/// Byte offset of the canned data segment in the fixtures.
const DATA_OFFSET: u32 = 1024;

/// Start of the bump allocator's heap, above the data segment.
const HEAP_BASE: u32 = 8192;

/// Canned success envelope the non-echo fixtures return.
pub(crate) const CANNED_ENVELOPE: &str = r#"{"code":200,"msg":"ok","reason":"","data":"done"}"#;

fn malloc_func() -> String {
    format!(
        r#"
  (global $heap (mut i32) (i32.const {HEAP_BASE}))
  (func (export "malloc") (param i64) (result i64)
    (local $ptr i32)
    global.get $heap
    local.tee $ptr
    local.get 0
    i32.wrap_i64
    i32.add
    global.set $heap
    local.get $ptr
    i64.extend_i32_u)"#
    )
}

fn packed(offset: u32, len: usize) -> u64 {
    ((offset as u64) << 32) | (len as u64)
}

fn wat_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A guest whose `do`/`call` return their input region unchanged.
pub(crate) fn echo_guest() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
{malloc}
  (func $echo (param i32 i32) (result i64)
    local.get 0
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get 1
    i64.extend_i32_u
    i64.or)
  (export "do" (func $echo))
  (export "call" (func $echo))
  (func (export "_initialize"))
)"#,
        malloc = malloc_func()
    )
}

/// A guest whose `do`/`call` return a canned success envelope.
pub(crate) fn envelope_guest() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (data (i32.const {DATA_OFFSET}) "{data}")
{malloc}
  (func $reply (param i32 i32) (result i64)
    i64.const {packed})
  (export "do" (func $reply))
  (export "call" (func $reply))
)"#,
        data = wat_escape(CANNED_ENVELOPE),
        malloc = malloc_func(),
        packed = packed(DATA_OFFSET, CANNED_ENVELOPE.len()),
    )
}

/// A guest that inflates its memory by `pages` on every `do`/`call`, then
/// returns a canned success envelope.
pub(crate) fn grow_guest(pages: u32) -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (data (i32.const {DATA_OFFSET}) "{data}")
{malloc}
  (func $reply (param i32 i32) (result i64)
    i32.const {pages}
    memory.grow
    drop
    i64.const {packed})
  (export "do" (func $reply))
  (export "call" (func $reply))
)"#,
        data = wat_escape(CANNED_ENVELOPE),
        malloc = malloc_func(),
        packed = packed(DATA_OFFSET, CANNED_ENVELOPE.len()),
    )
}

/// A guest whose `do`/`call` forward a canned request to the `net::post`
/// host import and return the bridge's packed result as-is.
pub(crate) fn bridge_guest(url: &str, header: &[(&str, &str)], body: &str) -> String {
    let mut header_map = serde_json::Map::new();
    for (name, value) in header {
        header_map.insert(name.to_string(), serde_json::json!(value));
    }
    let request = serde_json::json!({
        "url": url,
        "header": header_map,
        "body": body,
    })
    .to_string();
    bridge_guest_raw(&request)
}

/// Like [`bridge_guest`], but forwards an arbitrary (possibly malformed)
/// request payload to the host import.
pub(crate) fn bridge_guest_raw(request: &str) -> String {
    format!(
        r#"(module
  (import "net" "post" (func $post (param i32 i32) (result i64)))
  (memory (export "memory") 1)
  (data (i32.const {DATA_OFFSET}) "{data}")
{malloc}
  (func $forward (param i32 i32) (result i64)
    i32.const {DATA_OFFSET}
    i32.const {len}
    call $post)
  (export "do" (func $forward))
  (export "call" (func $forward))
)"#,
        data = wat_escape(request),
        malloc = malloc_func(),
        len = request.len(),
    )
}

/// An engine configured the way the runtime configures it.
pub(crate) fn async_engine() -> Engine {
    let mut config = Config::new();
    config.async_support(true);
    Engine::new(&config).unwrap()
}

/// Instantiate a fixture against an empty linker, for codec-level tests.
pub(crate) async fn plain_instance(wat: &str) -> (Store<()>, Instance) {
    let engine = async_engine();
    let module = Module::new(&engine, wat).unwrap();
    let linker: Linker<()> = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate_async(&mut store, &module)
        .await
        .unwrap();
    (store, instance)
}

/// Provisions units from a WAT fixture through the full host linker.
pub(crate) struct WatProvisioner {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    http: reqwest::Client,
    target_addr: String,
}

impl WatProvisioner {
    pub(crate) fn new(wat: &str) -> Arc<Self> {
        let engine = async_engine();
        let module = Module::new(&engine, wat).unwrap();
        let mut linker = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |state: &mut HostState| {
            &mut state.wasi
        })
        .unwrap();
        bridge::register(&mut linker).unwrap();
        Arc::new(Self {
            engine,
            module,
            linker,
            http: reqwest::Client::new(),
            target_addr: "guests.test:9000".to_string(),
        })
    }
}

#[async_trait]
impl ProvisionUnit for WatProvisioner {
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

/// A provisioner that always fails, for replenisher-health tests.
pub(crate) struct FailingProvisioner;

#[async_trait]
impl ProvisionUnit for FailingProvisioner {
    async fn provision(&self) -> WasmcellResult<ExecutionUnit> {
        Err(crate::WasmcellError::Provision(wasmtime::Error::msg(
            "fixture provisioner always fails",
        )))
    }
}
