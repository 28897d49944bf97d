#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use http_body::Frame;
use parking_lot::Mutex;
use sourcebridge::{
    BoxError, Bridge, Capability, HostState, HttpBodyStream, HttpRequest, HttpResponse,
    Interpreter, MemorySettingsStore, Registrar, Result, SourceConfig,
    host::Host,
};
use wasmtime::Caller;

pub const SOURCE_KEY: &str = "test.source";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Escape bytes for a WAT string literal.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{b:02x}")).collect()
}

/// Result buffer carrying `payload`.
pub fn framed(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len() + 8).expect("len");
    let mut buf = len.to_le_bytes().to_vec();
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(payload);
    buf
}

/// Result buffer carrying an error message.
pub fn message(text: &str) -> Vec<u8> {
    let len = u32::try_from(text.len() + 12).expect("len");
    let mut buf = u32::MAX.to_le_bytes().to_vec();
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(text.as_bytes());
    buf
}

const REQUIRED: [(&str, &str); 3] = [
    ("get_search_manga_list", "(param i32 i32 i32) (result i32)"),
    ("get_manga_update", "(param i32 i32 i32) (result i32)"),
    ("get_page_list", "(param i32 i32) (result i32)"),
];

/// Assembles a guest module in text format.
///
/// Required exports the test does not define are stubbed to return -2, and
/// `free_result` reports every pointer to the `test.freed` import.
#[derive(Default)]
pub struct Guest {
    imports: Vec<String>,
    items: Vec<String>,
    omit: Vec<&'static str>,
}

impl Guest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import(mut self, wat: &str) -> Self {
        self.imports.push(wat.to_string());
        self
    }

    pub fn item(mut self, wat: &str) -> Self {
        self.items.push(wat.to_string());
        self
    }

    pub fn data(self, offset: u32, bytes: &[u8]) -> Self {
        let item = format!("(data (i32.const {offset}) \"{}\")", hex(bytes));
        self.item(&item)
    }

    pub fn result(self, offset: u32, payload: &[u8]) -> Self {
        self.data(offset, &framed(payload))
    }

    pub fn omit(mut self, export: &'static str) -> Self {
        self.omit.push(export);
        self
    }

    fn defines(&self, export: &str) -> bool {
        let needle = format!("(export \"{export}\")");
        self.items.iter().any(|item| item.contains(&needle))
    }

    pub fn build(&self) -> String {
        let mut wat = String::from("(module\n");
        wat.push_str("  (import \"test\" \"freed\" (func $freed (param i32)))\n");
        for import in &self.imports {
            wat.push_str(&format!("  {import}\n"));
        }
        wat.push_str("  (memory (export \"memory\") 1)\n");
        wat.push_str(
            "  (func (export \"free_result\") (param i32) (call $freed (local.get 0)))\n",
        );
        if !self.defines("start") {
            wat.push_str("  (func (export \"start\"))\n");
        }
        for (name, signature) in REQUIRED {
            if !self.defines(name) && !self.omit.contains(&name) {
                wat.push_str(&format!(
                    "  (func (export \"{name}\") {signature} (i32.const -2))\n"
                ));
            }
        }
        for item in &self.items {
            wat.push_str(&format!("  {item}\n"));
        }
        wat.push(')');
        wat
    }
}

/// Records pointers passed to the guest's `free_result`.
#[derive(Clone, Default)]
pub struct FreeLog(pub Arc<Mutex<Vec<i32>>>);

impl FreeLog {
    pub fn take(&self) -> Vec<i32> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Capability for FreeLog {
    fn namespace(&self) -> &'static str {
        "test"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        let log = Arc::clone(&self.0);
        registrar.func("freed", move |_: Caller<'_, HostState>, ptr: i32| {
            log.lock().push(ptr);
        });
    }
}

#[derive(Clone)]
struct Route {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: Bytes,
}

/// Host answering from a fixed route table.
#[derive(Clone, Default)]
pub struct ScriptedHost {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    pub requests: Arc<Mutex<Vec<HttpRequest>>>,
    pub printed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHost {
    pub fn route(&self, uri: &str, status: u16, body: &[u8]) -> &Self {
        self.route_with_headers(uri, status, &[], body)
    }

    pub fn route_with_headers(
        &self,
        uri: &str,
        status: u16,
        headers: &[(&'static str, &'static str)],
        body: &[u8],
    ) -> &Self {
        self.routes.lock().insert(
            uri.to_string(),
            Route {
                status,
                headers: headers.to_vec(),
                body: Bytes::copy_from_slice(body),
            },
        );
        self
    }
}

#[async_trait::async_trait]
impl Host for ScriptedHost {
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError> {
        self.requests.lock().push(req.clone());
        let uri = req.uri.to_string();
        let Some(route) = self.routes.lock().get(&uri).cloned() else {
            return Err(std::io::Error::other(format!("unexpected uri: {uri}")).into());
        };
        let body: HttpBodyStream = Box::pin(futures::stream::once(async move {
            Ok::<_, BoxError>(Frame::data(route.body))
        }));
        let mut response = http::Response::builder().status(route.status);
        for (name, value) in route.headers {
            response = response.header(name, value);
        }
        Ok(response.body(body)?)
    }

    fn print(&self, message: &str) {
        self.printed.lock().push(message.to_string());
    }
}

/// Runs interpreters on the test thread with a runtime for bridged work.
pub struct Harness {
    pub runtime: tokio::runtime::Runtime,
    pub host: ScriptedHost,
    pub frees: FreeLog,
    pub settings: Arc<MemorySettingsStore>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            runtime: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime"),
            host: ScriptedHost::default(),
            frees: FreeLog::default(),
            settings: Arc::new(MemorySettingsStore::new()),
        }
    }

    pub fn config(&self) -> SourceConfig {
        SourceConfig::new(SOURCE_KEY)
            .settings(self.settings.clone())
            .capability(self.frees.clone())
    }

    pub fn load(&self, guest: &Guest) -> Result<Interpreter> {
        self.load_with(guest, self.config())
    }

    pub fn load_with(&self, guest: &Guest, config: SourceConfig) -> Result<Interpreter> {
        Interpreter::load(
            guest.build(),
            Arc::new(self.host.clone()),
            &config,
            Bridge::new(self.runtime.handle().clone()),
        )
    }
}
