//! Reference HTTP server library for the labmachine remote state protocol v1.
//!
//! Every path under `/state/` names one state document, stored at
//! `{data_dir}/state/{path}.json`. Writes are compare-and-swap: a `PUT` must
//! carry `X-Labmachine-Expected-Version` matching the stored document's
//! `state.version` (`none` when nothing is stored), and the new document must
//! advance the version by exactly one. Mismatches answer `409` with
//! `{"current": <version or null>}`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

pub const PROTOCOL_VERSION: u32 = 1;

/// File-backed document store. Writers are serialized by an in-process mutex.
pub struct StateDir {
    data_dir: PathBuf,
    token: Option<String>,
    write_lock: Mutex<()>,
}

/// Outcome of a compare-and-swap write.
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Conflict { current: Option<u64> },
    Invalid(String),
}

/// Version of the descriptor inside a state document envelope.
pub fn document_version(data: &[u8]) -> Option<u64> {
    let doc: serde_json::Value = serde_json::from_slice(data).ok()?;
    match doc.get("state")?.get("version") {
        Some(v) => v.as_u64(),
        None => Some(0),
    }
}

/// Map a `/state/...` URL path onto a relative document path.
///
/// Segments are restricted to `[A-Za-z0-9._-]` and may not be `.` or `..`.
pub fn parse_state_route(path: &str) -> Option<PathBuf> {
    let rest = path.split('?').next()?.strip_prefix("/state/")?;
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }
    let mut rel = PathBuf::new();
    for segment in rest.split('/') {
        let valid = !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return None;
        }
        rel.push(segment);
    }
    let mut file_name = rel.file_name()?.to_os_string();
    file_name.push(".json");
    rel.set_file_name(file_name);
    Some(rel)
}

fn write_atomic(dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    fs::File::open(dir)?.sync_all()
}

impl StateDir {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            token: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Require `Authorization: Bearer <token>` on every state request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn doc_path(&self, rel: &Path) -> PathBuf {
        self.data_dir.join("state").join(rel)
    }

    pub fn get(&self, rel: &Path) -> Option<Vec<u8>> {
        fs::read(self.doc_path(rel)).ok()
    }

    pub fn put(
        &self,
        rel: &Path,
        expected: Option<u64>,
        data: &[u8],
    ) -> std::io::Result<PutOutcome> {
        let Some(new_version) = document_version(data) else {
            return Ok(PutOutcome::Invalid("body is not a state document".to_owned()));
        };
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| std::io::Error::other("state write lock poisoned"))?;
        let path = self.doc_path(rel);
        let current = match fs::read(&path) {
            Ok(existing) => Some(document_version(&existing).ok_or_else(|| {
                std::io::Error::other(format!("stored document {} is corrupt", path.display()))
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if current != expected {
            return Ok(PutOutcome::Conflict { current });
        }
        let required = expected.map_or(0, |v| v + 1);
        if new_version != required {
            return Ok(PutOutcome::Invalid(format!(
                "document version {new_version} does not follow {}",
                expected.map_or_else(|| "none".to_owned(), |v| v.to_string())
            )));
        }
        write_atomic(&path, data)?;
        Ok(PutOutcome::Stored)
    }

    pub fn delete(&self, rel: &Path) -> std::io::Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| std::io::Error::other("state write lock poisoned"))?;
        match fs::remove_file(self.doc_path(rel)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn header_value<'a>(req: &'a tiny_http::Request, name: &str) -> Option<&'a str> {
    req.headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, code: u16, json: impl Into<Vec<u8>>) {
    let response = Response::from_data(json.into()).with_status_code(StatusCode(code));
    let response = match Header::from_bytes("Content-Type", "application/json") {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    };
    let _ = req.respond(response);
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn authorized(store: &StateDir, req: &tiny_http::Request) -> bool {
    match &store.token {
        None => true,
        Some(token) => header_value(req, "Authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|given| given == token),
    }
}

fn parse_expected(value: &str) -> Option<Option<u64>> {
    match value.trim() {
        "none" => Some(None),
        other => other.parse().ok().map(Some),
    }
}

fn handle_state(store: &StateDir, mut req: tiny_http::Request, method: &Method, rel: &Path) {
    let name = rel.display();
    match *method {
        Method::Get => match store.get(rel) {
            Some(data) => respond_json(req, 200, data),
            None => respond_err(req, 404, "not found"),
        },
        Method::Put => {
            let Some(expected) =
                header_value(&req, "X-Labmachine-Expected-Version").and_then(parse_expected)
            else {
                respond_err(req, 400, "missing or invalid X-Labmachine-Expected-Version");
                return;
            };
            let Some(body) = read_body(&mut req) else {
                respond_err(req, 500, "read error");
                return;
            };
            match store.put(rel, expected, &body) {
                Ok(PutOutcome::Stored) => {
                    info!("PUT {name}: {} bytes", body.len());
                    respond_json(req, 200, r#"{"status":"ok"}"#);
                }
                Ok(PutOutcome::Conflict { current }) => {
                    warn!("PUT {name}: expected {expected:?}, stored {current:?}");
                    let json = serde_json::json!({ "current": current }).to_string();
                    respond_json(req, 409, json);
                }
                Ok(PutOutcome::Invalid(reason)) => {
                    warn!("PUT {name}: {reason}");
                    respond_err(req, 400, &reason);
                }
                Err(e) => {
                    error!("PUT {name}: {e}");
                    respond_err(req, 500, &format!("write error: {e}"));
                }
            }
        }
        Method::Delete => match store.delete(rel) {
            Ok(true) => {
                info!("DELETE {name}");
                respond_json(req, 200, r#"{"status":"ok"}"#);
            }
            Ok(false) => respond_err(req, 404, "not found"),
            Err(e) => {
                error!("DELETE {name}: {e}");
                respond_err(req, 500, &format!("delete error: {e}"));
            }
        },
        _ => respond_err(req, 405, "method not allowed"),
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &StateDir, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    if url == "/health" && method == Method::Get {
        respond_json(req, 200, r#"{"status":"ok"}"#);
        return;
    }
    if let Some(proto) = header_value(&req, "X-Labmachine-Protocol") {
        if proto.trim() != PROTOCOL_VERSION.to_string() {
            respond_err(req, 400, "unsupported protocol version");
            return;
        }
    }
    let Some(rel) = parse_state_route(&url) else {
        respond_err(req, 404, "not found");
        return;
    };
    if !authorized(store, &req) {
        respond_err(req, 401, "unauthorized");
        return;
    }
    handle_state(store, req, &method, &rel);
}

/// Start the server loop, blocking the current thread.
pub fn run_server(store: &Arc<StateDir>, addr: &str) -> std::io::Result<()> {
    let server = Server::http(addr).map_err(|e| std::io::Error::other(e.to_string()))?;
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
    Ok(())
}

/// A test helper that starts a labmachine-server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}` and stores data in the provided `data_dir`.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    _server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with a temporary data directory.
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(data_dir: PathBuf) -> Self {
        Self::start_with(StateDir::new(data_dir))
    }

    pub fn start_with(store: StateDir) -> Self {
        let data_dir = store.data_dir().to_path_buf();
        fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(store);
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&store, request);
            }
        });

        Self {
            url,
            port,
            data_dir,
            _server: server,
            _handle: handle,
        }
    }

    /// URL of the state document `name` on this server.
    pub fn state_url(&self, name: &str) -> String {
        format!("{}/state/{name}", self.url)
    }
}
