//! Lab state stored as an object in Google Cloud Storage.
//!
//! Uses the JSON API with a bearer token:
//! - `GET    {api}/storage/v1/b/{bucket}/o/{object}?alt=media`
//! - `POST   {api}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={object}&ifGenerationMatch={g}`
//! - `DELETE {api}/storage/v1/b/{bucket}/o/{object}`
//!
//! The swap is guarded by the object generation: the upload only succeeds
//! while the object is still at the generation that was read, and
//! `ifGenerationMatch=0` only succeeds while no object exists.

use labmachine_store::{check_expected_version, peek_version, StateBackend, StoreError};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

pub const GCS_API: &str = "https://storage.googleapis.com";

/// Overrides the API base URL, as Google's client libraries do for emulators.
pub const EMULATOR_ENV: &str = "STORAGE_EMULATOR_HOST";

/// Checked in order for the OAuth access token.
pub const TOKEN_ENVS: [&str; 2] = ["LABMACHINE_GCE_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub object: String,
    pub token: Option<String>,
    pub api: String,
}

impl GcsConfig {
    pub fn new(bucket: &str, object: &str) -> Self {
        Self {
            bucket: bucket.to_owned(),
            object: object.to_owned(),
            token: None,
            api: GCS_API.to_owned(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_api(mut self, api: &str) -> Self {
        self.api = api.trim_end_matches('/').to_owned();
        self
    }

    /// Config for `gs://bucket/object`, with the token and endpoint from the environment.
    pub fn from_env(bucket: &str, object: &str) -> Self {
        let env = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::new(bucket, object);
        if let Some(token) = TOKEN_ENVS.iter().find_map(|name| env(name)) {
            config = config.with_token(&token);
        }
        if let Some(host) = env(EMULATOR_ENV) {
            config = config.with_api(&host);
        }
        config
    }
}

/// Percent-encode an object name for use as a single path segment.
fn encode_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// The stored document and the object generation it was read at.
struct Stored {
    data: Vec<u8>,
    generation: u64,
}

pub struct GcsBackend {
    config: GcsConfig,
    agent: ureq::Agent,
}

impl GcsBackend {
    pub fn new(config: GcsConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            config,
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }

    fn locator(&self) -> String {
        format!("gs://{}/{}", self.config.bucket, self.config.object)
    }

    fn bucket_url(&self) -> String {
        format!("{}/storage/v1/b/{}", self.config.api, self.config.bucket)
    }

    fn object_url(&self) -> String {
        format!("{}/o/{}", self.bucket_url(), encode_segment(&self.config.object))
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config.api, self.config.bucket
        )
    }

    fn with_auth<B>(&self, req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match &self.config.token {
            Some(token) => req.header("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    fn request_error(&self, method: &str, err: &ureq::Error) -> StoreError {
        StoreError::Remote(format!("{method} {}: {err}", self.locator()))
    }

    /// Outside an object read, a `404` means the bucket is missing.
    fn status_error(&self, method: &str, code: u16) -> StoreError {
        match code {
            401 | 403 => StoreError::Forbidden(self.locator()),
            404 => StoreError::BucketNotFound(self.config.bucket.clone()),
            _ => StoreError::Remote(format!("{method} {}: HTTP {code}", self.locator())),
        }
    }

    fn bucket_exists(&self) -> Result<bool, StoreError> {
        let url = self.bucket_url();
        debug!("GET {url}");
        let resp = self
            .with_auth(self.agent.get(&url))
            .call()
            .map_err(|e| self.request_error("GET", &e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            code => Err(self.status_error("GET", code)),
        }
    }

    /// An object 404 is an absent document only if the bucket is there.
    fn object_missing(&self) -> Result<(), StoreError> {
        if self.bucket_exists()? {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(self.config.bucket.clone()))
        }
    }

    fn fetch(&self) -> Result<Option<Stored>, StoreError> {
        let url = self.object_url();
        debug!("GET {url}");
        let resp = self
            .with_auth(self.agent.get(&url))
            .query("alt", "media")
            .call()
            .map_err(|e| self.request_error("GET", &e))?;
        match resp.status().as_u16() {
            200 => {
                let generation = resp
                    .headers()
                    .get("x-goog-generation")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| {
                        StoreError::Remote(format!(
                            "GET {}: response carries no object generation",
                            self.locator()
                        ))
                    })?;
                let mut data = Vec::new();
                resp.into_body()
                    .into_reader()
                    .read_to_end(&mut data)
                    .map_err(|e| StoreError::Remote(format!("GET {}: {e}", self.locator())))?;
                Ok(Some(Stored { data, generation }))
            }
            404 => {
                self.object_missing()?;
                Ok(None)
            }
            code => Err(self.status_error("GET", code)),
        }
    }

    fn stored_version(stored: Option<&Stored>) -> Result<Option<u64>, StoreError> {
        stored.map(|s| peek_version(&s.data)).transpose()
    }
}

impl StateBackend for GcsBackend {
    fn describe(&self) -> String {
        self.locator()
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.fetch()?.map(|stored| stored.data))
    }

    fn compare_and_swap(&self, expected: Option<u64>, data: &[u8]) -> Result<(), StoreError> {
        let locator = self.locator();
        let stored = self.fetch()?;
        check_expected_version(&locator, expected, Self::stored_version(stored.as_ref())?)?;
        let generation = stored.map_or(0, |s| s.generation);

        let url = self.upload_url();
        debug!(
            "POST {url} ({} bytes, if generation {generation})",
            data.len()
        );
        let resp = self
            .with_auth(self.agent.post(&url))
            .query("uploadType", "media")
            .query("name", &self.config.object)
            .query("ifGenerationMatch", generation.to_string())
            .header("Content-Type", "application/json")
            .send(data)
            .map_err(|e| self.request_error("POST", &e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(()),
            412 => {
                // another writer got in between the read and the upload
                let now = Self::stored_version(self.fetch()?.as_ref())?;
                check_expected_version(&locator, expected, now)?;
                Err(StoreError::Remote(format!(
                    "POST {locator}: object changed during write, retry"
                )))
            }
            code => Err(self.status_error("POST", code)),
        }
    }

    fn remove(&self) -> Result<bool, StoreError> {
        let url = self.object_url();
        debug!("DELETE {url}");
        let resp = self
            .with_auth(self.agent.delete(&url))
            .call()
            .map_err(|e| self.request_error("DELETE", &e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => {
                self.object_missing()?;
                Ok(false)
            }
            code => Err(self.status_error("DELETE", code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labmachine_schema::LabState;
    use labmachine_store::{encode_state, StateStore};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tiny_http::{Header, Method, Response, Server, StatusCode};

    #[derive(Debug, Default)]
    struct Bucket {
        object: Option<(Vec<u8>, u64)>,
        next_generation: u64,
        /// Stored by another client just before the next upload is evaluated.
        racing_write: Option<Vec<u8>>,
    }

    /// In-memory Cloud Storage holding one bucket named `labs`.
    struct FakeGcs {
        url: String,
        bucket: Arc<Mutex<Bucket>>,
        seen: Arc<Mutex<Vec<String>>>,
        _handle: std::thread::JoinHandle<()>,
    }

    fn query(url: &str) -> HashMap<String, String> {
        url.split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default()
            .split('&')
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    fn error(code: u16) -> Response<std::io::Cursor<Vec<u8>>> {
        let body = format!(r#"{{"error":{{"code":{code},"message":"fake"}}}}"#);
        Response::from_data(body.into_bytes()).with_status_code(StatusCode(code))
    }

    impl FakeGcs {
        fn start(forbidden: bool) -> Self {
            let server = Server::http("127.0.0.1:0").unwrap();
            let port = server.server_addr().to_ip().unwrap().port();
            let bucket = Arc::new(Mutex::new(Bucket {
                next_generation: 1,
                ..Bucket::default()
            }));
            let seen = Arc::new(Mutex::new(Vec::new()));
            let (b, s) = (Arc::clone(&bucket), Arc::clone(&seen));
            let handle = std::thread::spawn(move || {
                for mut req in server.incoming_requests() {
                    let url = req.url().to_owned();
                    let path = url.split('?').next().unwrap_or_default().to_owned();
                    let auth = req
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Authorization"))
                        .map(|h| h.value.as_str().to_owned());
                    s.lock()
                        .unwrap()
                        .push(format!("{} {url} {}", req.method(), auth.unwrap_or_default()));
                    if forbidden {
                        let _ = req.respond(error(403));
                        continue;
                    }
                    let method = req.method().clone();
                    let mut state = b.lock().unwrap();
                    let response = match (&method, path.as_str()) {
                        (Method::Get, "/storage/v1/b/labs") => {
                            Response::from_data(br#"{"name":"labs"}"#.to_vec())
                        }
                        (Method::Get, "/storage/v1/b/labs/o/team%2Fdemo.json") => {
                            match &state.object {
                                Some((data, generation)) => Response::from_data(data.clone())
                                    .with_header(
                                        Header::from_bytes(
                                            "x-goog-generation",
                                            generation.to_string(),
                                        )
                                        .unwrap(),
                                    ),
                                None => error(404),
                            }
                        }
                        (Method::Post, "/upload/storage/v1/b/labs/o") => {
                            let q = query(&url);
                            assert_eq!(q["name"].replace("%2F", "/"), "team/demo.json");
                            if let Some(data) = state.racing_write.take() {
                                let generation = state.next_generation;
                                state.next_generation += 1;
                                state.object = Some((data, generation));
                            }
                            let wanted: u64 = q["ifGenerationMatch"].parse().unwrap();
                            let current = state.object.as_ref().map_or(0, |(_, g)| *g);
                            if wanted == current {
                                let mut body = Vec::new();
                                req.as_reader().read_to_end(&mut body).unwrap();
                                let generation = state.next_generation;
                                state.next_generation += 1;
                                state.object = Some((body, generation));
                                Response::from_data(
                                    format!(r#"{{"generation":"{generation}"}}"#).into_bytes(),
                                )
                            } else {
                                error(412)
                            }
                        }
                        (Method::Delete, "/storage/v1/b/labs/o/team%2Fdemo.json") => {
                            if state.object.take().is_some() {
                                Response::from_data(Vec::new()).with_status_code(StatusCode(204))
                            } else {
                                error(404)
                            }
                        }
                        _ => error(404),
                    };
                    drop(state);
                    let _ = req.respond(response);
                }
            });
            Self {
                url: format!("http://127.0.0.1:{port}"),
                bucket,
                seen,
                _handle: handle,
            }
        }

        fn backend(&self, bucket: &str) -> GcsBackend {
            GcsBackend::new(
                GcsConfig::new(bucket, "team/demo.json")
                    .with_token("tok")
                    .with_api(&self.url),
            )
        }
    }

    fn doc(version: u64) -> Vec<u8> {
        let mut state = LabState::new("demo", "gce", "gce", None, "zone-1");
        state.version = version;
        encode_state(&state).unwrap()
    }

    #[test]
    fn object_name_is_one_path_segment() {
        assert_eq!(encode_segment("team/demo.json"), "team%2Fdemo.json");
        assert_eq!(encode_segment("a b~c"), "a%20b~c");
    }

    #[test]
    fn create_update_and_conflicts() {
        let gcs = FakeGcs::start(false);
        let backend = gcs.backend("labs");
        assert!(backend.load().unwrap().is_none());

        backend.compare_and_swap(None, &doc(0)).unwrap();
        assert!(matches!(
            backend.compare_and_swap(None, &doc(0)),
            Err(StoreError::AlreadyExists(_))
        ));
        backend.compare_and_swap(Some(0), &doc(1)).unwrap();
        assert!(matches!(
            backend.compare_and_swap(Some(0), &doc(1)),
            Err(StoreError::StaleWrite {
                expected: 0,
                found: 1,
                ..
            })
        ));
        assert_eq!(backend.load().unwrap().unwrap(), doc(1));

        let seen = gcs.seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|r| r.starts_with("POST") && r.contains("ifGenerationMatch=0")));
        assert!(seen.iter().all(|r| r.ends_with("Bearer tok")));
    }

    #[test]
    fn write_racing_another_writer_is_stale() {
        let gcs = FakeGcs::start(false);
        let backend = gcs.backend("labs");
        backend.compare_and_swap(None, &doc(0)).unwrap();
        gcs.bucket.lock().unwrap().racing_write = Some(doc(1));

        assert!(matches!(
            backend.compare_and_swap(Some(0), &doc(1)),
            Err(StoreError::StaleWrite {
                expected: 0,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn missing_object_bucket_and_access_are_distinct() {
        let gcs = FakeGcs::start(false);
        let backend = gcs.backend("labs");
        assert!(backend.load().unwrap().is_none());
        assert!(!backend.remove().unwrap());
        assert!(matches!(
            backend.compare_and_swap(Some(0), &doc(1)),
            Err(StoreError::NotFound(_))
        ));

        let missing = gcs.backend("nowhere");
        assert!(matches!(
            missing.load(),
            Err(StoreError::BucketNotFound(ref b)) if b == "nowhere"
        ));
        assert!(matches!(
            missing.remove(),
            Err(StoreError::BucketNotFound(_))
        ));

        let denied = FakeGcs::start(true);
        assert!(matches!(
            denied.backend("labs").load(),
            Err(StoreError::Forbidden(ref l)) if l == "gs://labs/team/demo.json"
        ));
    }

    #[test]
    fn store_push_pull_over_gcs() {
        let gcs = FakeGcs::start(false);
        let store = StateStore::new(Box::new(gcs.backend("labs")));
        let mut state = LabState::new("demo", "gce", "gce", None, "zone-1");
        store.create(&state).unwrap();
        assert_eq!(store.push(&mut state).unwrap(), 1);
        assert_eq!(store.pull().unwrap(), state);
        assert_eq!(store.locator(), "gs://labs/team/demo.json");
        assert!(store.clean().unwrap());
        assert!(matches!(store.pull(), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn config_trims_api_and_keeps_token() {
        let config = GcsConfig::new("labs", "demo.json")
            .with_api("http://localhost:4443/")
            .with_token("t");
        assert_eq!(config.api, "http://localhost:4443");
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(GcsConfig::new("labs", "demo.json").api, GCS_API);
    }
}
