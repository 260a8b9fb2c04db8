use crate::{
    format_expected_version, RemoteConfig, EXPECTED_VERSION_HEADER, PROTOCOL_HEADER,
    PROTOCOL_VERSION,
};
use labmachine_store::{check_expected_version, StateBackend, StoreError};
use serde::Deserialize;
use std::io::Read;

/// State backend stored on an HTTP server.
///
/// The server evaluates the compare-and-swap: a `PUT` carries the version the
/// client expects to replace, and a mismatch comes back as `409 Conflict`
/// with the server's current version, which is mapped onto the same errors
/// the local file backend produces.
pub struct HttpBackend {
    config: RemoteConfig,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct Conflict {
    #[serde(default)]
    current: Option<u64>,
}

fn http_error(method: &str, url: &str, err: &ureq::Error) -> StoreError {
    StoreError::Remote(format!("{method} {url}: {err}"))
}

fn status_error(method: &str, url: &str, code: u16) -> StoreError {
    match code {
        401 | 403 => StoreError::Remote(format!(
            "{method} {url}: HTTP {code}, check LABMACHINE_REMOTE_TOKEN"
        )),
        _ => StoreError::Remote(format!("{method} {url}: HTTP {code}")),
    }
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            config,
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn with_headers<B>(&self, req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let req = req.header(PROTOCOL_HEADER, &PROTOCOL_VERSION.to_string());
        match &self.config.auth_token {
            Some(token) => req.header("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }
}

impl StateBackend for HttpBackend {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.url();
        tracing::debug!("GET {url}");
        let resp = self
            .with_headers(self.agent.get(url))
            .call()
            .map_err(|e| http_error("GET", url, &e))?;
        match resp.status().as_u16() {
            200 => {
                let mut body = Vec::new();
                resp.into_body()
                    .into_reader()
                    .read_to_end(&mut body)
                    .map_err(|e| StoreError::Remote(format!("GET {url}: {e}")))?;
                Ok(Some(body))
            }
            404 => Ok(None),
            code => Err(status_error("GET", url, code)),
        }
    }

    fn compare_and_swap(&self, expected: Option<u64>, data: &[u8]) -> Result<(), StoreError> {
        let url = self.url();
        tracing::debug!(
            "PUT {url} ({} bytes, expected version {})",
            data.len(),
            format_expected_version(expected)
        );
        let resp = self
            .with_headers(self.agent.put(url))
            .header("Content-Type", "application/json")
            .header(EXPECTED_VERSION_HEADER, &format_expected_version(expected))
            .send(data)
            .map_err(|e| http_error("PUT", url, &e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(()),
            409 => {
                let mut body = Vec::new();
                resp.into_body()
                    .into_reader()
                    .read_to_end(&mut body)
                    .map_err(|e| StoreError::Remote(format!("PUT {url}: {e}")))?;
                let conflict: Conflict = serde_json::from_slice(&body).map_err(|e| {
                    StoreError::Remote(format!("PUT {url}: unreadable conflict response: {e}"))
                })?;
                check_expected_version(url, expected, conflict.current)?;
                Err(StoreError::Remote(format!(
                    "PUT {url}: conflict reported at matching version {}",
                    format_expected_version(conflict.current)
                )))
            }
            code => Err(status_error("PUT", url, code)),
        }
    }

    fn remove(&self) -> Result<bool, StoreError> {
        let url = self.url();
        tracing::debug!("DELETE {url}");
        let resp = self
            .with_headers(self.agent.delete(url))
            .call()
            .map_err(|e| http_error("DELETE", url, &e))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            code => Err(status_error("DELETE", url, code)),
        }
    }
}
