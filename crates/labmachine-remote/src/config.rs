use serde::{Deserialize, Serialize};

/// Environment variable holding the bearer token for the state server.
pub const TOKEN_ENV: &str = "LABMACHINE_REMOTE_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Config for `url`, picking up the token from `LABMACHINE_REMOTE_TOKEN`.
    pub fn from_env(url: &str) -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::new(url).with_token(token.trim()),
            _ => Self::new(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_strips_trailing_slash() {
        let config = RemoteConfig::new("https://state.example.com/state/demo/");
        assert_eq!(config.url, "https://state.example.com/state/demo");
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn config_with_token() {
        let config = RemoteConfig::new("http://localhost:8322/state/demo").with_token("secret");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn config_json_roundtrip() {
        let config = RemoteConfig::new("http://h/state/x").with_token("t");
        let json = serde_json::to_string(&config).unwrap();
        let back: RemoteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
