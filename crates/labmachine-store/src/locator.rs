use crate::StoreError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a lab's state document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLocator {
    File(PathBuf),
    /// `http://` or `https://` URL served by the remote state protocol.
    Http(String),
    /// `gs://bucket/object` in Google Cloud Storage.
    Gcs { bucket: String, object: String },
}

impl StateLocator {
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidLocator(input.to_owned()));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(StateLocator::Http(trimmed.trim_end_matches('/').to_owned()));
        }
        if let Some(rest) = trimmed.strip_prefix("gs://") {
            return match rest.split_once('/') {
                Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                    Ok(StateLocator::Gcs {
                        bucket: bucket.to_owned(),
                        object: object.to_owned(),
                    })
                }
                _ => Err(StoreError::InvalidLocator(input.to_owned())),
            };
        }
        if let Some(path) = trimmed.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StoreError::InvalidLocator(input.to_owned()));
            }
            return Ok(StateLocator::File(PathBuf::from(path)));
        }
        if trimmed.contains("://") {
            return Err(StoreError::InvalidLocator(input.to_owned()));
        }
        Ok(StateLocator::File(PathBuf::from(trimmed)))
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, StateLocator::File(_))
    }
}

impl FromStr for StateLocator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StateLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateLocator::File(path) => write!(f, "{}", path.display()),
            StateLocator::Http(url) => f.write_str(url),
            StateLocator::Gcs { bucket, object } => write!(f, "gs://{bucket}/{object}"),
        }
    }
}
