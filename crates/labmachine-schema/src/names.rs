use crate::SchemaError;
use std::fmt;

/// What a validated name is used for; only changes the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Project,
    Volume,
    Lab,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Project => write!(f, "project"),
            NameKind::Volume => write!(f, "volume"),
            NameKind::Lab => write!(f, "lab"),
        }
    }
}

const MAX_NAME_LEN: usize = 63;

/// Validate a resource name against the rules shared by the supported clouds:
/// 1-63 characters of `[a-z0-9-]`, starting with a letter, not ending with `-`.
pub fn validate_name(kind: NameKind, name: &str) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidName {
        kind,
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid("must be 1-63 characters"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("must match [a-z0-9-]"));
    }
    if !name.as_bytes()[0].is_ascii_lowercase() {
        return Err(invalid("must start with a lowercase letter"));
    }
    if name.ends_with('-') {
        return Err(invalid("must not end with '-'"));
    }
    Ok(())
}
