use crate::StoreError;

/// A durable location holding at most one encoded state document.
pub trait StateBackend: Send + Sync {
    /// Human-readable locator, used in logs and error messages.
    fn describe(&self) -> String;

    /// Read the raw document, `None` if nothing is stored.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored document with `data` if the stored version matches.
    ///
    /// `expected = None` requires that nothing is stored yet (exclusive
    /// create); `Some(v)` requires the stored document to be at version `v`.
    /// The check and the write must be atomic with respect to other writers.
    fn compare_and_swap(&self, expected: Option<u64>, data: &[u8]) -> Result<(), StoreError>;

    /// Delete the stored document. Returns whether anything was removed.
    fn remove(&self) -> Result<bool, StoreError>;
}

/// Shared precondition check for backends that evaluate the swap locally.
pub fn check_expected_version(
    locator: &str,
    expected: Option<u64>,
    current: Option<u64>,
) -> Result<(), StoreError> {
    match (expected, current) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::AlreadyExists(locator.to_owned())),
        (Some(_), None) => Err(StoreError::NotFound(locator.to_owned())),
        (Some(e), Some(c)) if e == c => Ok(()),
        (Some(e), Some(c)) => Err(StoreError::StaleWrite {
            locator: locator.to_owned(),
            expected: e,
            found: c,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_absence() {
        assert!(check_expected_version("s", None, None).is_ok());
        assert!(matches!(
            check_expected_version("s", None, Some(0)),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn update_requires_matching_version() {
        assert!(check_expected_version("s", Some(4), Some(4)).is_ok());
        assert!(matches!(
            check_expected_version("s", Some(4), Some(5)),
            Err(StoreError::StaleWrite {
                expected: 4,
                found: 5,
                ..
            })
        ));
        assert!(matches!(
            check_expected_version("s", Some(0), None),
            Err(StoreError::NotFound(_))
        ));
    }
}
