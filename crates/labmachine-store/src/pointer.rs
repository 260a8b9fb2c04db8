//! `labmachine.toml`: maps lab names to state locators and records the
//! current lab for commands run without an explicit locator.

use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const POINTER_FILE: &str = "labmachine.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabPointers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default)]
    pub labs: BTreeMap<String, String>,
}

impl LabPointers {
    /// Read the pointer file; a missing file is an empty set of pointers.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&content)
            .map_err(|e| StoreError::Pointer(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Pointer(format!("{}: {e}", path.display())))?;
        write_atomic(path, content.as_bytes())
    }

    /// Record `lab -> locator` and make it the current lab.
    pub fn register(&mut self, lab: &str, locator: &str) -> Result<(), StoreError> {
        if let Some(existing) = self.labs.get(lab) {
            return Err(StoreError::Pointer(format!(
                "lab '{lab}' is already registered at {existing}"
            )));
        }
        self.labs.insert(lab.to_owned(), locator.to_owned());
        self.current = Some(lab.to_owned());
        Ok(())
    }

    /// Locator of `lab`, or of the current lab when `lab` is `None`.
    pub fn resolve(&self, lab: Option<&str>) -> Result<&str, StoreError> {
        let name = match lab {
            Some(name) => name,
            None => self.current.as_deref().ok_or_else(|| {
                StoreError::Pointer(
                    "no current lab; run 'labctl init' or pass --state".to_owned(),
                )
            })?,
        };
        self.labs
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Pointer(format!("unknown lab '{name}'")))
    }

    /// Forget `lab`. Clears `current` if it pointed at it.
    pub fn remove(&mut self, lab: &str) -> Option<String> {
        let removed = self.labs.remove(lab);
        if self.current.as_deref() == Some(lab) {
            self.current = None;
        }
        removed
    }

    /// Name of the lab registered at `locator`, if any.
    pub fn lab_for_locator(&self, locator: &str) -> Option<&str> {
        self.labs
            .iter()
            .find(|(_, loc)| loc.as_str() == locator)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pointers = LabPointers::load(&dir.path().join(POINTER_FILE)).unwrap();
        assert_eq!(pointers, LabPointers::default());
    }

    #[test]
    fn register_save_load_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POINTER_FILE);
        let mut pointers = LabPointers::default();
        pointers.register("demo", "state.json").unwrap();
        pointers.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("current = \"demo\""));

        let loaded = LabPointers::load(&path).unwrap();
        assert_eq!(loaded.resolve(None).unwrap(), "state.json");
        assert_eq!(loaded.resolve(Some("demo")).unwrap(), "state.json");
        assert!(loaded.resolve(Some("other")).is_err());
    }

    #[test]
    fn register_twice_rejected() {
        let mut pointers = LabPointers::default();
        pointers.register("demo", "a.json").unwrap();
        assert!(pointers.register("demo", "b.json").is_err());
        assert_eq!(pointers.labs["demo"], "a.json");
    }

    #[test]
    fn remove_clears_current() {
        let mut pointers = LabPointers::default();
        pointers.register("demo", "state.json").unwrap();
        assert_eq!(pointers.remove("demo").as_deref(), Some("state.json"));
        assert!(pointers.current.is_none());
        assert!(pointers.resolve(None).is_err());
    }

    #[test]
    fn lookup_by_locator() {
        let mut pointers = LabPointers::default();
        pointers.register("a", "a.json").unwrap();
        pointers.register("b", "http://host/state/b").unwrap();
        assert_eq!(pointers.lab_for_locator("http://host/state/b"), Some("b"));
        assert_eq!(pointers.lab_for_locator("c.json"), None);
    }

    #[test]
    fn malformed_file_is_pointer_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POINTER_FILE);
        std::fs::write(&path, "labs = [").unwrap();
        assert!(matches!(
            LabPointers::load(&path),
            Err(StoreError::Pointer(_))
        ));
    }
}
