use crate::backend::StateBackend;
use crate::document::{decode_state, encode_state};
use crate::file::FileBackend;
use crate::StoreError;
use labmachine_schema::LabState;
use std::path::PathBuf;
use tracing::{debug, info};

/// Front end over one durable state location.
///
/// The store is the only writer of the canonical `version`: `create` writes
/// version 0 exclusively, and every `push` advances the version by one with
/// a compare-and-swap against the version the caller loaded.
pub struct StateStore {
    backend: Box<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileBackend::new(path)))
    }

    pub fn locator(&self) -> String {
        self.backend.describe()
    }

    pub fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.backend.load()?.is_some())
    }

    /// Write a fresh descriptor. Fails with `AlreadyExists` if one is stored.
    pub fn create(&self, state: &LabState) -> Result<(), StoreError> {
        if state.version != 0 {
            return Err(StoreError::StaleWrite {
                locator: self.locator(),
                expected: 0,
                found: state.version,
            });
        }
        let data = encode_state(state)?;
        self.backend.compare_and_swap(None, &data)?;
        info!("created lab state '{}' at {}", state.project, self.locator());
        Ok(())
    }

    /// Persist `state` as the next version after `state.version`.
    ///
    /// On success `state.version` is advanced and returned. On failure the
    /// caller's descriptor is left untouched.
    pub fn push(&self, state: &mut LabState) -> Result<u64, StoreError> {
        let base = state.version;
        let mut next = state.clone();
        next.version = base + 1;
        let data = encode_state(&next)?;
        self.backend.compare_and_swap(Some(base), &data)?;
        state.version = next.version;
        debug!(
            "pushed lab state '{}' to {} (version {base} -> {})",
            state.project,
            self.locator(),
            state.version
        );
        Ok(state.version)
    }

    pub fn pull(&self) -> Result<LabState, StoreError> {
        let locator = self.locator();
        let data = self
            .backend
            .load()?
            .ok_or_else(|| StoreError::NotFound(locator.clone()))?;
        decode_state(&data, &locator)
    }

    /// Delete the durable descriptor. Returns whether one existed.
    pub fn clean(&self) -> Result<bool, StoreError> {
        let removed = self.backend.remove()?;
        if removed {
            info!("removed lab state at {}", self.locator());
        }
        Ok(removed)
    }
}
