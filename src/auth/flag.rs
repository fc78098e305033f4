//! Durable "manually signed out" flag

use std::path::PathBuf;

use anyhow::Result;

use crate::config::PersistedState;

/// Storage for the flag that suppresses session restore after an explicit
/// sign-out. It must survive restarts.
pub trait SessionFlagStore: Send + Sync {
    fn is_signed_out(&self) -> bool;
    fn set_signed_out(&self, signed_out: bool) -> Result<()>;
}

/// Flag kept in `state.toml` under the data directory.
pub struct FileFlag {
    path: PathBuf,
}

impl FileFlag {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionFlagStore for FileFlag {
    fn is_signed_out(&self) -> bool {
        match PersistedState::load(&self.path) {
            Ok(state) => state.manually_signed_out,
            Err(e) => {
                tracing::warn!("Ignoring unreadable session state: {:#}", e);
                false
            }
        }
    }

    fn set_signed_out(&self, signed_out: bool) -> Result<()> {
        let mut state = PersistedState::load(&self.path).unwrap_or_default();
        if state.manually_signed_out == signed_out && self.path.exists() {
            return Ok(());
        }
        state.manually_signed_out = signed_out;
        state.save(&self.path)
    }
}
