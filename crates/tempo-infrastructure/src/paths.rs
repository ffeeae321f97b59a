//! Unified path management for tempo files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/tempo/             # Config directory (platform config dir)
//! ├── config.toml              # Engine configuration
//! ├── active_session.toml      # Fast local store
//! └── durable/                 # Directory-backed durable store
//!     ├── sessions/
//!     └── entries/
//! ```

use std::path::PathBuf;
use tempo_core::TempoError;

const APP_DIR: &str = "tempo";

/// Path resolution rooted either at the platform config dir or an override.
#[derive(Debug, Clone)]
pub struct TempoPaths {
    base: Option<PathBuf>,
}

impl TempoPaths {
    /// Creates a resolver. `base` replaces the platform config directory.
    pub fn new(base: Option<PathBuf>) -> Self {
        Self { base }
    }

    /// Returns the tempo configuration directory.
    ///
    /// # Returns
    ///
    /// - `Ok(PathBuf)`: e.g. `~/.config/tempo/`
    /// - `Err(TempoError::Config)`: the platform directory is unknown
    pub fn config_dir(&self) -> Result<PathBuf, TempoError> {
        if let Some(base) = &self.base {
            return Ok(base.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| TempoError::config("Cannot find config directory"))
    }

    pub fn config_file(&self) -> Result<PathBuf, TempoError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    pub fn local_session_file(&self) -> Result<PathBuf, TempoError> {
        Ok(self.config_dir()?.join("active_session.toml"))
    }

    pub fn durable_dir(&self) -> Result<PathBuf, TempoError> {
        Ok(self.config_dir()?.join("durable"))
    }
}

impl Default for TempoPaths {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_base() {
        let paths = TempoPaths::new(Some(PathBuf::from("/tmp/tempo-test")));
        assert_eq!(
            paths.config_file().unwrap(),
            PathBuf::from("/tmp/tempo-test/config.toml")
        );
        assert_eq!(
            paths.local_session_file().unwrap(),
            PathBuf::from("/tmp/tempo-test/active_session.toml")
        );
        assert_eq!(
            paths.durable_dir().unwrap(),
            PathBuf::from("/tmp/tempo-test/durable")
        );
    }
}
