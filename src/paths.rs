//! XDG Base Directory compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. ScriptRelay-specific env var (SCRIPTRELAY_CONFIG_DIR, SCRIPTRELAY_STATE_DIR)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored, as XDG requires.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolved directory paths for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// State directory: durable relay slot and its lock file
    pub state_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "SCRIPTRELAY_CONFIG_DIR", || {
            strategy.config_dir().join("scriptrelay")
        });

        let state_dir = env_or(&env_fn, "SCRIPTRELAY_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("scriptrelay")
        });

        Ok(Self {
            config_dir,
            state_dir,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Durable relay slot: state_dir/relay/slot.json
    pub fn relay_slot_file(&self) -> PathBuf {
        self.state_dir.join("relay").join("slot.json")
    }

    /// Relay lock file, sibling of the slot file
    pub fn relay_lock_file(&self) -> PathBuf {
        self.state_dir.join("relay").join("slot.lock")
    }

    /// Create the state directory with owner-only permissions.
    pub fn ensure_state_dir(&self) -> Result<()> {
        create_dir_with_mode(&self.state_dir.join("relay"))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                config_dir: home.join(".config").join("scriptrelay"),
                state_dir: home.join(".local").join("state").join("scriptrelay"),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths, as XDG requires.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| PathBuf::from(shellexpand::tilde(&v).to_string()))
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

/// Create a directory with mode 0700.
pub(crate) fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
