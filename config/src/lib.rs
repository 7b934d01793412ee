//! Load configuration from XDG `config.toml` and project `.env`, then apply to
//! the process environment with priority: **existing env > .env > XDG**.
//!
//! The runtime reads all tunables (`PENGUIFLOW_*`) from the process
//! environment; this crate is the one place that fills it.

mod env_file;
mod xdg;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Key/value maps gathered from both file sources, before precedence is
/// applied against the live environment.
struct EnvSources {
    dotenv: HashMap<String, String>,
    xdg: HashMap<String, String>,
}

impl EnvSources {
    fn gather(app_name: &str, override_dir: Option<&Path>) -> Result<Self, LoadError> {
        Ok(Self {
            dotenv: env_file::load_env_map(override_dir).map_err(LoadError::DotenvRead)?,
            xdg: xdg::load_env_map(app_name)?,
        })
    }

    /// All keys seen in either source.
    fn keys(&self) -> std::collections::HashSet<String> {
        let mut keys: std::collections::HashSet<String> = self.xdg.keys().cloned().collect();
        keys.extend(self.dotenv.keys().cloned());
        keys
    }

    /// Value for `key` with `.env` winning over XDG.
    fn resolve(&self, key: &str) -> Option<&String> {
        self.dotenv.get(key).or_else(|| self.xdg.get(key))
    }
}

/// Loads config from `$XDG_CONFIG_HOME/<app_name>/config.toml` (`[env]` table)
/// and an optional project `.env`, then sets environment variables only for
/// keys that are **not** already set, so existing env has highest priority.
///
/// * `app_name`: e.g. `"penguiflow"` — selects the XDG path.
/// * `override_dir`: when `Some`, `.env` is looked up there instead of the
///   current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let sources = EnvSources::gather(app_name, override_dir)?;
    for key in sources.keys() {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        if let Some(value) = sources.resolve(&key) {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}
