//! Session configuration.
//!
//! A session is driven by the `[minimerge]` section of a sections file
//! (conventionally `~/.minimerge.cfg`) overlaid with whatever the caller,
//! normally the CLI, sets directly on the [`Config`] value. The raw
//! sections are kept around: `[fetchers]` / `[makers]` re-point component
//! keys at other implementations, and kind-named sections (`[static]`,
//! `[hg]`, ...) are handed to the matching component's constructor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ini::{IniError, Section, Sections};

/// The main configuration section.
pub const CONFIG_SECTION: &str = "minimerge";

/// Default configuration file name under the home directory.
pub const DEFAULT_CONFIG_FILENAME: &str = ".minimerge.cfg";

/// What a session does with its resolved packages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  #[default]
  Install,
  Delete,
  Reinstall,
  /// Refresh working copies without building anything.
  Sync,
}

impl Action {
  pub fn as_str(self) -> &'static str {
    match self {
      Action::Install => "install",
      Action::Delete => "delete",
      Action::Reinstall => "reinstall",
      Action::Sync => "sync",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("the configuration file is invalid: '{}': {source}", path.display())]
  Invalid {
    path: PathBuf,
    #[source]
    source: IniError,
  },
}

/// One session's configuration.
#[derive(Debug, Clone)]
pub struct Config {
  /// Root under which packages are installed (`<prefix>/<category>/<name>`).
  pub prefix: PathBuf,
  pub action: Action,
  /// Do not touch the network anywhere.
  pub offline: bool,
  /// Fetch sources but skip the make step.
  pub fetch_only: bool,
  /// Skip dependency resolution; process exactly the requested packages.
  pub nodeps: bool,
  /// Resume the resolved sequence after this package.
  pub jump: Option<String>,
  /// Requested package names.
  pub packages: Vec<String>,
  /// Extra minilay paths from the configuration file.
  pub minilays: Vec<PathBuf>,
  /// All raw configuration sections, for component factories.
  pub sections: BTreeMap<String, Section>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      action: Action::default(),
      offline: false,
      fetch_only: false,
      nodeps: false,
      jump: None,
      packages: Vec::new(),
      minilays: Vec::new(),
      sections: BTreeMap::new(),
    }
  }
}

impl Config {
  /// Load a configuration file. The file must exist and parse; use
  /// [`Config::load_or_default`] for an optional file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let sections = Sections::read(path).map_err(|e| ConfigError::Invalid {
      path: path.to_path_buf(),
      source: e,
    })?;

    let mut config = Config::default();
    if let Some(main) = sections.get(CONFIG_SECTION) {
      if let Some(prefix) = value(main, "prefix") {
        config.prefix = expand_tilde(prefix);
      }
      if let Some(offline) = value(main, "offline") {
        config.offline = truthy(offline);
      }
      if let Some(minilays) = value(main, "minilays") {
        config.minilays = minilays.split_whitespace().map(expand_tilde).collect();
      }
    }

    config.sections = sections.into_inner();
    // Let the main section's proxy reach the static fetcher without
    // requiring a dedicated [static] section.
    if let Some(proxy) = config
      .sections
      .get(CONFIG_SECTION)
      .and_then(|main| value(main, "http-proxy"))
      .map(str::to_string)
    {
      config
        .sections
        .entry("static".to_string())
        .or_default()
        .entry("http-proxy".to_string())
        .or_insert(proxy);
    }

    debug!(path = %path.display(), prefix = %config.prefix.display(), "loaded configuration");
    Ok(config)
  }

  /// Load `path` when it exists, fall back to the defaults otherwise.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      Ok(Self::default())
    }
  }

  /// The component-override section for fetchers, if configured.
  pub fn fetcher_overrides(&self) -> Option<&Section> {
    self.sections.get("fetchers")
  }

  /// The component-override section for makers, if configured.
  pub fn maker_overrides(&self) -> Option<&Section> {
    self.sections.get("makers")
  }
}

/// The default install prefix: `~/.minimerge`.
pub fn default_prefix() -> PathBuf {
  dirs::home_dir()
    .map(|home| home.join(".minimerge"))
    .unwrap_or_else(|| PathBuf::from("/usr/local/minimerge"))
}

/// The default configuration file path: `~/.minimerge.cfg`.
pub fn default_config_path() -> Option<PathBuf> {
  dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILENAME))
}

fn value<'a>(section: &'a Section, key: &str) -> Option<&'a str> {
  section.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn truthy(value: &str) -> bool {
  matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn expand_tilde(path: &str) -> PathBuf {
  if let Some(rest) = path.strip_prefix("~/") {
    if let Some(home) = dirs::home_dir() {
      return home.join(rest);
    }
  } else if path == "~" {
    if let Some(home) = dirs::home_dir() {
      return home;
    }
  }
  PathBuf::from(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn defaults_are_sane() {
    let config = Config::default();
    assert_eq!(config.action, Action::Install);
    assert!(!config.offline);
    assert!(config.packages.is_empty());
  }

  #[test]
  fn main_section_keys_are_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimerge.cfg");
    fs::write(
      &path,
      "[minimerge]\nprefix = /opt/mt\noffline = true\nminilays = /srv/lay1 /srv/lay2\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.prefix, PathBuf::from("/opt/mt"));
    assert!(config.offline);
    assert_eq!(
      config.minilays,
      vec![PathBuf::from("/srv/lay1"), PathBuf::from("/srv/lay2")]
    );
  }

  #[test]
  fn proxy_flows_into_the_static_section() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimerge.cfg");
    fs::write(&path, "[minimerge]\nprefix = /opt/mt\nhttp-proxy = http://proxy:3128\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(
      config.sections.get("static").and_then(|s| s.get("http-proxy")).unwrap(),
      "http://proxy:3128"
    );
  }

  #[test]
  fn an_explicit_static_section_wins_over_the_main_proxy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimerge.cfg");
    fs::write(
      &path,
      "[minimerge]\nhttp-proxy = http://main:3128\n[static]\nhttp-proxy = http://static:3128\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(
      config.sections.get("static").and_then(|s| s.get("http-proxy")).unwrap(),
      "http://static:3128"
    );
  }

  #[test]
  fn broken_files_are_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimerge.cfg");
    fs::write(&path, "prefix = /opt/mt\n").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Invalid { .. })));
  }

  #[test]
  fn load_or_default_tolerates_a_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.cfg")).unwrap();
    assert_eq!(config.prefix, default_prefix());
  }

  #[test]
  fn override_sections_are_exposed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimerge.cfg");
    fs::write(&path, "[fetchers]\nhg = static\n[makers]\nbuildout = buildout\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.fetcher_overrides().unwrap().get("hg").unwrap(), "static");
    assert!(config.maker_overrides().is_some());
  }
}
