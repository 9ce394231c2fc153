//! Minilays: directories of minibuild descriptors.
//!
//! A minilay maps package names to [`Minibuild`]s. The backing directory is
//! listed once, on the first lookup; the descriptors themselves stay
//! unparsed until their metadata is first needed, so probing a large minilay
//! for one name touches exactly one file.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::minibuild::Minibuild;

/// Errors raised while opening or listing a minilay.
#[derive(Debug, Error)]
pub enum MinilayError {
  /// The backing path is missing or not a directory.
  #[error("this is an invalid minilay directory: '{}'", .0.display())]
  InvalidPath(PathBuf),

  /// The directory listing failed.
  #[error("failed to list minilay '{}': {source}", path.display())]
  List {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One directory of minibuild descriptors.
#[derive(Debug)]
pub struct Minilay {
  path: PathBuf,
  entries: OnceCell<BTreeMap<String, Minibuild>>,
}

impl Minilay {
  /// Open a minilay. Fails unless `path` is an existing directory; the
  /// directory content is not read yet.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, MinilayError> {
    let path = path.into();
    if !path.is_dir() {
      return Err(MinilayError::InvalidPath(path));
    }
    Ok(Self {
      path,
      entries: OnceCell::new(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Whether the directory listing has been read already.
  pub fn is_listed(&self) -> bool {
    self.entries.get().is_some()
  }

  /// Look up a descriptor by name, listing the directory on first call.
  pub fn lookup(&self, name: &str) -> Result<Option<&Minibuild>, MinilayError> {
    Ok(self.entries()?.get(name))
  }

  /// Whether a descriptor with this name exists here. Does not parse it.
  pub fn contains(&self, name: &str) -> Result<bool, MinilayError> {
    Ok(self.entries()?.contains_key(name))
  }

  /// All descriptor names in this minilay, sorted.
  pub fn names(&self) -> Result<Vec<&str>, MinilayError> {
    Ok(self.entries()?.keys().map(String::as_str).collect())
  }

  /// All descriptors in this minilay, in name order.
  pub fn minibuilds(&self) -> Result<impl Iterator<Item = &Minibuild>, MinilayError> {
    Ok(self.entries()?.values())
  }

  fn entries(&self) -> Result<&BTreeMap<String, Minibuild>, MinilayError> {
    if let Some(entries) = self.entries.get() {
      return Ok(entries);
    }

    let mut entries = BTreeMap::new();
    let listing = fs::read_dir(&self.path).map_err(|e| MinilayError::List {
      path: self.path.clone(),
      source: e,
    })?;
    for entry in listing {
      let entry = entry.map_err(|e| MinilayError::List {
        path: self.path.clone(),
        source: e,
      })?;
      let entry_path = entry.path();
      if !entry_path.is_file() {
        debug!(path = %entry_path.display(), "skipping non-file minilay entry");
        continue;
      }
      let minibuild = Minibuild::new(entry_path);
      entries.insert(minibuild.name().to_string(), minibuild);
    }
    debug!(path = %self.path.display(), count = entries.len(), "listed minilay");
    Ok(self.entries.get_or_init(|| entries))
  }
}
