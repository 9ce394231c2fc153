//! Mercurial fetcher.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ini::Section;
use crate::minibuild::FetchKind;
use crate::registry::{ComponentError, Constructor, Product};

use super::{FetchError, FetchOptions, Fetcher, PROTECTED_SUBDIR, purge_except, resolve_executable, run_tool, same_origin};

const SCHEMES: &[&str] = &["file", "hg", "ssh", "http", "https"];
const MARKER: &str = ".hg";
const DEFAULT_REVISION: &str = "tip";

/// Fetches working copies with the `hg` executable.
pub struct HgFetcher {
  executable: PathBuf,
}

impl HgFetcher {
  /// Resolve the `hg` executable (or an `executable` override from the
  /// configuration section) and build the fetcher.
  pub fn new(section: &Section) -> Result<Self, FetchError> {
    let spec = section.get("executable").map(String::as_str).unwrap_or("hg");
    Ok(Self {
      executable: resolve_executable(spec)?,
    })
  }

  /// Constructor for factory registration.
  pub fn constructor() -> Constructor<dyn Fetcher> {
    std::sync::Arc::new(|section| {
      HgFetcher::new(section)
        .map(|fetcher| Box::new(fetcher) as Box<dyn Fetcher>)
        .map_err(|e| ComponentError::Construction {
          key: "hg".to_string(),
          source: Box::new(e),
        })
    })
  }

  fn revision<'a>(&self, options: &'a FetchOptions) -> &'a str {
    options.revision.as_deref().unwrap_or(DEFAULT_REVISION)
  }

  fn run<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> Result<String, FetchError> {
    run_tool(self.name(), &self.executable, args)
  }

  fn check_marker(&self, uri: &str, dest: &Path) -> Result<(), FetchError> {
    if dest.join(MARKER).is_dir() {
      Ok(())
    } else {
      Err(FetchError::FetchFailed {
        uri: uri.to_string(),
        dest: dest.to_path_buf(),
        detail: "destination is not a mercurial working copy after the operation".to_string(),
      })
    }
  }

  /// Origin recorded in the working copy, or `None` when none is recorded.
  fn recorded_origin(&self, dest: &Path) -> Option<String> {
    let dest_str = dest.to_string_lossy();
    match self.run(&["paths", "default", "-R", dest_str.as_ref()]) {
      Ok(path) => Some(path),
      Err(error) => {
        debug!(dest = %dest.display(), %error, "no recorded default origin");
        None
      }
    }
  }
}

impl Product for HgFetcher {
  fn matches(&self, switch: &str) -> bool {
    switch == "hg"
  }
}

impl Fetcher for HgFetcher {
  fn name(&self) -> &'static str {
    "mercurial"
  }

  fn kind(&self) -> FetchKind {
    FetchKind::Hg
  }

  fn schemes(&self) -> &'static [&'static str] {
    SCHEMES
  }

  fn metadata_marker(&self) -> &'static str {
    MARKER
  }

  fn fetch(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if !self.is_valid_origin(uri) {
      return Err(FetchError::InvalidOrigin { uri: uri.to_string() });
    }
    if options.offline {
      return Err(FetchError::Offline { uri: uri.to_string() });
    }
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(|e| FetchError::Io {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }

    let revision = self.revision(options);
    let dest_str = dest.to_string_lossy().into_owned();
    info!(uri, dest = %dest.display(), revision, "fetching mercurial working copy");

    if dest.is_dir() {
      // `hg clone` refuses a non-empty destination, which is exactly what
      // a purge leaves behind when build output is protected. Re-establish
      // in place instead, recording the origin as clone would have.
      if !dest.join(MARKER).is_dir() {
        self.run(&["init", dest_str.as_str()])?;
      }
      let hgrc = dest.join(MARKER).join("hgrc");
      fs::write(&hgrc, format!("[paths]\ndefault = {uri}\n")).map_err(|e| FetchError::Io {
        path: hgrc,
        source: e,
      })?;
      let mut args = vec!["pull", "-r", revision, uri, "-R", dest_str.as_str()];
      args.extend(options.extra_args());
      self.run(&args)?;
      self.run(&["up", "-r", revision, "-R", dest_str.as_str()])?;
    } else {
      let mut args = vec!["clone", "-r", revision];
      args.extend(options.extra_args());
      args.extend([uri, dest_str.as_str()]);
      self.run(&args)?;
    }

    self.check_marker(uri, dest)
  }

  fn update(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if !self.is_valid_origin(uri) {
      return Err(FetchError::InvalidOrigin { uri: uri.to_string() });
    }
    if options.offline {
      debug!(uri, dest = %dest.display(), "offline, keeping working copy as-is");
      return Ok(());
    }

    if self.has_origin_changed(uri, dest)? {
      warn!(uri, dest = %dest.display(), "origin changed, re-fetching");
      purge_except(dest, &[PROTECTED_SUBDIR])?;
      return self.fetch(uri, dest, options);
    }

    let revision = self.revision(options);
    let dest_str = dest.to_string_lossy().into_owned();
    info!(uri, dest = %dest.display(), revision, "updating mercurial working copy");

    let mut args = vec!["pull", "-r", revision, uri, "-R", dest_str.as_str()];
    args.extend(options.extra_args());
    self.run(&args)?;
    self.run(&["up", "-r", revision, "-R", dest_str.as_str()])?;

    self.check_marker(uri, dest)
  }

  fn has_origin_changed(&self, uri: &str, dest: &Path) -> Result<bool, FetchError> {
    match self.recorded_origin(dest) {
      Some(recorded) => Ok(!same_origin(&recorded, uri)),
      // No recorded origin: treat as changed so update re-establishes it.
      None => Ok(true),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin_matrix(fetcher: &HgFetcher) {
    for uri in [
      "http://example.com/repo",
      "https://example.com/repo",
      "hg://example.com/repo",
      "ssh://hg@example.com/repo",
      "file:///var/hg/repo",
    ] {
      assert!(fetcher.is_valid_origin(uri), "expected '{uri}' to be valid");
    }
    for uri in ["svn://example.com/repo", "ftp://example.com/repo", "/var/hg/repo", ""] {
      assert!(!fetcher.is_valid_origin(uri), "expected '{uri}' to be invalid");
    }
  }

  #[test]
  fn origin_validation() {
    // Build without touching PATH: the scheme check needs no executable.
    let fetcher = HgFetcher {
      executable: PathBuf::from("/unused/hg"),
    };
    origin_matrix(&fetcher);
    assert!(fetcher.matches("hg"));
    assert!(!fetcher.matches("svn"));
    assert_eq!(fetcher.metadata_marker(), ".hg");
  }

  #[test]
  fn missing_executable_fails_construction() {
    let mut section = Section::new();
    section.insert("executable".to_string(), "no-such-hg-anywhere".to_string());
    assert!(matches!(
      HgFetcher::new(&section),
      Err(FetchError::ExecutableNotFound { .. })
    ));
  }
}
