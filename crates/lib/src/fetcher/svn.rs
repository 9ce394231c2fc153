//! Subversion fetcher.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::ini::Section;
use crate::minibuild::FetchKind;
use crate::registry::{ComponentError, Constructor, Product};

use super::{FetchError, FetchOptions, Fetcher, PROTECTED_SUBDIR, purge_except, resolve_executable, run_tool, same_origin};

const SCHEMES: &[&str] = &["file", "svn", "svn+ssh", "http", "https"];
const MARKER: &str = ".svn";
const DEFAULT_REVISION: &str = "HEAD";

/// Fetches working copies with the `svn` executable.
pub struct SvnFetcher {
  executable: PathBuf,
}

impl SvnFetcher {
  /// Resolve the `svn` executable (or an `executable` override from the
  /// configuration section) and build the fetcher.
  pub fn new(section: &Section) -> Result<Self, FetchError> {
    let spec = section.get("executable").map(String::as_str).unwrap_or("svn");
    Ok(Self {
      executable: resolve_executable(spec)?,
    })
  }

  /// Constructor for factory registration.
  pub fn constructor() -> Constructor<dyn Fetcher> {
    std::sync::Arc::new(|section| {
      SvnFetcher::new(section)
        .map(|fetcher| Box::new(fetcher) as Box<dyn Fetcher>)
        .map_err(|e| ComponentError::Construction {
          key: "svn".to_string(),
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
        detail: "destination is not a subversion working copy after the operation".to_string(),
      })
    }
  }

  /// Origin URL from `svn info` on the working copy.
  fn recorded_origin(&self, dest: &Path) -> Result<String, FetchError> {
    let dest_str = dest.to_string_lossy();
    let output = self.run(&["info", dest_str.as_ref()])?;
    output
      .lines()
      .find_map(|line| line.strip_prefix("URL:"))
      .map(|url| url.trim().to_string())
      .ok_or_else(|| FetchError::Runtime {
        fetcher: self.name().to_string(),
        command: format!("{} info {}", self.executable.display(), dest_str),
        detail: "no URL line in the working copy info".to_string(),
      })
  }
}

impl Product for SvnFetcher {
  fn matches(&self, switch: &str) -> bool {
    switch == "svn"
  }
}

impl Fetcher for SvnFetcher {
  fn name(&self) -> &'static str {
    "subversion"
  }

  fn kind(&self) -> FetchKind {
    FetchKind::Svn
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
    info!(uri, dest = %dest.display(), revision, "fetching subversion working copy");

    // checkout tolerates an existing directory, so a purged destination
    // that kept its protected subdirectory needs no special casing.
    let mut args = vec!["checkout", "-r", revision];
    args.extend(options.extra_args());
    args.extend([uri, dest_str.as_str()]);
    self.run(&args)?;

    self.check_marker(uri, dest)
  }

  fn update(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if !self.is_valid_origin(uri) {
      return Err(FetchError::InvalidOrigin { uri: uri.to_string() });
    }
    if options.offline {
      info!(uri, dest = %dest.display(), "offline, keeping working copy as-is");
      return Ok(());
    }

    if self.has_origin_changed(uri, dest)? {
      warn!(uri, dest = %dest.display(), "origin changed, re-fetching");
      purge_except(dest, &[PROTECTED_SUBDIR])?;
      return self.fetch(uri, dest, options);
    }

    let revision = self.revision(options);
    let dest_str = dest.to_string_lossy().into_owned();
    info!(uri, dest = %dest.display(), revision, "updating subversion working copy");

    let mut args = vec!["update", "-r", revision];
    args.extend(options.extra_args());
    args.push(dest_str.as_str());
    self.run(&args)?;

    self.check_marker(uri, dest)
  }

  fn has_origin_changed(&self, uri: &str, dest: &Path) -> Result<bool, FetchError> {
    let recorded = self.recorded_origin(dest)?;
    Ok(!same_origin(&recorded, uri))
  }
}
