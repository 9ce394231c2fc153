//! Source fetchers: populate or refresh a working copy from a remote origin.
//!
//! Every fetcher variant exposes the same capability set: origin
//! validation against its scheme allow-list, `fetch` into a fresh
//! destination, `update` of an existing one (with origin-drift detection
//! and a purge of stale content), and the `fetch_or_update` dispatch on the
//! variant's metadata marker. The VCS variants shell out to exactly one
//! external executable, resolved once at construction; every invocation's
//! exit status is checked.
//!
//! When an origin changes, everything under the destination is purged
//! *except* [`PROTECTED_SUBDIR`] before the copy is re-established, so
//! content from two different origins never mixes while build output
//! survives. The purge runs before any rewrite: a crash in between leaves
//! the destination looking "absent", which the next run handles normally.

pub mod hg;
pub mod http;
pub mod svn;

pub use hg::HgFetcher;
pub use http::StaticFetcher;
pub use svn::SvnFetcher;

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::minibuild::FetchKind;
use crate::registry::{NamedConstructor, Product};

/// The one subdirectory an origin-change purge never touches; it holds
/// in-progress build output that must survive a re-fetch.
pub const PROTECTED_SUBDIR: &str = ".download";

static URI_SCHEME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^([a-z][a-z0-9+]*)://\S+$").expect("uri scheme pattern"));

/// Errors raised by fetch and update operations.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The origin URI is outside the fetcher's scheme allow-list.
  #[error("this origin is invalid: '{uri}'")]
  InvalidOrigin { uri: String },

  /// The operation ran but left no usable working copy.
  #[error("fetch of '{uri}' into '{}' failed: {detail}", dest.display())]
  FetchFailed {
    uri: String,
    dest: PathBuf,
    detail: String,
  },

  /// The fetcher's executable could not be resolved at construction.
  #[error("'{name}' is not in your PATH, install it or point the fetcher at it")]
  ExecutableNotFound { name: String },

  /// An external tool invocation exited non-zero or could not run.
  #[error("{fetcher} command failed ({command}): {detail}")]
  Runtime {
    fetcher: String,
    command: String,
    detail: String,
  },

  /// Offline mode with no local copy to fall back on.
  #[error("offline: refusing to fetch '{uri}' with no cached working copy")]
  Offline { uri: String },

  /// An HTTP download failed.
  #[error("failed to download '{uri}': {source}")]
  Download {
    uri: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// A downloaded file did not match its declared digest.
  #[error("checksum mismatch for '{}': expected {expected}, got {actual}", file.display())]
  ChecksumMismatch {
    file: PathBuf,
    expected: String,
    actual: String,
  },

  /// Filesystem work around the working copy failed.
  #[error("io error at '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Options forwarded to a fetch or update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
  /// Revision, tag or branch to pin; each kind has its own "latest"
  /// default (`tip` for hg, `HEAD` for svn).
  pub revision: Option<String>,
  /// Opaque extra arguments appended to the tool invocation.
  pub args: Option<String>,
  /// Do not touch the network.
  pub offline: bool,
  /// Expected hex digest of a static download.
  pub sha256: Option<String>,
}

impl FetchOptions {
  pub fn offline(offline: bool) -> Self {
    Self {
      offline,
      ..Self::default()
    }
  }

  pub fn with_revision(revision: impl Into<String>) -> Self {
    Self {
      revision: Some(revision.into()),
      ..Self::default()
    }
  }

  pub(crate) fn extra_args(&self) -> impl Iterator<Item = &str> {
    self.args.as_deref().unwrap_or_default().split_whitespace()
  }
}

/// A validated origin: the URI together with the fetch kind that claimed
/// it. Built transiently per fetch/update call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOrigin<'a> {
  uri: &'a str,
  kind: FetchKind,
}

impl<'a> FetchOrigin<'a> {
  /// Validate `uri` against the fetcher's scheme allow-list.
  pub fn validate(uri: &'a str, fetcher: &dyn Fetcher) -> Result<Self, FetchError> {
    if fetcher.is_valid_origin(uri) {
      Ok(Self {
        uri,
        kind: fetcher.kind(),
      })
    } else {
      Err(FetchError::InvalidOrigin { uri: uri.to_string() })
    }
  }

  pub fn uri(&self) -> &'a str {
    self.uri
  }

  pub fn kind(&self) -> FetchKind {
    self.kind
  }
}

/// Capability set shared by every fetcher variant.
pub trait Fetcher: Product {
  /// Human-readable fetcher name (`mercurial`, `subversion`, `static`).
  fn name(&self) -> &'static str;

  /// The fetch kind this variant serves.
  fn kind(&self) -> FetchKind;

  /// URI schemes this variant accepts.
  fn schemes(&self) -> &'static [&'static str];

  /// Control directory proving a working copy belongs to this fetcher
  /// (`.hg`, `.svn`, `.download`).
  fn metadata_marker(&self) -> &'static str;

  /// Whether the URI's scheme is acceptable for this fetcher.
  fn is_valid_origin(&self, uri: &str) -> bool {
    uri_scheme(uri).is_some_and(|scheme| self.schemes().contains(&scheme))
  }

  /// Create a new working copy at `dest`.
  fn fetch(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError>;

  /// Refresh an existing working copy in place. If the recorded origin
  /// differs from `uri`, stale content is purged (except
  /// [`PROTECTED_SUBDIR`]) and the copy is re-established from `uri`.
  fn update(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError>;

  /// Whether the working copy at `dest` was fetched from somewhere else
  /// than `uri`.
  fn has_origin_changed(&self, uri: &str, dest: &Path) -> Result<bool, FetchError>;

  /// `update` when `dest` already carries this fetcher's metadata marker,
  /// `fetch` otherwise.
  fn fetch_or_update(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if dest.join(self.metadata_marker()).is_dir() {
      self.update(uri, dest, options)
    } else {
      self.fetch(uri, dest, options)
    }
  }
}

/// The built-in fetcher implementations, by name, for configuration
/// overrides.
pub fn builtin_constructors() -> Vec<NamedConstructor<dyn Fetcher>> {
  vec![
    ("hg", HgFetcher::constructor()),
    ("svn", SvnFetcher::constructor()),
    ("static", StaticFetcher::constructor()),
  ]
}

/// Extract the scheme of a URI, if it has one.
pub(crate) fn uri_scheme(uri: &str) -> Option<&str> {
  URI_SCHEME
    .captures(uri)
    .and_then(|captures| captures.get(1))
    .map(|scheme| scheme.as_str())
}

/// Resolve an executable spec: an absolute path is taken as-is (and must
/// exist), anything else is searched on PATH.
pub(crate) fn resolve_executable(spec: &str) -> Result<PathBuf, FetchError> {
  let path = Path::new(spec);
  if path.is_absolute() {
    if path.is_file() {
      return Ok(path.to_path_buf());
    }
    return Err(FetchError::ExecutableNotFound {
      name: spec.to_string(),
    });
  }
  which::which(spec).map_err(|_| FetchError::ExecutableNotFound {
    name: spec.to_string(),
  })
}

/// Run one tool invocation, returning trimmed stdout. A non-zero exit is a
/// [`FetchError::Runtime`] naming the fetcher and the command line.
pub(crate) fn run_tool<S: AsRef<OsStr>>(fetcher: &str, executable: &Path, args: &[S]) -> Result<String, FetchError> {
  let rendered = format!(
    "{} {}",
    executable.display(),
    args
      .iter()
      .map(|a| a.as_ref().to_string_lossy().into_owned())
      .collect::<Vec<_>>()
      .join(" ")
  );
  debug!(fetcher, command = %rendered, "running fetch command");

  let output = Command::new(executable)
    .args(args)
    .output()
    .map_err(|e| FetchError::Runtime {
      fetcher: fetcher.to_string(),
      command: rendered.clone(),
      detail: e.to_string(),
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(FetchError::Runtime {
      fetcher: fetcher.to_string(),
      command: rendered,
      detail: format!("exit code {:?}: {}", output.status.code(), stderr.trim()),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Remove everything directly under `dest` except the entries named in
/// `keep`. Missing destinations are fine.
pub(crate) fn purge_except(dest: &Path, keep: &[&str]) -> Result<(), FetchError> {
  if !dest.is_dir() {
    return Ok(());
  }
  warn!(dest = %dest.display(), "purging stale working copy content");

  let listing = fs::read_dir(dest).map_err(|e| FetchError::Io {
    path: dest.to_path_buf(),
    source: e,
  })?;
  for entry in listing {
    let entry = entry.map_err(|e| FetchError::Io {
      path: dest.to_path_buf(),
      source: e,
    })?;
    let file_name = entry.file_name();
    if keep.iter().any(|kept| file_name.to_str() == Some(*kept)) {
      continue;
    }
    let path = entry.path();
    let removed = if path.is_dir() {
      fs::remove_dir_all(&path)
    } else {
      fs::remove_file(&path)
    };
    removed.map_err(|e| FetchError::Io { path, source: e })?;
  }
  Ok(())
}

/// Compare two origin URIs, ignoring a trailing slash.
pub(crate) fn same_origin(recorded: &str, uri: &str) -> bool {
  recorded.trim().trim_end_matches('/') == uri.trim().trim_end_matches('/')
}
