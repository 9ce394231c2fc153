//! Static download fetcher (file/http/https).
//!
//! Unlike the VCS fetchers there is no working-copy state to reconcile:
//! plain HTTP gives no reliable way to tell whether the origin changed, so
//! every update is treated as a fresh fetch and the origin always counts as
//! changed. The `.download` marker subdirectory doubles as the protected
//! area that purges leave alone.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::ini::Section;
use crate::minibuild::FetchKind;
use crate::registry::{ComponentError, Constructor, Product};

use super::{FetchError, FetchOptions, Fetcher, PROTECTED_SUBDIR, purge_except, uri_scheme};

const SCHEMES: &[&str] = &["file", "http", "https"];

/// Downloads one file per package from a static origin.
pub struct StaticFetcher {
  proxy: Option<String>,
}

impl StaticFetcher {
  /// Build the fetcher; an `http-proxy` key in the configuration section
  /// routes downloads through that proxy.
  pub fn new(section: &Section) -> Result<Self, FetchError> {
    let proxy = section
      .get("http-proxy")
      .map(|value| value.trim().to_string())
      .filter(|value| !value.is_empty());
    Ok(Self { proxy })
  }

  /// Constructor for factory registration.
  pub fn constructor() -> Constructor<dyn Fetcher> {
    std::sync::Arc::new(|section| {
      StaticFetcher::new(section)
        .map(|fetcher| Box::new(fetcher) as Box<dyn Fetcher>)
        .map_err(|e| ComponentError::Construction {
          key: "static".to_string(),
          source: Box::new(e),
        })
    })
  }

  fn download(&self, uri: &str, target: &Path) -> Result<(), FetchError> {
    let wrap = |source: reqwest::Error| FetchError::Download {
      uri: uri.to_string(),
      source: Box::new(source),
    };

    let mut builder = reqwest::blocking::Client::builder();
    if let Some(proxy) = &self.proxy {
      debug!(proxy, "downloading through proxy");
      builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(wrap)?);
    }
    let client = builder.build().map_err(wrap)?;

    let response = client.get(uri).send().map_err(wrap)?.error_for_status().map_err(wrap)?;
    let body = response.bytes().map_err(wrap)?;
    fs::write(target, &body).map_err(|e| FetchError::Io {
      path: target.to_path_buf(),
      source: e,
    })?;
    Ok(())
  }

  fn verify_checksum(&self, target: &Path, expected: &str) -> Result<(), FetchError> {
    let content = fs::read(target).map_err(|e| FetchError::Io {
      path: target.to_path_buf(),
      source: e,
    })?;
    let actual = hex::encode(Sha256::digest(&content));
    if actual.eq_ignore_ascii_case(expected) {
      return Ok(());
    }
    // Leave no corrupt artifact behind for the next run to trust.
    let _ = fs::remove_file(target);
    Err(FetchError::ChecksumMismatch {
      file: target.to_path_buf(),
      expected: expected.to_string(),
      actual,
    })
  }
}

impl Product for StaticFetcher {
  fn matches(&self, switch: &str) -> bool {
    matches!(switch, "static" | "file" | "http" | "https")
  }
}

impl Fetcher for StaticFetcher {
  fn name(&self) -> &'static str {
    "static"
  }

  fn kind(&self) -> FetchKind {
    FetchKind::Static
  }

  fn schemes(&self) -> &'static [&'static str] {
    SCHEMES
  }

  fn metadata_marker(&self) -> &'static str {
    PROTECTED_SUBDIR
  }

  fn fetch(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if !self.is_valid_origin(uri) {
      return Err(FetchError::InvalidOrigin { uri: uri.to_string() });
    }
    if options.offline {
      return Err(FetchError::Offline { uri: uri.to_string() });
    }
    let file_name = uri
      .trim_end_matches('/')
      .rsplit('/')
      .next()
      .filter(|name| !name.is_empty())
      .ok_or_else(|| FetchError::InvalidOrigin { uri: uri.to_string() })?;

    let marker = dest.join(PROTECTED_SUBDIR);
    fs::create_dir_all(&marker).map_err(|e| FetchError::Io {
      path: marker,
      source: e,
    })?;

    let target = dest.join(file_name);
    info!(uri, target = %target.display(), "fetching static source");

    if uri_scheme(uri) == Some("file") {
      let source = PathBuf::from(uri.trim_start_matches("file://"));
      fs::copy(&source, &target).map_err(|e| FetchError::FetchFailed {
        uri: uri.to_string(),
        dest: dest.to_path_buf(),
        detail: format!("cannot copy '{}': {e}", source.display()),
      })?;
    } else {
      self.download(uri, &target)?;
    }

    if let Some(expected) = &options.sha256 {
      self.verify_checksum(&target, expected)?;
    }
    Ok(())
  }

  fn update(&self, uri: &str, dest: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if !self.is_valid_origin(uri) {
      return Err(FetchError::InvalidOrigin { uri: uri.to_string() });
    }
    if options.offline {
      debug!(uri, dest = %dest.display(), "offline, keeping downloaded content as-is");
      return Ok(());
    }
    purge_except(dest, &[PROTECTED_SUBDIR])?;
    self.fetch(uri, dest, options)
  }

  fn has_origin_changed(&self, _uri: &str, _dest: &Path) -> Result<bool, FetchError> {
    // No way to tell over plain HTTP; assume it did.
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn fetcher() -> StaticFetcher {
    StaticFetcher::new(&Section::new()).unwrap()
  }

  fn file_origin(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    format!("file://{}", path.display())
  }

  #[test]
  fn origin_validation() {
    let static_fetcher = fetcher();
    for uri in [
      "http://example.com/pkg.tar.gz",
      "https://example.com/pkg.tar.gz",
      "file:///srv/mirror/pkg.tar.gz",
    ] {
      assert!(static_fetcher.is_valid_origin(uri), "expected '{uri}' to be valid");
    }
    for uri in ["ftp://example.com/pkg.tar.gz", "hg://example.com/repo", "pkg.tar.gz"] {
      assert!(!static_fetcher.is_valid_origin(uri), "expected '{uri}' to be invalid");
    }
  }

  #[test]
  fn matches_static_and_transport_switches() {
    let static_fetcher = fetcher();
    for switch in ["static", "file", "http", "https"] {
      assert!(static_fetcher.matches(switch));
    }
    assert!(!static_fetcher.matches("hg"));
  }

  #[test]
  fn fetch_materializes_the_file_and_the_marker() {
    let source_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let dest = dest_dir.path().join("pkg");
    let uri = file_origin(&source_dir, "pkg.tar.gz", "tarball bytes");

    fetcher().fetch(&uri, &dest, &FetchOptions::default()).unwrap();

    assert_eq!(fs::read_to_string(dest.join("pkg.tar.gz")).unwrap(), "tarball bytes");
    assert!(dest.join(PROTECTED_SUBDIR).is_dir());
  }

  #[test]
  fn fetch_or_update_dispatches_on_the_marker() {
    let source_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let dest = dest_dir.path().join("pkg");
    let uri = file_origin(&source_dir, "pkg.tar.gz", "first");

    let static_fetcher = fetcher();
    static_fetcher.fetch_or_update(&uri, &dest, &FetchOptions::default()).unwrap();

    // Second round goes through update: stale content is purged, the
    // protected area survives.
    fs::write(dest.join("stale.txt"), "left over").unwrap();
    fs::write(dest.join(PROTECTED_SUBDIR).join("artifact"), "kept").unwrap();
    let uri = file_origin(&source_dir, "pkg.tar.gz", "second");
    static_fetcher.fetch_or_update(&uri, &dest, &FetchOptions::default()).unwrap();

    assert_eq!(fs::read_to_string(dest.join("pkg.tar.gz")).unwrap(), "second");
    assert!(!dest.join("stale.txt").exists());
    assert_eq!(
      fs::read_to_string(dest.join(PROTECTED_SUBDIR).join("artifact")).unwrap(),
      "kept"
    );
  }

  #[test]
  fn update_always_sees_a_changed_origin() {
    let dest = TempDir::new().unwrap();
    assert!(fetcher().has_origin_changed("http://example.com/x", dest.path()).unwrap());
  }

  #[test]
  fn offline_fetch_fails_fast() {
    let dest_dir = TempDir::new().unwrap();
    let error = fetcher()
      .fetch(
        "https://example.com/pkg.tar.gz",
        &dest_dir.path().join("pkg"),
        &FetchOptions::offline(true),
      )
      .unwrap_err();
    assert!(matches!(error, FetchError::Offline { .. }));
    // Fail-fast means no half-created destination either.
    assert!(!dest_dir.path().join("pkg").exists());
  }

  #[test]
  fn checksum_match_passes() {
    let source_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let dest = dest_dir.path().join("pkg");
    let uri = file_origin(&source_dir, "pkg.bin", "payload");

    let options = FetchOptions {
      sha256: Some(hex::encode(Sha256::digest(b"payload"))),
      ..FetchOptions::default()
    };
    fetcher().fetch(&uri, &dest, &options).unwrap();
    assert!(dest.join("pkg.bin").exists());
  }

  #[test]
  fn checksum_mismatch_removes_the_file() {
    let source_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let dest = dest_dir.path().join("pkg");
    let uri = file_origin(&source_dir, "pkg.bin", "payload");

    let options = FetchOptions {
      sha256: Some("0".repeat(64)),
      ..FetchOptions::default()
    };
    let error = fetcher().fetch(&uri, &dest, &options).unwrap_err();
    assert!(matches!(error, FetchError::ChecksumMismatch { .. }));
    assert!(!dest.join("pkg.bin").exists());
  }

  #[test]
  fn missing_file_origin_is_a_fetch_failure() {
    let dest_dir = TempDir::new().unwrap();
    let error = fetcher()
      .fetch(
        "file:///nowhere/pkg.tar.gz",
        &dest_dir.path().join("pkg"),
        &FetchOptions::default(),
      )
      .unwrap_err();
    assert!(matches!(error, FetchError::FetchFailed { .. }));
  }
}
