//! Minibuild descriptors: one package's metadata file.
//!
//! A minibuild is a sections file with a single `[minibuild]` section
//! carrying the package's dependencies, fetch origin and install method.
//! Construction is cheap (path plus derived name, no I/O); the metadata is
//! parsed on first access and the outcome, loaded or failed, is cached on
//! the instance, so a broken descriptor reports the same error on every
//! access without re-reading the file.

pub mod name;

use std::cell::OnceCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ini::{Section, Sections};

/// The section a descriptor file must carry.
pub const DESCRIPTOR_SECTION: &str = "minibuild";

/// How a package's source is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
  /// Mercurial working copy.
  Hg,
  /// Subversion working copy.
  Svn,
  /// Static download over file/http/https.
  Static,
}

impl FetchKind {
  pub const ALL: [FetchKind; 3] = [FetchKind::Hg, FetchKind::Svn, FetchKind::Static];

  pub fn as_str(self) -> &'static str {
    match self {
      FetchKind::Hg => "hg",
      FetchKind::Svn => "svn",
      FetchKind::Static => "static",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.as_str() == value)
  }
}

impl fmt::Display for FetchKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How a fetched source tree is turned into an installed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
  Buildout,
}

impl InstallMethod {
  pub const ALL: [InstallMethod; 1] = [InstallMethod::Buildout];

  pub fn as_str(self) -> &'static str {
    match self {
      InstallMethod::Buildout => "buildout",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|method| method.as_str() == value)
  }
}

impl fmt::Display for InstallMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The install-path class a package belongs to under the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Meta,
  Instances,
  Eggs,
  Dependencies,
  Zope,
  Django,
  Tg,
}

impl Category {
  pub const ALL: [Category; 7] = [
    Category::Meta,
    Category::Instances,
    Category::Eggs,
    Category::Dependencies,
    Category::Zope,
    Category::Django,
    Category::Tg,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Category::Meta => "meta",
      Category::Instances => "instances",
      Category::Eggs => "eggs",
      Category::Dependencies => "dependencies",
      Category::Zope => "zope",
      Category::Django => "django",
      Category::Tg => "tg",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|category| category.as_str() == value)
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors raised while loading a minibuild descriptor.
///
/// `Clone` because a failed load is cached on the descriptor and handed back
/// on every later metadata access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MinibuildError {
  /// The file could not be read or parsed as a sections file.
  #[error("invalid descriptor file '{}': {detail}", path.display())]
  InvalidFormat { path: PathBuf, detail: String },

  /// No `[minibuild]` section in the file.
  #[error("'{}' has no [minibuild] section", path.display())]
  MissingSection { path: PathBuf },

  /// The file name fails the minibuild name grammar.
  #[error("invalid minibuild name: '{name}'")]
  InvalidName { name: String },

  /// `src_uri` was given without `src_type`.
  #[error("'{}' sets src_uri but no src_type", path.display())]
  MissingFetchKind { path: PathBuf },

  /// `src_type` is outside the supported fetch kinds.
  #[error("the '{kind}' src_type is invalid in '{}'", path.display())]
  InvalidFetchKind { kind: String, path: PathBuf },

  /// `category` is outside the valid categories.
  #[error("the '{category}' category is invalid in '{}'", path.display())]
  InvalidCategory { category: String, path: PathBuf },

  /// `install_method` is outside the supported install methods.
  #[error("the '{method}' install method is invalid in '{}'", path.display())]
  InvalidInstallMethod { method: String, path: PathBuf },

  /// `src_uri` was given without `category`.
  #[error("'{}' sets src_uri but no category to install into", path.display())]
  MissingCategory { path: PathBuf },

  /// Neither `install_method` nor `depends` is present.
  #[error("'{}' has no install method and no dependencies", path.display())]
  Empty { path: PathBuf },
}

/// A descriptor's parsed metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
  /// Dependency names, in declaration order, duplicates removed,
  /// OS-conditional extras (`depends-<os>`) merged in.
  pub dependencies: Vec<String>,
  pub install_method: Option<InstallMethod>,
  pub src_uri: Option<String>,
  pub src_type: Option<FetchKind>,
  /// Opaque extra arguments forwarded to the fetcher.
  pub src_opts: Option<String>,
  /// Expected hex digest of a static download.
  pub src_sha256: Option<String>,
  pub category: Option<Category>,
  /// Project homepage.
  pub url: Option<String>,
  pub description: Option<String>,
}

/// Load state of a descriptor's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState<'a> {
  /// The descriptor file has not been touched yet.
  Unloaded,
  /// The descriptor parsed and validated.
  Loaded(&'a Metadata),
  /// Loading failed; the error is cached.
  Failed(&'a MinibuildError),
}

/// One package descriptor.
#[derive(Debug)]
pub struct Minibuild {
  path: PathBuf,
  name: String,
  metadata: OnceCell<Result<Metadata, MinibuildError>>,
}

impl Minibuild {
  /// Create a descriptor for `path`. The name is the final path segment;
  /// nothing is read from disk until the metadata is first accessed.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    Self {
      path,
      name,
      metadata: OnceCell::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Current load state, without triggering a load.
  pub fn state(&self) -> LoadState<'_> {
    match self.metadata.get() {
      None => LoadState::Unloaded,
      Some(Ok(metadata)) => LoadState::Loaded(metadata),
      Some(Err(error)) => LoadState::Failed(error),
    }
  }

  /// The parsed metadata, loading the descriptor file on first access.
  ///
  /// A failed load is terminal for the instance: the same error comes back
  /// on every call until [`Minibuild::reload`].
  pub fn metadata(&self) -> Result<&Metadata, MinibuildError> {
    self
      .metadata
      .get_or_init(|| load(&self.path, &self.name))
      .as_ref()
      .map_err(Clone::clone)
  }

  /// The declared dependency names, loading the descriptor if needed.
  pub fn dependencies(&self) -> Result<&[String], MinibuildError> {
    Ok(self.metadata()?.dependencies.as_slice())
  }

  /// Discard any cached state and parse the descriptor file again.
  pub fn reload(&mut self) -> Result<&Metadata, MinibuildError> {
    self.metadata = OnceCell::new();
    self.metadata()
  }
}

fn load(path: &Path, name: &str) -> Result<Metadata, MinibuildError> {
  // The name gates everything else: a misnamed file is rejected before its
  // content is even read.
  if !name::is_valid(name) {
    return Err(MinibuildError::InvalidName {
      name: name.to_string(),
    });
  }

  let content = fs::read_to_string(path).map_err(|e| MinibuildError::InvalidFormat {
    path: path.to_path_buf(),
    detail: e.to_string(),
  })?;
  let sections = Sections::parse(&content).map_err(|e| MinibuildError::InvalidFormat {
    path: path.to_path_buf(),
    detail: e.to_string(),
  })?;
  let section = sections.get(DESCRIPTOR_SECTION).ok_or(MinibuildError::MissingSection {
    path: path.to_path_buf(),
  })?;

  let metadata = parse_section(path, section)?;
  debug!(name, path = %path.display(), "loaded minibuild");
  Ok(metadata)
}

fn parse_section(path: &Path, section: &Section) -> Result<Metadata, MinibuildError> {
  let mut metadata = Metadata::default();

  if let Some(depends) = section.get("depends") {
    merge_dependencies(&mut metadata.dependencies, depends);
  }
  let os_key = format!("depends-{}", std::env::consts::OS);
  if let Some(extra) = section.get(&os_key) {
    merge_dependencies(&mut metadata.dependencies, extra);
  }

  if let Some(method) = value(section, "install_method") {
    metadata.install_method = Some(InstallMethod::parse(method).ok_or_else(|| {
      MinibuildError::InvalidInstallMethod {
        method: method.to_string(),
        path: path.to_path_buf(),
      }
    })?);
  }

  if let Some(uri) = value(section, "src_uri") {
    metadata.src_uri = Some(uri.to_string());
    // A fetchable package needs a fetch kind and somewhere to install into.
    let kind = value(section, "src_type").ok_or(MinibuildError::MissingFetchKind {
      path: path.to_path_buf(),
    })?;
    metadata.src_type = Some(FetchKind::parse(kind).ok_or_else(|| MinibuildError::InvalidFetchKind {
      kind: kind.to_string(),
      path: path.to_path_buf(),
    })?);
    metadata.src_opts = value(section, "src_opts").map(str::to_string);
    metadata.src_sha256 = value(section, "src_sha256").map(str::to_string);
    let category = value(section, "category").ok_or(MinibuildError::MissingCategory {
      path: path.to_path_buf(),
    })?;
    metadata.category = Some(Category::parse(category).ok_or_else(|| MinibuildError::InvalidCategory {
      category: category.to_string(),
      path: path.to_path_buf(),
    })?);
  }

  metadata.url = value(section, "url").map(str::to_string);
  metadata.description = value(section, "description").map(str::to_string);

  // A descriptor that neither installs anything nor aggregates dependencies
  // has no reason to exist.
  if metadata.install_method.is_none() && metadata.dependencies.is_empty() {
    return Err(MinibuildError::Empty {
      path: path.to_path_buf(),
    });
  }

  Ok(metadata)
}

fn value<'a>(section: &'a Section, key: &str) -> Option<&'a str> {
  section.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn merge_dependencies(dependencies: &mut Vec<String>, list: &str) {
  for dep in list.split_whitespace() {
    if !dependencies.iter().any(|existing| existing == dep) {
      dependencies.push(dep.to_string());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn descriptor(dir: &TempDir, name: &str, content: &str) -> Minibuild {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    Minibuild::new(path)
  }

  const FULL: &str = "[minibuild]\n\
    depends = python-2.4\n\
    src_uri = https://example.com/elementtreewriter-1.0/\n\
    src_type = hg\n\
    install_method = buildout\n\
    category = eggs\n";

  mod loading {
    use super::*;

    #[test]
    fn construction_does_no_io() {
      let mb = Minibuild::new("/nowhere/at/all/iamatest-1.0");
      assert_eq!(mb.name(), "iamatest-1.0");
      assert_eq!(mb.state(), LoadState::Unloaded);
    }

    #[test]
    fn full_descriptor_loads() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "iamatest-1.0", FULL);

      let metadata = mb.metadata().unwrap();
      assert_eq!(metadata.dependencies, vec!["python-2.4".to_string()]);
      assert_eq!(metadata.src_type, Some(FetchKind::Hg));
      assert_eq!(metadata.install_method, Some(InstallMethod::Buildout));
      assert_eq!(metadata.category, Some(Category::Eggs));
      assert!(matches!(mb.state(), LoadState::Loaded(_)));
    }

    #[test]
    fn failed_load_is_cached() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "iamatest-1.0", "[nothere]\ndepends = x-1.0\n");

      let first = mb.metadata().unwrap_err();
      assert!(matches!(first, MinibuildError::MissingSection { .. }));

      // Even with the file fixed on disk, the cached error sticks.
      fs::write(mb.path(), FULL).unwrap();
      let second = mb.metadata().unwrap_err();
      assert_eq!(first, second);
      assert!(matches!(mb.state(), LoadState::Failed(_)));
    }

    #[test]
    fn reload_parses_afresh() {
      let dir = TempDir::new().unwrap();
      let mut mb = descriptor(&dir, "iamatest-1.0", "[nothere]\ndepends = x-1.0\n");
      mb.metadata().unwrap_err();

      fs::write(mb.path(), FULL).unwrap();
      assert!(mb.reload().is_ok());
    }

    #[test]
    fn bad_name_wins_over_bad_content() {
      let dir = TempDir::new().unwrap();
      // Content is unparsable too, but the name check runs first.
      let mb = descriptor(&dir, "notavalidname", "not a descriptor at all\n");
      assert!(matches!(
        mb.metadata().unwrap_err(),
        MinibuildError::InvalidName { name } if name == "notavalidname"
      ));
    }
  }

  mod validation {
    use super::*;

    #[test]
    fn unparsable_file_is_invalid_format() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "iamatest-1.0", "depends = x-1.0\n");
      assert!(matches!(mb.metadata().unwrap_err(), MinibuildError::InvalidFormat { .. }));
    }

    #[test]
    fn missing_file_is_invalid_format() {
      let mb = Minibuild::new("/nowhere/at/all/iamatest-1.0");
      assert!(matches!(mb.metadata().unwrap_err(), MinibuildError::InvalidFormat { .. }));
    }

    #[test]
    fn src_uri_without_src_type() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "iamatest-1.0",
        "[minibuild]\ncategory = eggs\ndepends = python-2.4\ninstall_method = buildout\nsrc_uri = https://example.com/x\n",
      );
      assert!(matches!(mb.metadata().unwrap_err(), MinibuildError::MissingFetchKind { .. }));
    }

    #[test]
    fn unknown_src_type() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "iamatest-1.0",
        "[minibuild]\ncategory = eggs\nsrc_type = cvs\nsrc_uri = https://example.com/x\n",
      );
      assert!(matches!(
        mb.metadata().unwrap_err(),
        MinibuildError::InvalidFetchKind { kind, .. } if kind == "cvs"
      ));
    }

    #[test]
    fn src_uri_without_category() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "iamatest-1.0",
        "[minibuild]\nsrc_type = hg\nsrc_uri = https://example.com/x\ninstall_method = buildout\n",
      );
      assert!(matches!(mb.metadata().unwrap_err(), MinibuildError::MissingCategory { .. }));
    }

    #[test]
    fn unknown_category() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "iamatest-1.0",
        "[minibuild]\nsrc_type = hg\nsrc_uri = https://example.com/x\ncategory = nowhere\n",
      );
      assert!(matches!(
        mb.metadata().unwrap_err(),
        MinibuildError::InvalidCategory { category, .. } if category == "nowhere"
      ));
    }

    #[test]
    fn unknown_install_method() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "iamatest-1.0", "[minibuild]\ninstall_method = make\n");
      assert!(matches!(
        mb.metadata().unwrap_err(),
        MinibuildError::InvalidInstallMethod { method, .. } if method == "make"
      ));
    }

    #[test]
    fn empty_descriptor() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "iamatest-1.0", "[minibuild]\nurl = https://example.com\n");
      assert!(matches!(mb.metadata().unwrap_err(), MinibuildError::Empty { .. }));
    }

    #[test]
    fn depends_only_is_a_valid_meta_package() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(&dir, "meta-site", "[minibuild]\ndepends = python-2.4 zope-2.10\n");
      let metadata = mb.metadata().unwrap();
      assert!(metadata.install_method.is_none());
      assert_eq!(metadata.dependencies.len(), 2);
    }
  }

  mod dependencies {
    use super::*;

    #[test]
    fn duplicates_are_removed_in_order() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "meta-dup",
        "[minibuild]\ndepends = a-1.0 b-1.0 a-1.0 c-1.0 b-1.0\n",
      );
      assert_eq!(mb.dependencies().unwrap(), ["a-1.0", "b-1.0", "c-1.0"]);
    }

    #[test]
    fn os_conditional_dependencies_are_merged() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "meta-os",
        &format!(
          "[minibuild]\ndepends = a-1.0\ndepends-{} = b-1.0 a-1.0\ndepends-notanos = z-1.0\n",
          std::env::consts::OS
        ),
      );
      assert_eq!(mb.dependencies().unwrap(), ["a-1.0", "b-1.0"]);
    }

    #[test]
    fn src_opts_are_passed_through_opaque() {
      let dir = TempDir::new().unwrap();
      let mb = descriptor(
        &dir,
        "iamatest-1.0",
        "[minibuild]\ncategory = eggs\nsrc_type = hg\nsrc_uri = https://example.com/x\nsrc_opts = -r666\ninstall_method = buildout\n",
      );
      assert_eq!(mb.metadata().unwrap().src_opts.as_deref(), Some("-r666"));
    }
  }
}
