//! Makers: the external builder boundary.
//!
//! A maker turns a fetched source tree into an installed artifact. The
//! engine only consumes this interface: one call per resolved package,
//! against the install path derived from the prefix, the package's category
//! and its name. The [`buildout`] module ships the one built-in
//! implementation as a thin subprocess shell.

pub mod buildout;

pub use buildout::BuildoutMaker;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use thiserror::Error;

use crate::minibuild::Minibuild;
use crate::registry::{NamedConstructor, Product};

/// Errors raised by maker operations.
#[derive(Debug, Error)]
pub enum MakeError {
  /// The install step failed.
  #[error("install failed in '{}': {detail}", directory.display())]
  Install { directory: PathBuf, detail: String },

  /// The reinstall step failed.
  #[error("reinstall failed in '{}': {detail}", directory.display())]
  Reinstall { directory: PathBuf, detail: String },

  /// The package directory could not be removed.
  #[error("cannot remove '{}': {source}", directory.display())]
  Delete {
    directory: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The maker's executable could not be resolved at construction.
  #[error("'{name}' is not in your PATH, install it or point the maker at it")]
  ExecutableNotFound { name: String },
}

/// Options for one maker invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeOptions {
  /// Do not let the build tool touch the network.
  pub offline: bool,
  /// Restrict the build to these parts, when non-empty.
  pub parts: Vec<String>,
  /// Extra command line arguments for the build tool.
  pub extra_args: Vec<String>,
}

/// Session facts a maker may consult when deriving its options.
#[derive(Debug, Clone, Copy)]
pub struct MakeContext<'a> {
  pub prefix: &'a Path,
  pub offline: bool,
}

/// The builder collaborator interface.
pub trait Maker: Product {
  fn name(&self) -> &'static str;

  /// Build and install the package living in `directory`.
  fn install(&self, directory: &Path, options: &MakeOptions) -> Result<(), MakeError>;

  /// Force a rebuild of an already-installed package.
  fn reinstall(&self, directory: &Path, options: &MakeOptions) -> Result<(), MakeError>;

  /// Remove an installed package directory. Missing directories are fine.
  fn delete(&self, directory: &Path) -> Result<(), MakeError> {
    info!(directory = %directory.display(), "uninstalling");
    if directory.is_dir() {
      fs::remove_dir_all(directory).map_err(|e| MakeError::Delete {
        directory: directory.to_path_buf(),
        source: e,
      })?;
    }
    Ok(())
  }

  /// Derive the options for building `minibuild` in this session.
  fn options_for(&self, context: &MakeContext<'_>, minibuild: &Minibuild) -> MakeOptions;
}

/// The built-in maker implementations, by name, for configuration
/// overrides.
pub fn builtin_constructors() -> Vec<NamedConstructor<dyn Maker>> {
  vec![("buildout", BuildoutMaker::constructor())]
}
