//! Buildout maker: drives the `buildout` tool as a subprocess.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::ini::Section;
use crate::minibuild::{Category, Minibuild};
use crate::registry::{ComponentError, Constructor, Product};

use super::{MakeContext, MakeError, MakeOptions, Maker};

const DEFAULT_OPTIONS: &str = "-N -c buildout.cfg";

/// Thin shell around the `buildout` executable.
pub struct BuildoutMaker {
  executable: PathBuf,
  base_args: Vec<String>,
}

impl BuildoutMaker {
  /// Resolve the `buildout` executable (or an `executable` override) and
  /// read the base command line from the `options` key.
  pub fn new(section: &Section) -> Result<Self, MakeError> {
    let spec = section.get("executable").map(String::as_str).unwrap_or("buildout");
    let executable = crate::fetcher::resolve_executable(spec).map_err(|_| MakeError::ExecutableNotFound {
      name: spec.to_string(),
    })?;
    let base_args = section
      .get("options")
      .map(String::as_str)
      .unwrap_or(DEFAULT_OPTIONS)
      .split_whitespace()
      .map(str::to_string)
      .collect();
    Ok(Self { executable, base_args })
  }

  /// Constructor for factory registration.
  pub fn constructor() -> Constructor<dyn Maker> {
    std::sync::Arc::new(|section| {
      BuildoutMaker::new(section)
        .map(|maker| Box::new(maker) as Box<dyn Maker>)
        .map_err(|e| ComponentError::Construction {
          key: "buildout".to_string(),
          source: Box::new(e),
        })
    })
  }

  fn run(&self, directory: &Path, options: &MakeOptions) -> Result<(), io::Error> {
    let mut args = self.base_args.clone();
    if options.offline {
      args.push("-o".to_string());
    }
    args.extend(options.extra_args.iter().cloned());
    if !options.parts.is_empty() {
      args.push("install".to_string());
      args.extend(options.parts.iter().cloned());
    }
    debug!(directory = %directory.display(), ?args, "running buildout");

    let output = Command::new(&self.executable).args(&args).current_dir(directory).output()?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(io::Error::other(format!(
        "buildout exited with {:?}: {}",
        output.status.code(),
        stderr.trim()
      )));
    }
    Ok(())
  }
}

impl Product for BuildoutMaker {
  fn matches(&self, switch: &str) -> bool {
    switch == "buildout"
  }
}

impl Maker for BuildoutMaker {
  fn name(&self) -> &'static str {
    "buildout"
  }

  fn install(&self, directory: &Path, options: &MakeOptions) -> Result<(), MakeError> {
    info!(directory = %directory.display(), "installing with buildout");
    self.run(directory, options).map_err(|e| MakeError::Install {
      directory: directory.to_path_buf(),
      detail: e.to_string(),
    })
  }

  /// Erase `.installed.cfg` so buildout rebuilds every part, then install.
  fn reinstall(&self, directory: &Path, options: &MakeOptions) -> Result<(), MakeError> {
    let installed = directory.join(".installed.cfg");
    match fs::remove_file(&installed) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => {
        return Err(MakeError::Reinstall {
          directory: directory.to_path_buf(),
          detail: e.to_string(),
        });
      }
    }
    self.run(directory, options).map_err(|e| MakeError::Reinstall {
      directory: directory.to_path_buf(),
      detail: e.to_string(),
    })
  }

  fn options_for(&self, context: &MakeContext<'_>, minibuild: &Minibuild) -> MakeOptions {
    // Dependency-category packages install only their 'part' part; the
    // rest of their buildout is scaffolding for other packages.
    let parts = match minibuild.metadata().ok().and_then(|m| m.category) {
      Some(Category::Dependencies) => vec!["part".to_string()],
      _ => Vec::new(),
    };
    MakeOptions {
      offline: context.offline,
      parts,
      extra_args: Vec::new(),
    }
  }
}
