//! The merge session: resolve, fetch, make.
//!
//! [`Minimerge`] composes the minilays, the resolver and the two component
//! factories into one end-to-end run. Packages are processed strictly in
//! resolved order, since later packages may rely on earlier ones having
//! already materialized under the prefix. A coarse [`CancelToken`] is
//! checked between packages, never mid-fetch.

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Action, Config};
use crate::fetcher::{self, FetchError, FetchOptions, FetchOrigin, Fetcher};
use crate::maker::{self, MakeContext, MakeError, Maker};
use crate::minibuild::Minibuild;
use crate::minilay::{Minilay, MinilayError};
use crate::registry::{ComponentError, Factory};
use crate::resolver::{self, ResolveError};

/// Cooperative cancellation flag for a running session.
///
/// Cancelling takes effect before the next package's fetch/build step
/// starts; in-flight tool invocations are not interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Errors raised while preparing or running a session.
#[derive(Debug, Error)]
pub enum SessionError {
  #[error("no packages were given to process")]
  NoPackages,

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Component(#[from] ComponentError),

  #[error(transparent)]
  Minilay(#[from] MinilayError),

  /// No registered fetcher claimed the package's source kind.
  #[error("no fetcher available for source kind '{kind}' (check the [fetchers] configuration)")]
  NoFetcher { kind: String },

  /// No registered maker claimed the package's install method.
  #[error("no maker available for install method '{method}' (check the [makers] configuration)")]
  NoMaker { method: String },

  #[error("failed to fetch '{package}': {source}")]
  Fetch {
    package: String,
    #[source]
    source: FetchError,
  },

  #[error("failed to make '{package}': {source}")]
  Make {
    package: String,
    #[source]
    source: MakeError,
  },

  /// The jump target is not part of the resolved sequence.
  #[error("cannot jump to '{0}': not in the resolved sequence")]
  JumpNotFound(String),

  #[error("session cancelled before '{0}'")]
  Cancelled(String),

  /// A directory under the prefix could not be prepared.
  #[error("failed to prepare '{}': {source}", path.display())]
  Workspace {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// What one session run did.
#[derive(Debug, Default, Serialize)]
pub struct SessionSummary {
  pub action: Action,
  /// Every package processed, in processing order.
  pub processed: Vec<String>,
  /// Packages whose source was fetched or refreshed.
  pub fetched: Vec<String>,
  /// Packages the maker ran for.
  pub made: Vec<String>,
}

/// One merge session.
pub struct Minimerge {
  config: Config,
  minilays: Vec<Minilay>,
  fetchers: Factory<dyn Fetcher>,
  makers: Factory<dyn Maker>,
  cancel: CancelToken,
}

impl Minimerge {
  /// Build a session: discover minilays and wire the component factories
  /// (built-ins first, then configuration overrides).
  pub fn new(config: Config) -> Result<Self, SessionError> {
    let minilays = discover_minilays(&config)?;
    info!(
      minilays = minilays.len(),
      prefix = %config.prefix.display(),
      "session ready"
    );

    let mut fetchers = Factory::with_sections("fetchers", config.sections.clone());
    fetchers.register("hg", fetcher::HgFetcher::constructor());
    fetchers.register("svn", fetcher::SvnFetcher::constructor());
    fetchers.register("static", fetcher::StaticFetcher::constructor());
    if let Some(overrides) = config.fetcher_overrides() {
      fetchers.register_all(overrides, &fetcher::builtin_constructors())?;
    }

    let mut makers = Factory::with_sections("makers", config.sections.clone());
    makers.register("buildout", maker::BuildoutMaker::constructor());
    if let Some(overrides) = config.maker_overrides() {
      makers.register_all(overrides, &maker::builtin_constructors())?;
    }

    Ok(Self {
      config,
      minilays,
      fetchers,
      makers,
      cancel: CancelToken::default(),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn minilays(&self) -> &[Minilay] {
    &self.minilays
  }

  /// A handle other threads can use to stop the session between packages.
  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// The fetcher factory, for embedders registering their own variants.
  pub fn fetchers_mut(&mut self) -> &mut Factory<dyn Fetcher> {
    &mut self.fetchers
  }

  /// The maker factory, for embedders registering their own backends.
  pub fn makers_mut(&mut self) -> &mut Factory<dyn Maker> {
    &mut self.makers
  }

  /// Find one descriptor across the configured minilays.
  pub fn find_minibuild(&self, name: &str) -> Result<&Minibuild, ResolveError> {
    resolver::find(name, &self.minilays)
  }

  /// Resolve the full installation-ordered closure of `names`.
  pub fn compute_dependencies(&self, names: &[String]) -> Result<Vec<&Minibuild>, ResolveError> {
    resolver::resolve(names, &self.minilays)
  }

  /// Where a package lives under the prefix, when it has a category.
  pub fn install_path(&self, minibuild: &Minibuild) -> Option<PathBuf> {
    let category = minibuild.metadata().ok()?.category?;
    Some(self.config.prefix.join(category.as_str()).join(minibuild.name()))
  }

  /// Run one end-to-end session and report what was done.
  pub fn run(&self) -> Result<SessionSummary, SessionError> {
    if self.config.packages.is_empty() {
      return Err(SessionError::NoPackages);
    }
    info!(
      action = %self.config.action,
      packages = ?self.config.packages,
      offline = self.config.offline,
      "starting session"
    );

    let mut sequence: Vec<&Minibuild> = if self.config.nodeps {
      self
        .config
        .packages
        .iter()
        .map(|name| self.find_minibuild(name))
        .collect::<Result<_, _>>()?
    } else {
      self.compute_dependencies(&self.config.packages)?
    };

    if let Some(jump) = &self.config.jump {
      let index = sequence
        .iter()
        .position(|mb| mb.name() == jump)
        .ok_or_else(|| SessionError::JumpNotFound(jump.clone()))?;
      debug!(jump, skipped = index + 1, "resuming after jump target");
      sequence.drain(..=index);
    }

    // Deletion goes dependents-first.
    if self.config.action == Action::Delete {
      sequence.reverse();
    }

    let mut summary = SessionSummary {
      action: self.config.action,
      ..SessionSummary::default()
    };
    for minibuild in sequence {
      if self.cancel.is_cancelled() {
        warn!(package = minibuild.name(), "session cancelled");
        return Err(SessionError::Cancelled(minibuild.name().to_string()));
      }
      self.process(minibuild, &mut summary)?;
    }

    info!(
      processed = summary.processed.len(),
      fetched = summary.fetched.len(),
      made = summary.made.len(),
      "session complete"
    );
    Ok(summary)
  }

  fn process(&self, minibuild: &Minibuild, summary: &mut SessionSummary) -> Result<(), SessionError> {
    let name = minibuild.name().to_string();
    let metadata = minibuild.metadata().map_err(|e| {
      SessionError::Resolve(ResolveError::Descriptor {
        name: name.clone(),
        source: e,
      })
    })?;
    summary.processed.push(name.clone());

    // Fetch step: only for packages with a source, and pointless when the
    // goal is to delete them.
    if self.config.action != Action::Delete
      && let (Some(uri), Some(kind)) = (&metadata.src_uri, metadata.src_type)
    {
      let Some(dest) = self.install_path(minibuild) else {
        // Unreachable for a validated descriptor (src_uri implies a
        // category), but a custom caller could hand us anything.
        warn!(package = %name, "source with no category, skipping fetch");
        return Ok(());
      };
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| SessionError::Workspace {
          path: parent.to_path_buf(),
          source: e,
        })?;
      }

      let fetcher = self
        .fetchers
        .create(kind.as_str())?
        .ok_or_else(|| SessionError::NoFetcher {
          kind: kind.as_str().to_string(),
        })?;
      let origin = FetchOrigin::validate(uri, fetcher.as_ref()).map_err(|e| SessionError::Fetch {
        package: name.clone(),
        source: e,
      })?;
      let options = FetchOptions {
        revision: None,
        args: metadata.src_opts.clone(),
        offline: self.config.offline,
        sha256: metadata.src_sha256.clone(),
      };
      info!(package = %name, uri = origin.uri(), dest = %dest.display(), "fetching");
      fetcher
        .fetch_or_update(origin.uri(), &dest, &options)
        .map_err(|e| SessionError::Fetch {
          package: name.clone(),
          source: e,
        })?;
      summary.fetched.push(name.clone());
    }

    // Make step: skipped entirely in fetch-only and sync modes.
    if self.config.fetch_only || self.config.action == Action::Sync {
      return Ok(());
    }
    let Some(method) = metadata.install_method else {
      debug!(package = %name, "meta package, nothing to make");
      return Ok(());
    };
    let Some(dest) = self.install_path(minibuild) else {
      debug!(package = %name, "no category to install into, nothing to make");
      return Ok(());
    };

    let maker = self
      .makers
      .create(method.as_str())?
      .ok_or_else(|| SessionError::NoMaker {
        method: method.as_str().to_string(),
      })?;
    let context = MakeContext {
      prefix: &self.config.prefix,
      offline: self.config.offline,
    };
    let options = maker.options_for(&context, minibuild);
    info!(package = %name, action = %self.config.action, dest = %dest.display(), "making");
    let made = match self.config.action {
      Action::Install => maker.install(&dest, &options),
      Action::Reinstall => maker.reinstall(&dest, &options),
      Action::Delete => maker.delete(&dest),
      Action::Sync => unreachable!("sync returns before the make step"),
    };
    made.map_err(|e| SessionError::Make {
      package: name.clone(),
      source: e,
    })?;
    summary.made.push(name);

    Ok(())
  }
}

/// Collect minilays from, in order: the `MINILAYS` environment variable,
/// `<prefix>/minilays/*`, and the configuration file. Entries that are not
/// directories are skipped with a warning.
fn discover_minilays(config: &Config) -> Result<Vec<Minilay>, SessionError> {
  let mut paths: Vec<PathBuf> = Vec::new();

  if let Ok(env_paths) = env::var("MINILAYS") {
    paths.extend(env_paths.split_whitespace().map(PathBuf::from));
  }

  let parent = config.prefix.join("minilays");
  if parent.is_dir() {
    let mut children: Vec<PathBuf> = fs::read_dir(&parent)
      .map_err(|e| SessionError::Workspace {
        path: parent.clone(),
        source: e,
      })?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .collect();
    children.sort();
    paths.extend(children);
  }

  paths.extend(config.minilays.iter().cloned());

  let mut minilays = Vec::new();
  for path in paths {
    if path.is_dir() {
      minilays.push(Minilay::open(path)?);
    } else {
      warn!(path = %path.display(), "ignoring minilay path that is not a directory");
    }
  }
  Ok(minilays)
}
