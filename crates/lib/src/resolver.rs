//! Dependency resolution across minilays.
//!
//! [`resolve`] turns a list of requested package names into one
//! installation-ordered sequence: every dependency comes before every
//! descriptor that needs it, and the whole result is deterministic for a
//! given input order and descriptor set.
//!
//! The order is built by recursive expansion. Each visited package is
//! inserted at the end of the sequence built so far, unless an
//! already-placed descriptor depends on it, in which case it goes right
//! before the first such dependent. Dependencies of a package are then
//! expanded with the same rule, even when the package was already placed,
//! because that second walk is what catches cycles reachable through it.
//! Cycles are detected by carrying the chain of names currently being
//! expanded and refusing to re-enter one of them; detection never relies on
//! exhausting the call stack.

use thiserror::Error;
use tracing::{debug, trace};

use crate::minibuild::{Minibuild, MinibuildError};
use crate::minilay::{Minilay, MinilayError};

/// Errors raised while resolving a dependency sequence.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The name matched no descriptor in any configured minilay.
  #[error("no minibuild found for '{0}' in any configured minilay")]
  PackageNotFound(String),

  /// Expanding dependencies re-entered a package still being expanded.
  #[error("circular dependency on '{name}' (sequence so far: {})", sequence.join(" "))]
  CircularDependency { name: String, sequence: Vec<String> },

  /// A descriptor needed by the sequence failed to load.
  #[error("failed to load minibuild '{name}': {source}")]
  Descriptor {
    name: String,
    #[source]
    source: MinibuildError,
  },

  /// A minilay could not be listed.
  #[error(transparent)]
  Minilay(#[from] MinilayError),
}

/// Find the descriptor for `name`, searching minilays in configured order.
/// The first minilay containing the name wins.
pub fn find<'a>(name: &str, minilays: &'a [Minilay]) -> Result<&'a Minibuild, ResolveError> {
  for minilay in minilays {
    if let Some(minibuild) = minilay.lookup(name)? {
      trace!(name, minilay = %minilay.path().display(), "found minibuild");
      return Ok(minibuild);
    }
  }
  Err(ResolveError::PackageNotFound(name.to_string()))
}

/// Resolve `requested` into one installation-ordered, cycle-free sequence.
///
/// Dependencies precede their dependents; no descriptor appears twice.
pub fn resolve<'a>(requested: &[String], minilays: &'a [Minilay]) -> Result<Vec<&'a Minibuild>, ResolveError> {
  let mut sequence: Vec<&Minibuild> = Vec::new();
  let mut ancestors: Vec<String> = Vec::new();

  for name in requested {
    let minibuild = find(name, minilays)?;
    expand(minibuild, &mut sequence, &mut ancestors, minilays)?;
  }

  debug!(
    requested = requested.len(),
    resolved = sequence.len(),
    "resolved dependency sequence"
  );
  Ok(sequence)
}

fn expand<'a>(
  minibuild: &'a Minibuild,
  sequence: &mut Vec<&'a Minibuild>,
  ancestors: &mut Vec<String>,
  minilays: &'a [Minilay],
) -> Result<(), ResolveError> {
  let name = minibuild.name();

  if ancestors.iter().any(|ancestor| ancestor == name) {
    return Err(ResolveError::CircularDependency {
      name: name.to_string(),
      sequence: sequence.iter().map(|mb| mb.name().to_string()).collect(),
    });
  }

  let dependencies = minibuild.dependencies().map_err(|e| ResolveError::Descriptor {
    name: name.to_string(),
    source: e,
  })?;

  if !sequence.iter().any(|placed| placed.name() == name) {
    let index = insertion_index(name, sequence)?;
    trace!(name, index, "placing minibuild");
    sequence.insert(index, minibuild);
  }

  ancestors.push(name.to_string());
  for dependency in dependencies {
    let dep_minibuild = find(dependency, minilays)?;
    expand(dep_minibuild, sequence, ancestors, minilays)?;
  }
  ancestors.pop();

  Ok(())
}

/// Where to place `name` in the sequence built so far: right before the
/// first already-placed descriptor depending on it, or at the end.
fn insertion_index(name: &str, sequence: &[&Minibuild]) -> Result<usize, ResolveError> {
  for (index, placed) in sequence.iter().enumerate() {
    let dependencies = placed.dependencies().map_err(|e| ResolveError::Descriptor {
      name: placed.name().to_string(),
      source: e,
    })?;
    if dependencies.iter().any(|dep| dep == name) {
      return Ok(index);
    }
  }
  Ok(sequence.len())
}
