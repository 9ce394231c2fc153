//! Generic keyed component factory.
//!
//! The same [`Factory`] serves the fetcher set (keyed by fetch kind) and the
//! maker set (keyed by install method): compiled-in defaults are registered
//! at startup, a configuration section may re-point keys at other known
//! implementations, and [`Factory::create`] hands back the first registered
//! product claiming a switch.
//!
//! Constructors are plain closures taking the switch-named configuration
//! section; configuration overrides resolve implementation names through an
//! explicit table of known constructors instead of loading code by dotted
//! path.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::ini::Section;

/// Something a factory can hand out.
pub trait Product {
  /// Whether this product can handle the given switch.
  fn matches(&self, switch: &str) -> bool;
}

/// Builds one boxed product from its configuration section.
pub type Constructor<P> = Arc<dyn Fn(&Section) -> Result<Box<P>, ComponentError> + Send + Sync>;

/// A named constructor, for the known-implementations tables handed to
/// [`Factory::register_all`].
pub type NamedConstructor<P> = (&'static str, Constructor<P>);

/// Errors raised while registering or constructing components.
#[derive(Debug, Error)]
pub enum ComponentError {
  /// A configuration override named no implementation at all.
  #[error("invalid component registered for '{key}'")]
  InvalidComponent { key: String },

  /// A configuration override named an unknown implementation.
  #[error("invalid component '{key}/{path}': does not name a known implementation")]
  InvalidComponentPath { key: String, path: String },

  /// A constructor ran and failed.
  #[error("failed to construct component '{key}': {source}")]
  Construction {
    key: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// An insertion-ordered registry of keyed constructors.
///
/// The registry is populated once at startup and only read afterwards;
/// constructors are `Send + Sync` so a populated factory can be shared
/// across threads freely.
pub struct Factory<P: Product + ?Sized> {
  name: String,
  sections: BTreeMap<String, Section>,
  products: Vec<(String, Constructor<P>)>,
}

impl<P: Product + ?Sized> Factory<P> {
  /// An empty factory with no configuration sections.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_sections(name, BTreeMap::new())
  }

  /// An empty factory carrying configuration sections; [`Factory::create`]
  /// passes the switch-named section to each constructor it tries.
  pub fn with_sections(name: impl Into<String>, sections: BTreeMap<String, Section>) -> Self {
    Self {
      name: name.into(),
      sections,
      products: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Keys in registration order.
  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.products.iter().map(|(key, _)| key.as_str())
  }

  /// Record a constructor under `key`. Re-registering a key replaces its
  /// constructor in place, keeping the original position.
  pub fn register(&mut self, key: impl Into<String>, constructor: Constructor<P>) {
    let key = key.into();
    if let Some(slot) = self.products.iter_mut().find(|(existing, _)| *existing == key) {
      slot.1 = constructor;
    } else {
      self.products.push((key, constructor));
    }
  }

  /// Convenience wrapper around [`Factory::register`] for closures.
  pub fn register_fn<F>(&mut self, key: impl Into<String>, constructor: F)
  where
    F: Fn(&Section) -> Result<Box<P>, ComponentError> + Send + Sync + 'static,
  {
    self.register(key, Arc::new(constructor));
  }

  /// Bulk-register configuration overrides: each `(key, implementation)`
  /// entry re-points `key` at the implementation of that name in `known`.
  pub fn register_all(&mut self, mapping: &Section, known: &[NamedConstructor<P>]) -> Result<(), ComponentError> {
    for (key, path) in mapping {
      let path = path.trim();
      if path.is_empty() {
        return Err(ComponentError::InvalidComponent { key: key.clone() });
      }
      let constructor = known
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, constructor)| constructor.clone())
        .ok_or_else(|| ComponentError::InvalidComponentPath {
          key: key.clone(),
          path: path.to_string(),
        })?;
      debug!(factory = %self.name, key, implementation = path, "registering component override");
      self.register(key.clone(), constructor);
    }
    Ok(())
  }

  /// Instantiate registered products in order and return the first one
  /// claiming `switch`, or `Ok(None)` when none does.
  ///
  /// A constructor failure does not end the scan; if a later product
  /// matches it wins, otherwise the first failure is reported.
  pub fn create(&self, switch: &str) -> Result<Option<Box<P>>, ComponentError> {
    let empty = Section::new();
    let section = self.sections.get(switch).unwrap_or(&empty);
    let mut first_failure: Option<ComponentError> = None;

    for (key, constructor) in &self.products {
      match constructor(section) {
        Ok(product) => {
          if product.matches(switch) {
            debug!(factory = %self.name, key, switch, "created component");
            return Ok(Some(product));
          }
        }
        Err(error) => {
          debug!(factory = %self.name, key, switch, %error, "component constructor failed");
          first_failure.get_or_insert(error);
        }
      }
    }

    match first_failure {
      Some(error) => Err(error),
      None => Ok(None),
    }
  }
}
