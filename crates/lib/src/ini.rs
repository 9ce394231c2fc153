//! Parser for the key/value-sections file format.
//!
//! Minibuild descriptors and the `~/.minimerge.cfg` configuration file share
//! one line-oriented format:
//!
//! ```text
//! [minibuild]
//! depends = libfoo-1.0 libbar-2.1
//! description = a package
//!   split over two lines
//! ```
//!
//! Rules: `[name]` opens a section, entries are `key = value` or
//! `key: value`, keys are lower-cased, `#`/`;` start comment lines, and an
//! indented line continues the previous entry's value. The format predates
//! this implementation and is not TOML-compatible, hence the dedicated
//! parser.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// One section's entries, keyed by lower-cased key.
pub type Section = BTreeMap<String, String>;

/// Errors raised while reading or parsing a sections file.
#[derive(Debug, Error)]
pub enum IniError {
  /// The file could not be read at all.
  #[error("failed to read '{}': {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// An entry appeared before any `[section]` header.
  #[error("line {line}: entry outside of any section: '{text}'")]
  EntryOutsideSection { line: usize, text: String },

  /// A continuation line had nothing to continue.
  #[error("line {line}: continuation line with no preceding entry")]
  DanglingContinuation { line: usize },

  /// A line was neither a header, an entry, a comment nor a continuation.
  #[error("line {line}: not a section header or key/value entry: '{text}'")]
  Malformed { line: usize, text: String },
}

/// A parsed sections file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
  sections: BTreeMap<String, Section>,
}

impl Sections {
  /// Parse sections from a string.
  pub fn parse(input: &str) -> Result<Self, IniError> {
    let mut sections: BTreeMap<String, Section> = BTreeMap::new();
    // (section, key) of the entry a continuation line would extend.
    let mut current_section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (index, raw) in input.lines().enumerate() {
      let line = index + 1;
      let trimmed = raw.trim();

      if trimmed.is_empty() {
        // A blank line ends any running continuation.
        last_key = None;
        continue;
      }
      if trimmed.starts_with('#') || trimmed.starts_with(';') {
        continue;
      }

      if raw.starts_with(char::is_whitespace) {
        // Continuation of the previous entry's value.
        let (Some(section), Some(key)) = (&current_section, &last_key) else {
          return Err(IniError::DanglingContinuation { line });
        };
        let value = sections
          .get_mut(section)
          .and_then(|s| s.get_mut(key))
          .ok_or(IniError::DanglingContinuation { line })?;
        if !value.is_empty() {
          value.push(' ');
        }
        value.push_str(trimmed);
        continue;
      }

      if let Some(name) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        current_section = Some(name.trim().to_string());
        sections.entry(name.trim().to_string()).or_default();
        last_key = None;
        continue;
      }

      let Some(separator) = trimmed.find(['=', ':']) else {
        return Err(IniError::Malformed {
          line,
          text: trimmed.to_string(),
        });
      };
      let Some(section) = &current_section else {
        return Err(IniError::EntryOutsideSection {
          line,
          text: trimmed.to_string(),
        });
      };
      let key = trimmed[..separator].trim().to_lowercase();
      if key.is_empty() {
        return Err(IniError::Malformed {
          line,
          text: trimmed.to_string(),
        });
      }
      let value = trimmed[separator + 1..].trim().to_string();
      sections
        .entry(section.clone())
        .or_default()
        .insert(key.clone(), value);
      last_key = Some(key);
    }

    Ok(Self { sections })
  }

  /// Read and parse a sections file from disk.
  pub fn read(path: &Path) -> Result<Self, IniError> {
    let content = fs::read_to_string(path).map_err(|e| IniError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    Self::parse(&content)
  }

  /// Get a section by name (section names are case-sensitive).
  pub fn get(&self, name: &str) -> Option<&Section> {
    self.sections.get(name)
  }

  /// Iterate over `(name, section)` pairs in name order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Section)> {
    self.sections.iter().map(|(name, section)| (name.as_str(), section))
  }

  /// Consume the parse result into its backing map.
  pub fn into_inner(self) -> BTreeMap<String, Section> {
    self.sections
  }
}
