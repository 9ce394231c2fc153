//! Minibuild name validation.
//!
//! A well-formed minibuild file name is either a bare meta aggregate
//! (`meta-django`) or a versioned package name with optional underscore
//! qualifiers (`libxml2-2.6`, `pil-1.1_rHEAD`, `zope-2.10_beta2_branchSIX`).
//! Qualifiers pin a pre-release (`pre`/`beta`/`alpha`/`rc` plus optional
//! digits), an SCM revision (`r` plus digits, `HEAD` or `TIP`), or an SCM
//! tag/branch marker (`tag`/`branch` plus an alphanumeric token). Plain
//! unversioned names are rejected.

use std::sync::LazyLock;

use regex::Regex;

static META_NAME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^meta-[0-9A-Za-z]+(?:-[0-9A-Za-z]+)*$").expect("meta name pattern"));

static VERSIONED_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^[0-9A-Za-z]+(?:-[0-9A-Za-z]+)*-[0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:(?:pre|beta|alpha|rc)[0-9]*|r(?:[0-9]+|HEAD|TIP)|(?:tag|branch)[0-9A-Za-z]+))*$",
  )
  .expect("versioned name pattern")
});

/// Check whether `name` is a valid minibuild name.
pub fn is_valid(name: &str) -> bool {
  META_NAME.is_match(name) || VERSIONED_NAME.is_match(name)
}
