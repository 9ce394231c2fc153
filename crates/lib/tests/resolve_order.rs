//! Resolution order over a realistic minilay.
//!
//! The dependency shapes exercised here:
//!
//! ```text
//!        m3             m9
//!        /             /  \
//!       m2            m0  m3
//!      /  \
//!     m4  m1        m5 -> m6 -> m7 -> m5
//!      \  /         m8 -> m8
//!       m0          m10 -> m11 -> m12 -> m13 -> m10
//! ```

use std::fs;

use minimerge_lib::minilay::Minilay;
use minimerge_lib::resolver::{ResolveError, resolve};
use tempfile::TempDir;

const DESCRIPTOR_TAIL: &str = "src_uri = https://example.com/elementtreewriter-1.0/\n\
  src_type = hg\n\
  install_method = buildout\n\
  category = eggs\n";

fn fixture_minilay(dir: &TempDir) -> Minilay {
  let dependencies = [
    ("minibuild-0", ""),
    ("minibuild-1", "minibuild-0"),
    ("minibuild-2", "minibuild-4 minibuild-1"),
    ("minibuild-3", "minibuild-2"),
    ("minibuild-4", "minibuild-0"),
    ("minibuild-5", "minibuild-7"),
    ("minibuild-6", "minibuild-5"),
    ("minibuild-7", "minibuild-6"),
    ("minibuild-8", "minibuild-8"),
    ("minibuild-9", "minibuild-0 minibuild-3"),
    ("minibuild-10", "minibuild-11"),
    ("minibuild-11", "minibuild-12"),
    ("minibuild-12", "minibuild-13"),
    ("minibuild-13", "minibuild-10"),
  ];
  for (name, depends) in dependencies {
    let mut content = String::from("[minibuild]\n");
    if !depends.is_empty() {
      content.push_str(&format!("depends = {depends}\n"));
    }
    content.push_str(DESCRIPTOR_TAIL);
    fs::write(dir.path().join(name), content).unwrap();
  }
  Minilay::open(dir.path()).unwrap()
}

fn resolved_names(requested: &[&str], minilays: &[Minilay]) -> Vec<String> {
  let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
  resolve(&requested, minilays)
    .unwrap()
    .iter()
    .map(|mb| mb.name().to_string())
    .collect()
}

#[test]
fn a_package_without_dependencies_resolves_alone() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  assert_eq!(resolved_names(&["minibuild-0"], &lays), ["minibuild-0"]);
}

#[test]
fn a_simple_dependency_comes_first() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  assert_eq!(
    resolved_names(&["minibuild-1"], &lays),
    ["minibuild-0", "minibuild-1"]
  );
}

#[test]
fn chained_and_tree_dependencies_keep_their_known_order() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];

  assert_eq!(
    resolved_names(&["minibuild-3"], &lays),
    ["minibuild-0", "minibuild-4", "minibuild-1", "minibuild-2", "minibuild-3"]
  );
  assert_eq!(
    resolved_names(&["minibuild-9"], &lays),
    [
      "minibuild-0",
      "minibuild-4",
      "minibuild-1",
      "minibuild-2",
      "minibuild-3",
      "minibuild-9"
    ]
  );
}

#[test]
fn three_party_cycles_fail_fast() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  let error = resolve(&["minibuild-6".to_string()], &lays).unwrap_err();
  assert!(matches!(error, ResolveError::CircularDependency { .. }));
}

#[test]
fn self_cycles_fail_fast() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  let error = resolve(&["minibuild-8".to_string()], &lays).unwrap_err();
  assert!(matches!(
    error,
    ResolveError::CircularDependency { name, .. } if name == "minibuild-8"
  ));
}

#[test]
fn four_party_cycles_fail_fast() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  let error = resolve(&["minibuild-13".to_string()], &lays).unwrap_err();
  assert!(matches!(error, ResolveError::CircularDependency { .. }));
}

#[test]
fn unknown_packages_fail_with_their_name() {
  let dir = TempDir::new().unwrap();
  let lays = [fixture_minilay(&dir)];
  let error = resolve(&["inotinanyminilay-1.0".to_string()], &lays).unwrap_err();
  assert!(matches!(
    error,
    ResolveError::PackageNotFound(name) if name == "inotinanyminilay-1.0"
  ));
}
