//! minimerge command line front-end.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use minimerge_lib::config::{self, Action, Config};
use minimerge_lib::session::Minimerge;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Meta package-manager: resolve, fetch and build source packages.
#[derive(Parser)]
#[command(name = "minimerge", version, about, long_about = None)]
struct Cli {
  /// Path to the configuration file (default: ~/.minimerge.cfg)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Do not touch the network; fail if sources are not already cached
  #[arg(short, long)]
  offline: bool,

  /// Fetch sources but skip the install step
  #[arg(short = 'F', long)]
  fetch_only: bool,

  /// Skip dependency resolution, process exactly the named packages
  #[arg(short = 'N', long)]
  nodeps: bool,

  /// Resume the resolved sequence after this package
  #[arg(short, long, value_name = "PACKAGE")]
  jump: Option<String>,

  /// Delete the given packages (dependents first)
  #[arg(short, long, conflicts_with_all = ["reinstall", "sync"])]
  delete: bool,

  /// Rebuild already-installed packages
  #[arg(short = 'R', long, conflicts_with = "sync")]
  reinstall: bool,

  /// Refresh working copies without building
  #[arg(short, long)]
  sync: bool,

  /// Print the session summary as JSON
  #[arg(long)]
  json: bool,

  /// Packages to process
  #[arg(required = true, value_name = "PACKAGE")]
  packages: Vec<String>,
}

impl Cli {
  fn action(&self) -> Action {
    if self.delete {
      Action::Delete
    } else if self.reinstall {
      Action::Reinstall
    } else if self.sync {
      Action::Sync
    } else {
      Action::Install
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  let mut config = match &cli.config {
    Some(path) => Config::load(path).with_context(|| format!("cannot load '{}'", path.display()))?,
    None => match config::default_config_path() {
      Some(path) => Config::load_or_default(&path)?,
      None => Config::default(),
    },
  };
  config.action = cli.action();
  config.offline = config.offline || cli.offline;
  config.fetch_only = cli.fetch_only;
  config.nodeps = cli.nodeps;
  config.jump = cli.jump.clone();
  config.packages = cli.packages.clone();

  let session = Minimerge::new(config)?;
  let summary = session.run()?;

  if cli.json {
    println!("{}", serde_json::to_string_pretty(&summary)?);
    return Ok(());
  }

  println!(
    "{} {} complete: {} processed, {} fetched, {} made",
    "::".cyan().bold(),
    summary.action,
    summary.processed.len(),
    summary.fetched.len(),
    summary.made.len()
  );
  for name in &summary.processed {
    println!("   {name}");
  }
  Ok(())
}
