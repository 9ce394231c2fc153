//! minimerge-lib: core engine of the minimerge meta package-manager.
//!
//! The pieces, leaf first:
//! - [`ini`]: the key/value-sections file format shared by descriptors and
//!   the configuration file
//! - [`minibuild`] / [`minilay`]: package descriptors and the directories
//!   collecting them, both lazily loaded
//! - [`resolver`]: installation-ordered dependency closure with explicit
//!   cycle detection
//! - [`registry`]: the keyed component factory shared by fetchers and makers
//! - [`fetcher`]: mercurial / subversion / static source fetching
//! - [`maker`]: the external builder boundary
//! - [`config`] / [`session`]: session configuration and the orchestrating
//!   [`session::Minimerge`]

pub mod config;
pub mod fetcher;
pub mod ini;
pub mod maker;
pub mod minibuild;
pub mod minilay;
pub mod registry;
pub mod resolver;
pub mod session;

pub use config::{Action, Config, ConfigError};
pub use fetcher::{FetchError, FetchOptions, FetchOrigin, Fetcher};
pub use maker::{MakeError, MakeOptions, Maker};
pub use minibuild::{Category, FetchKind, InstallMethod, LoadState, Metadata, Minibuild, MinibuildError};
pub use minilay::{Minilay, MinilayError};
pub use registry::{ComponentError, Factory, Product};
pub use resolver::{ResolveError, find, resolve};
pub use session::{CancelToken, Minimerge, SessionError, SessionSummary};
