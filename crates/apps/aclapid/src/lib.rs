//! The `aclapid` daemon: settings, logger setup, the ACL and Ping services, and
//! startup wiring. The binary in `src/bin/aclapid` only parses arguments and
//! handles signals.

pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod logging;

pub use bootstrap::{bootstrap, BootstrapError};
pub use config::{ConfigAdvisory, ConfigError, NormalizedSettings, Settings};
pub use handlers::{AclService, PingService};
