//! `easyblog-deploy` — pulls a tagged release into the working tree and
//! restarts the site.
//!
//! Usually entered through `easyblog redeploy <ref>`, which the webhook spawns
//! as a detached process so it outlives the service restart it performs.

pub mod errlog;
pub mod error;
pub mod redeploy;
pub mod runner;

pub use errlog::{ErrorLog, FailureEntry};
pub use error::{DeployError, Result};
pub use redeploy::{plan, validate_reference, Redeployer, Step};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
