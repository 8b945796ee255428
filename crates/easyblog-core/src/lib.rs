//! `easyblog-core` — configuration and shared error types for the blog's
//! scheduler, redeploy executor and webhook gateway.

pub mod config;
pub mod error;

pub use config::{
    ensure_parent_dir, ArgConfig, DeployConfig, EasyblogConfig, SchedulerConfig, TaskConfig,
    WebhookConfig,
};
pub use error::{CoreError, Result};
