//! `easyblog-scheduler` — recurring background tasks with run history in SQLite.
//!
//! # Overview
//!
//! Every task from the [`registry::TaskRegistry`] gets its own loop
//! ([`engine::TaskLoop`]) on its own tokio task. A loop looks up the latest
//! run of its task, runs the action once `started_at + interval` has passed,
//! records the outcome and sleeps. Nothing is shared between loops except the
//! run store, whose writes are partitioned by task name.
//!
//! | Situation                       | Loop behaviour                            |
//! |---------------------------------|-------------------------------------------|
//! | No previous run                 | Run immediately                           |
//! | Not due yet                     | Sleep until due + 1 s slack               |
//! | Due or overdue                  | Run, record, sleep one interval           |
//! | Action fails                    | Record `success = false`, keep looping    |
//! | Run store fails                 | Log, retry after `min(interval, 60 s)`    |

pub mod db;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod truncate;
pub mod types;

pub use engine::{Poll, SchedulerEngine, TaskLoop};
pub use error::{Result, SchedulerError};
pub use invoker::{ActionFailure, ActionInvoker, CommandInvoker};
pub use registry::{TaskAction, TaskArg, TaskDefinition, TaskRegistry};
pub use store::{SqliteTaskRunStore, TaskRunStore};
pub use types::TaskRunRecord;
