//! Corvus Cron — custom async job scheduler with JSON persistence.
//!
//! This crate contains:
//! - **types**: schedule/payload/job data model (`CronJob`, `CronSchedule`, `CronPayload`)
//! - **service**: the scheduler loop (`CronService`) and its job callback

pub mod service;
pub mod types;

pub use service::{CronService, OnJobFn};
pub use types::{CronJob, CronJobState, CronPayload, CronSchedule, CronStore, JobStatus, ScheduleKind};
