//! Delivery engine: request construction, the HTTP executor, the dispatcher
//! behind `publish`, and the retry sweeper with its scheduler.

pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod report;
pub mod request;
pub mod retry;
pub mod scheduler;

pub use context::DeliveryContext;
pub use dispatcher::Dispatcher;
pub use executor::{Executor, ProbeReport};
pub use report::{BranchReport, BranchResult, RunSummary};
pub use retry::RetrySweeper;
pub use scheduler::{PeriodicJob, Scheduler};
