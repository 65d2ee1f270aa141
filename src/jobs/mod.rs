//! 异步任务骨架：任务记录、事件日志、登记表与执行器

pub mod event;
pub mod job;
pub mod registry;
pub mod runner;

pub use event::{AppendRejected, EventLog, EventType, ResearchEvent};
pub use job::{Job, JobConfig, JobStatus, PARTIAL_HEADER, PARTIAL_SEPARATOR, TIMEOUT_FALLBACK};
pub use registry::{HealthCounts, JobHandle, JobRegistry};
pub use runner::{JobRunner, Submission};
