//! # 作业模块
//!
//! - `job` - 作业、状态机、通知与取消令牌
//! - `scheduler` - 两级屏障调度器及其 [`JobHost`] 接口

pub mod job;
pub mod scheduler;

pub use job::{
    CancelToken, Job, JobEvent, JobId, JobKind, JobListener, JobState, LeafJob, NullListener,
    ProgressSink, Purpose, RewriteJob, UnitId,
};
pub use scheduler::{JobHost, JobOutcome, JobScheduler};
