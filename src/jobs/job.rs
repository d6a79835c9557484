use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use url::Url;

use crate::archive::bundle::ResourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Index of a parsed unit (document or stylesheet) in discovery order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Canceled | JobState::Failed)
    }
}

/// Why a leaf is acquired, which decides what happens to its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// The page itself.
    Root,
    /// Saved as-is.
    Media,
    /// Parsed and rewritten as a stylesheet unit.
    Stylesheet {
        charset_hint: Option<String>,
        integrity: Option<String>,
        owner: UnitId,
    },
    /// Parsed and rewritten as a document unit when its type allows it.
    Frame { owner: UnitId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafJob {
    pub resource: ResourceId,
    pub url: Url,
    pub purpose: Purpose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewriteJob {
    pub unit: UnitId,
    pub resource: ResourceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    LeafAcquisition(LeafJob),
    ParsedRewrite(RewriteJob),
}

impl JobKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, JobKind::LeafAcquisition(_))
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    Progress {
        job: JobId,
        transferred: u64,
        total: Option<u64>,
    },
    Finished {
        job: JobId,
        state: JobState,
    },
}

/// Receives job notifications. Always called from the scheduler loop,
/// never from inside the operation that caused the event.
pub trait JobListener {
    fn on_event(&mut self, event: &JobEvent);
}

/// Listener that ignores everything.
pub struct NullListener;

impl JobListener for NullListener {
    fn on_event(&mut self, _event: &JobEvent) {}
}

impl<F: FnMut(&JobEvent)> JobListener for F {
    fn on_event(&mut self, event: &JobEvent) {
        self(event)
    }
}

/// Queue of progress notifications written by in-flight acquisitions and
/// drained by the scheduler.
#[derive(Clone, Debug, Default)]
pub struct ProgressSink {
    job: Option<JobId>,
    queue: Rc<RefCell<VecDeque<JobEvent>>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that tags its reports with `job`.
    pub fn for_job(&self, job: JobId) -> Self {
        Self {
            job: Some(job),
            queue: Rc::clone(&self.queue),
        }
    }

    pub fn report(&self, transferred: u64, total: Option<u64>) {
        if let Some(job) = self.job {
            self.queue.borrow_mut().push_back(JobEvent::Progress {
                job,
                transferred,
                total,
            });
        }
    }

    pub(crate) fn push(&self, event: JobEvent) {
        self.queue.borrow_mut().push_back(event);
    }

    pub(crate) fn drain(&self) -> Vec<JobEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }
}

/// Cooperative cancellation for a whole run or single jobs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    all: Rc<Cell<bool>>,
    jobs: Rc<RefCell<HashSet<JobId>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.all.set(true);
    }

    pub fn is_canceled(&self) -> bool {
        self.all.get()
    }

    pub fn cancel_job(&self, job: JobId) {
        self.jobs.borrow_mut().insert(job);
    }

    pub(crate) fn take_job_requests(&self) -> Vec<JobId> {
        let mut jobs: Vec<JobId> = self.jobs.borrow_mut().drain().collect();
        jobs.sort();
        jobs
    }
}
