//! 两级作业调度器
//!
//! A 级（资源获取）以有限并发运行；B 级（解析重写）在所有 A 级作业
//! 结束后才开始，按发现顺序逐个执行。通知总是在调度循环中延迟派发，
//! 作业的清理在其异步操作仍未返回时被推迟。

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable, LocalBoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, info};

use super::job::{
    CancelToken, Job, JobEvent, JobId, JobKind, JobListener, JobState, LeafJob, ProgressSink,
    RewriteJob,
};
use crate::core::SnapshotError;

/// How a job ended when it did not abort the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// The side that knows how to perform jobs. An `Err` from any method
/// aborts the whole run.
#[async_trait(?Send)]
pub trait JobHost {
    /// Result of an acquisition, handed back to [`JobHost::finish_acquisition`].
    type Acquired: 'static;

    /// Starts an acquisition. The returned future must not borrow the host.
    fn begin_acquisition(
        &mut self,
        id: JobId,
        job: &LeafJob,
        progress: ProgressSink,
    ) -> LocalBoxFuture<'static, Self::Acquired>;

    /// Stores the acquired bytes. Jobs for newly discovered units and
    /// resources are pushed onto `discovered`.
    async fn finish_acquisition(
        &mut self,
        id: JobId,
        job: &LeafJob,
        acquired: Self::Acquired,
        discovered: &mut Vec<JobKind>,
    ) -> Result<JobOutcome, SnapshotError>;

    async fn run_rewrite(&mut self, id: JobId, job: &RewriteJob) -> Result<JobOutcome, SnapshotError>;

    /// Releases per-job bookkeeping. Called once per job, after its
    /// completion notification went out and its operation returned.
    fn dispose(&mut self, _id: JobId) {}
}

/// Longest time queued notifications wait while acquisitions are running.
const NOTIFICATION_TICK: Duration = Duration::from_millis(50);

type Running<A> = FuturesUnordered<LocalBoxFuture<'static, (JobId, Option<A>)>>;

pub struct JobScheduler {
    jobs: Vec<Job>,
    tier_a: VecDeque<JobId>,
    tier_b: Vec<JobId>,
    max_concurrent: usize,
    cancel: CancelToken,
    notifications: ProgressSink,
    abort_handles: HashMap<JobId, AbortHandle>,
    in_flight: HashSet<JobId>,
    notified: HashSet<JobId>,
    disposed: HashSet<JobId>,
}

impl JobScheduler {
    pub fn new(max_concurrent: usize, cancel: CancelToken) -> Self {
        Self {
            jobs: Vec::new(),
            tier_a: VecDeque::new(),
            tier_b: Vec::new(),
            max_concurrent: max_concurrent.max(1),
            cancel,
            notifications: ProgressSink::new(),
            abort_handles: HashMap::new(),
            in_flight: HashSet::new(),
            notified: HashSet::new(),
            disposed: HashSet::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Registers a job. Leaf jobs join tier A, rewrites join tier B in
    /// the order they are added.
    pub fn add(&mut self, kind: JobKind) -> JobId {
        let id = JobId(self.jobs.len());
        if kind.is_leaf() {
            self.tier_a.push_back(id);
        } else {
            self.tier_b.push(id);
        }
        self.jobs.push(Job {
            id,
            kind,
            state: JobState::Pending,
        });
        id
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Runs every job to a terminal state.
    pub async fn run<H: JobHost>(
        &mut self,
        host: &mut H,
        listener: &mut dyn JobListener,
    ) -> Result<(), SnapshotError> {
        let mut running: Running<H::Acquired> = FuturesUnordered::new();

        let result = self.run_tier_a(host, listener, &mut running).await;
        let result = match result {
            Ok(()) => self.run_tier_b(host, listener).await,
            Err(error) => Err(error),
        };

        if result.is_err() {
            self.abort_everything(host, listener, &mut running).await;
        }
        self.flush(host, listener);

        result
    }

    async fn run_tier_a<H: JobHost>(
        &mut self,
        host: &mut H,
        listener: &mut dyn JobListener,
        running: &mut Running<H::Acquired>,
    ) -> Result<(), SnapshotError> {
        loop {
            self.flush(host, listener);
            self.apply_cancellations();
            if self.cancel.is_canceled() {
                return Err(SnapshotError::Canceled);
            }

            while running.len() < self.max_concurrent {
                let Some(id) = self.tier_a.pop_front() else {
                    break;
                };
                if self.jobs[id.0].state != JobState::Pending {
                    continue;
                }
                running.push(self.start_leaf(host, id));
            }

            // Wake up now and then so progress and cancellations reach the
            // listener while a long acquisition is still running
            let next = tokio::select! {
                next = running.next() => next,
                _ = tokio::time::sleep(NOTIFICATION_TICK) => continue,
            };
            let Some((id, acquired)) = next else {
                break;
            };
            self.in_flight.remove(&id);
            self.abort_handles.remove(&id);

            // A canceled job's late result is ignored
            let acquired = match acquired {
                Some(acquired) if self.jobs[id.0].state == JobState::Running => acquired,
                _ => {
                    debug!("{} resolved after cancellation", id);
                    self.dispose_if_done(host, id);
                    continue;
                }
            };

            let leaf = match &self.jobs[id.0].kind {
                JobKind::LeafAcquisition(leaf) => leaf.clone(),
                JobKind::ParsedRewrite(_) => continue,
            };
            let mut discovered = Vec::new();
            let outcome = host.finish_acquisition(id, &leaf, acquired, &mut discovered).await;
            for kind in discovered {
                self.add(kind);
            }

            match outcome {
                Ok(outcome) => self.finish(id, outcome),
                Err(error) => {
                    self.finish(id, JobOutcome::Failed);
                    return Err(error);
                }
            }
        }

        info!("acquisition finished, {} rewrite jobs queued", self.tier_b.len());
        Ok(())
    }

    fn start_leaf<H: JobHost>(&mut self, host: &mut H, id: JobId) -> LocalBoxFuture<'static, (JobId, Option<H::Acquired>)> {
        self.jobs[id.0].state = JobState::Running;
        let future = match &self.jobs[id.0].kind {
            JobKind::LeafAcquisition(leaf) => {
                debug!("{} acquiring {}", id, leaf.url);
                host.begin_acquisition(id, leaf, self.notifications.for_job(id))
            }
            JobKind::ParsedRewrite(_) => return async move { (id, None) }.boxed_local(),
        };

        let (handle, registration) = AbortHandle::new_pair();
        self.abort_handles.insert(id, handle);
        self.in_flight.insert(id);

        Abortable::new(future, registration)
            .map(move |result| (id, result.ok()))
            .boxed_local()
    }

    async fn run_tier_b<H: JobHost>(
        &mut self,
        host: &mut H,
        listener: &mut dyn JobListener,
    ) -> Result<(), SnapshotError> {
        let order = self.tier_b.clone();

        for id in order {
            self.flush(host, listener);
            self.apply_cancellations();
            if self.cancel.is_canceled() {
                return Err(SnapshotError::Canceled);
            }
            if self.jobs[id.0].state != JobState::Pending {
                continue;
            }

            let rewrite = match &self.jobs[id.0].kind {
                JobKind::ParsedRewrite(rewrite) => rewrite.clone(),
                JobKind::LeafAcquisition(_) => continue,
            };
            self.jobs[id.0].state = JobState::Running;
            self.in_flight.insert(id);
            let outcome = host.run_rewrite(id, &rewrite).await;
            self.in_flight.remove(&id);

            match outcome {
                Ok(outcome) => self.finish(id, outcome),
                Err(error) => {
                    self.finish(id, JobOutcome::Failed);
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    fn finish(&mut self, id: JobId, outcome: JobOutcome) {
        let state = match outcome {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Failed => JobState::Failed,
        };
        self.jobs[id.0].state = state;
        self.notifications.push(JobEvent::Finished { job: id, state });
    }

    fn mark_canceled(&mut self, id: JobId) {
        let job = &mut self.jobs[id.0];
        if job.state.is_terminal() {
            return;
        }
        job.state = JobState::Canceled;
        if let Some(handle) = self.abort_handles.get(&id) {
            handle.abort();
        }
        self.notifications.push(JobEvent::Finished {
            job: id,
            state: JobState::Canceled,
        });
    }

    fn apply_cancellations(&mut self) {
        for id in self.cancel.take_job_requests() {
            if id.0 < self.jobs.len() {
                debug!("canceling {}", id);
                self.mark_canceled(id);
            }
        }
        if self.cancel.is_canceled() {
            for index in 0..self.jobs.len() {
                self.mark_canceled(JobId(index));
            }
        }
    }

    /// Delivers queued notifications, then disposes jobs whose operation
    /// has returned.
    fn flush<H: JobHost>(&mut self, host: &mut H, listener: &mut dyn JobListener) {
        loop {
            let events = self.notifications.drain();
            if events.is_empty() {
                break;
            }
            for event in events {
                listener.on_event(&event);
                if let JobEvent::Finished { job, .. } = event {
                    self.notified.insert(job);
                    self.dispose_if_done(host, job);
                }
            }
        }
    }

    fn dispose_if_done<H: JobHost>(&mut self, host: &mut H, id: JobId) {
        if self.notified.contains(&id) && !self.in_flight.contains(&id) && self.disposed.insert(id) {
            host.dispose(id);
        }
    }

    /// Cancels every remaining job and waits for in-flight operations to
    /// return so they can be disposed.
    async fn abort_everything<H: JobHost>(
        &mut self,
        host: &mut H,
        listener: &mut dyn JobListener,
        running: &mut Running<H::Acquired>,
    ) {
        for index in 0..self.jobs.len() {
            self.mark_canceled(JobId(index));
        }
        self.flush(host, listener);

        while let Some((id, _)) = running.next().await {
            self.in_flight.remove(&id);
            self.abort_handles.remove(&id);
            self.dispose_if_done(host, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    use url::Url;

    use super::*;
    use crate::archive::bundle::ResourceId;
    use crate::jobs::job::{NullListener, Purpose, UnitId};

    fn leaf(n: usize, url: &str) -> JobKind {
        JobKind::LeafAcquisition(LeafJob {
            resource: ResourceId(n),
            url: Url::parse(url).unwrap(),
            purpose: Purpose::Media,
        })
    }

    fn rewrite(n: usize) -> JobKind {
        JobKind::ParsedRewrite(RewriteJob {
            unit: UnitId(n),
            resource: ResourceId(n),
        })
    }

    #[derive(Default)]
    struct FakeHost {
        log: Rc<RefCell<Vec<String>>>,
        delays: HashMap<String, usize>,
        discover: HashMap<String, Vec<JobKind>>,
        fail_on: Option<String>,
        running: Rc<Cell<usize>>,
        max_running: Rc<Cell<usize>>,
        disposed: Vec<JobId>,
        in_callback: Rc<Cell<bool>>,
        stalls: HashMap<String, Duration>,
        returned: Rc<RefCell<Vec<String>>>,
    }

    #[async_trait(?Send)]
    impl JobHost for FakeHost {
        type Acquired = String;

        fn begin_acquisition(&mut self, _id: JobId, job: &LeafJob, progress: ProgressSink) -> LocalBoxFuture<'static, String> {
            let url = job.url.to_string();
            let delay = self.delays.get(&url).copied().unwrap_or(1);
            let running = Rc::clone(&self.running);
            let max_running = Rc::clone(&self.max_running);
            self.log.borrow_mut().push(format!("begin {}", url));
            running.set(running.get() + 1);
            max_running.set(max_running.get().max(running.get()));
            let stall = self.stalls.get(&url).copied();
            let returned = Rc::clone(&self.returned);

            async move {
                for i in 0..delay {
                    progress.report(i as u64, Some(delay as u64));
                    tokio::task::yield_now().await;
                }
                if let Some(stall) = stall {
                    tokio::time::sleep(stall).await;
                }
                running.set(running.get() - 1);
                returned.borrow_mut().push(url.clone());
                url
            }
            .boxed_local()
        }

        async fn finish_acquisition(
            &mut self,
            _id: JobId,
            _job: &LeafJob,
            acquired: String,
            discovered: &mut Vec<JobKind>,
        ) -> Result<JobOutcome, SnapshotError> {
            self.in_callback.set(true);
            tokio::task::yield_now().await;
            self.log.borrow_mut().push(format!("finish {}", acquired));
            self.in_callback.set(false);

            if self.fail_on.as_deref() == Some(acquired.as_str()) {
                return Err(SnapshotError::DownloadFailure {
                    url: acquired,
                    status: Some(500),
                    reason: "root failed".to_string(),
                });
            }
            discovered.extend(self.discover.remove(&acquired).unwrap_or_default());
            Ok(JobOutcome::Completed)
        }

        async fn run_rewrite(&mut self, _id: JobId, job: &RewriteJob) -> Result<JobOutcome, SnapshotError> {
            self.log.borrow_mut().push(format!("rewrite {}", job.unit.0));
            Ok(JobOutcome::Completed)
        }

        fn dispose(&mut self, id: JobId) {
            self.disposed.push(id);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rewrites_wait_for_every_acquisition() {
        let mut host = FakeHost::default();
        host.delays.insert("https://a.example/slow.png".to_string(), 20);
        host.discover.insert(
            "https://a.example/".to_string(),
            vec![
                rewrite(1),
                leaf(2, "https://a.example/slow.png"),
                leaf(3, "https://a.example/s.css"),
            ],
        );
        host.discover.insert("https://a.example/s.css".to_string(), vec![rewrite(3), leaf(4, "https://a.example/bg.png")]);

        let mut scheduler = JobScheduler::new(4, CancelToken::new());
        scheduler.add(rewrite(0));
        scheduler.add(leaf(0, "https://a.example/"));
        scheduler.run(&mut host, &mut NullListener).await.unwrap();

        let log = host.log.borrow();
        let last_leaf = log.iter().rposition(|l| l.starts_with("begin") || l.starts_with("finish")).unwrap();
        let first_rewrite = log.iter().position(|l| l.starts_with("rewrite")).unwrap();
        assert!(first_rewrite > last_leaf, "{:?}", log);

        let rewrites: Vec<&String> = log.iter().filter(|l| l.starts_with("rewrite")).collect();
        assert_eq!(rewrites, ["rewrite 0", "rewrite 1", "rewrite 3"]);

        assert!(scheduler.jobs().iter().all(|j| j.state == JobState::Completed));
        let mut disposed = host.disposed.clone();
        disposed.sort();
        assert_eq!(disposed, (0..scheduler.jobs().len()).map(JobId).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrency_is_bounded() {
        let mut host = FakeHost::default();
        let mut scheduler = JobScheduler::new(2, CancelToken::new());
        for n in 0..6 {
            host.delays.insert(format!("https://a.example/{}", n), 5);
            scheduler.add(leaf(n, &format!("https://a.example/{}", n)));
        }
        scheduler.run(&mut host, &mut NullListener).await.unwrap();

        assert_eq!(host.max_running.get(), 2);
        assert_eq!(host.log.borrow().iter().filter(|l| l.starts_with("finish")).count(), 6);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn notifications_are_deferred() {
        let mut host = FakeHost::default();
        let in_callback = Rc::clone(&host.in_callback);
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&events);
        let mut listener = move |event: &JobEvent| {
            assert!(!in_callback.get(), "listener called inside a job callback");
            seen.borrow_mut().push(event.clone());
        };

        let mut scheduler = JobScheduler::new(1, CancelToken::new());
        host.delays.insert("https://a.example/".to_string(), 3);
        scheduler.add(leaf(0, "https://a.example/"));
        scheduler.run(&mut host, &mut listener).await.unwrap();

        let events = events.borrow();
        assert!(events.iter().any(|e| matches!(e, JobEvent::Progress { transferred: 2, total: Some(3), .. })));
        assert_eq!(
            events.last(),
            Some(&JobEvent::Finished { job: JobId(0), state: JobState::Completed })
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn progress_reaches_listener_during_long_acquisition() {
        let mut host = FakeHost::default();
        host.delays.insert("https://a.example/big.bin".to_string(), 2);
        host.stalls.insert("https://a.example/big.bin".to_string(), Duration::from_millis(400));
        let returned = Rc::clone(&host.returned);
        let live_progress = Rc::new(Cell::new(0usize));
        let seen = Rc::clone(&live_progress);
        let mut listener = move |event: &JobEvent| {
            if let JobEvent::Progress { .. } = event {
                if returned.borrow().is_empty() {
                    seen.set(seen.get() + 1);
                }
            }
        };

        let mut scheduler = JobScheduler::new(1, CancelToken::new());
        scheduler.add(leaf(0, "https://a.example/big.bin"));
        scheduler.run(&mut host, &mut listener).await.unwrap();

        assert_eq!(live_progress.get(), 2);
        assert_eq!(scheduler.job(JobId(0)).state, JobState::Completed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancellation_applies_during_long_acquisition() {
        let mut host = FakeHost::default();
        host.stalls.insert("https://a.example/big.bin".to_string(), Duration::from_secs(30));
        let mut scheduler = JobScheduler::new(1, CancelToken::new());
        let big = scheduler.add(leaf(0, "https://a.example/big.bin"));
        let token = scheduler.cancel_token();
        let mut listener = move |event: &JobEvent| {
            if let JobEvent::Progress { .. } = event {
                token.cancel_job(big);
            }
        };

        let started = std::time::Instant::now();
        scheduler.run(&mut host, &mut listener).await.unwrap();

        assert_eq!(scheduler.job(big).state, JobState::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(host.disposed, vec![big]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn canceled_job_result_is_ignored_and_disposal_deferred() {
        let mut host = FakeHost::default();
        host.delays.insert("https://a.example/slow".to_string(), 50);
        let mut scheduler = JobScheduler::new(4, CancelToken::new());
        scheduler.add(leaf(0, "https://a.example/fast"));
        let slow = scheduler.add(leaf(1, "https://a.example/slow"));
        let token = scheduler.cancel_token();

        let mut listener = move |event: &JobEvent| {
            if let JobEvent::Finished { job: JobId(0), .. } = event {
                token.cancel_job(slow);
            }
        };
        scheduler.run(&mut host, &mut listener).await.unwrap();

        assert_eq!(scheduler.job(slow).state, JobState::Canceled);
        assert!(!host.log.borrow().contains(&"finish https://a.example/slow".to_string()));
        assert_eq!(host.disposed.iter().filter(|id| **id == slow).count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fatal_error_cancels_remaining_jobs() {
        let mut host = FakeHost::default();
        host.fail_on = Some("https://a.example/".to_string());
        host.delays.insert("https://a.example/".to_string(), 1);
        host.delays.insert("https://a.example/other".to_string(), 30);

        let mut scheduler = JobScheduler::new(4, CancelToken::new());
        scheduler.add(leaf(0, "https://a.example/"));
        scheduler.add(leaf(1, "https://a.example/other"));
        scheduler.add(rewrite(0));

        let result = scheduler.run(&mut host, &mut NullListener).await;

        assert!(matches!(result, Err(SnapshotError::DownloadFailure { .. })));
        assert_eq!(scheduler.job(JobId(0)).state, JobState::Failed);
        assert_eq!(scheduler.job(JobId(1)).state, JobState::Canceled);
        assert_eq!(scheduler.job(JobId(2)).state, JobState::Canceled);
        assert!(!host.log.borrow().iter().any(|l| l.starts_with("rewrite")));
        assert_eq!(host.disposed.len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn whole_run_cancellation() {
        let mut host = FakeHost::default();
        let mut scheduler = JobScheduler::new(4, CancelToken::new());
        scheduler.add(leaf(0, "https://a.example/"));
        scheduler.add(rewrite(0));
        let token = scheduler.cancel_token();
        let mut listener = move |_: &JobEvent| token.cancel();

        let result = scheduler.run(&mut host, &mut listener).await;

        assert_eq!(result, Err(SnapshotError::Canceled));
        assert_eq!(scheduler.job(JobId(1)).state, JobState::Canceled);
    }
}
