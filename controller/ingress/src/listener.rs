use mesh_controller_core::{Kind, PubSubMessage};
use mesh_controller_messaging::PubSub;
use mesh_controller_workerpool::{Job, WorkerPool};
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_SLIDING: Duration = Duration::from_secs(5);

/// Turns refresh announcements on a bus topic into generator jobs.
///
/// The first announcement after a quiet period arms a deadline. When it
/// expires a job is run to completion; if any announcement was seen since
/// the deadline was armed, the deadline is armed once more so that a final
/// job confirms the settled state.
pub struct BroadcastListener<F> {
    bus: Arc<PubSub>,
    topic: Kind,
    pool: Arc<WorkerPool>,
    sliding: Duration,
    make_job: F,
}

#[derive(Debug, Default)]
struct State {
    reconfirm: bool,
    pending: bool,
    deadline: Option<Instant>,
}

// === impl BroadcastListener ===

impl<F, J> BroadcastListener<F>
where
    F: FnMut() -> J + Send + 'static,
    J: Job,
{
    pub fn new(bus: Arc<PubSub>, topic: Kind, pool: Arc<WorkerPool>, make_job: F) -> Self {
        Self {
            bus,
            topic,
            pool,
            sliding: DEFAULT_SLIDING,
            make_job,
        }
    }

    pub fn with_sliding(mut self, sliding: Duration) -> Self {
        self.sliding = sliding;
        self
    }

    /// Runs until shutdown is signaled or the subscription is closed. A job
    /// runs one sliding period after start even without announcements.
    pub async fn run(mut self, shutdown: drain::Watch) {
        let mut sub = self.bus.subscribe(&[self.topic.as_str()]);
        let mut state = State {
            deadline: Some(Instant::now() + self.sliding),
            ..State::default()
        };

        let signaled = shutdown.signaled();
        tokio::pin!(signaled);

        let release = loop {
            let deadline = state.deadline;
            let expiry = async move {
                match deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                release = &mut signaled => break Some(release),

                () = expiry => {
                    self.fire().await;
                    state.expire(Instant::now() + self.sliding);
                }

                msg = sub.recv() => match msg {
                    Some(msg) => {
                        trace!(kind = %msg.kind, "Received");
                        state.observe(Instant::now() + self.sliding);
                    }
                    None => break None,
                },
            }
        };

        debug!(topic = %self.topic, "Stopping listener");
        self.bus.unsubscribe(sub);
        drop(release);
    }

    async fn fire(&mut self) {
        let job = (self.make_job)();
        let name = job.job_name();
        debug!(job = %name, "Submitting");
        if self.pool.add_job(job).await.is_err() {
            debug!(job = %name, "Job was dropped");
        }
    }
}

impl<F> std::fmt::Debug for BroadcastListener<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastListener")
            .field("topic", &self.topic)
            .field("sliding", &self.sliding)
            .finish_non_exhaustive()
    }
}

// === impl State ===

impl State {
    fn observe(&mut self, deadline: Instant) {
        if !self.reconfirm {
            self.deadline = Some(deadline);
            self.reconfirm = true;
        } else {
            self.pending = true;
        }
    }

    fn expire(&mut self, deadline: Instant) {
        if self.reconfirm || self.pending {
            self.reconfirm = false;
            self.pending = false;
            self.deadline = Some(deadline);
        } else {
            self.deadline = None;
        }
    }
}

/// Publishes a payload-free refresh announcement for `topic`.
pub fn announce(bus: &PubSub, topic: Kind) {
    bus.publish(topic.as_str(), &PubSubMessage::signal(topic));
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_controller_messaging::DEFAULT_CAPACITY;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Job for Count {
        async fn run(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn job_name(&self) -> String {
            "count".to_string()
        }
    }

    struct Fixture {
        bus: Arc<PubSub>,
        runs: Arc<AtomicUsize>,
        signal: drain::Signal,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn() -> Fixture {
        let (signal, watch) = drain::channel();
        let bus = Arc::new(PubSub::new(
            "ingress",
            DEFAULT_CAPACITY,
            Default::default(),
        ));
        let pool = Arc::new(WorkerPool::spawn(1, watch.clone()));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let listener = BroadcastListener::new(bus.clone(), Kind::IngressUpdate, pool, move || {
            Count(counter.clone())
        });
        let task = tokio::spawn(listener.run(watch));
        Fixture {
            bus,
            runs,
            signal,
            task,
        }
    }

    async fn sleep(secs: u64) {
        time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_at_startup() {
        let fx = spawn();
        sleep(4).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 0);
        sleep(2).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
        sleep(60).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn announcements_are_confirmed_once_more() {
        let fx = spawn();
        sleep(6).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);

        // t=6: arms the deadline for t=11. Later announcements fold into it.
        announce(&fx.bus, Kind::IngressUpdate);
        sleep(1).await;
        announce(&fx.bus, Kind::IngressUpdate);
        announce(&fx.bus, Kind::IngressUpdate);

        sleep(5).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 2);

        // The confirming run at t=16, then quiet.
        sleep(5).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 3);
        sleep(60).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_topics_are_ignored() {
        let fx = spawn();
        sleep(6).await;
        announce(&fx.bus, Kind::GatewayUpdate);
        sleep(60).await;
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unsubscribes() {
        let fx = spawn();
        sleep(1).await;
        assert_eq!(fx.bus.subscriber_count(Kind::IngressUpdate.as_str()), 1);

        fx.signal.drain().await;
        fx.task.await.expect("listener must not panic");
        assert_eq!(fx.bus.subscriber_count(Kind::IngressUpdate.as_str()), 0);
        assert_eq!(fx.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expiry_disarms_when_quiet() {
        let now = Instant::now();
        let mut state = State {
            deadline: Some(now),
            ..State::default()
        };
        state.expire(now);
        assert_eq!(state.deadline, None);

        state.observe(now);
        state.observe(now + Duration::from_secs(1));
        assert!(state.reconfirm && state.pending);
        assert_eq!(state.deadline, Some(now));

        state.expire(now + Duration::from_secs(5));
        assert!(!state.reconfirm && !state.pending);
        assert_eq!(state.deadline, Some(now + Duration::from_secs(5)));
    }
}
