use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
};
use thiserror::Error;
use tokio::sync::{watch, Notify};

use crate::metrics::Metrics;
use crate::model::{JobMessage, ResultCategory, ResultMessage};

use super::backoff::Backoff;
use super::connection::{ConnectionError, OwnerHandle, OwnerRequest, RabbitConnection};
use super::publisher::{publish_result, ResultSink};

/// Upper bound on unacknowledged deliveries held by this consumer.
///
/// Acks happen right after dispatch, so this caps how fast jobs are accepted,
/// not how many spawned jobs are still running.
pub const PREFETCH_COUNT: u16 = 5;

const CONSUMER_TAG: &str = "ai-gateway";

// ── Public types ───────────────────────────────────────────────────────────────

/// Processing capability invoked once per accepted job, on its own task.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobMessage);
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted for processing. Says nothing about the processing outcome.
    Ack,
    /// NACK without requeue: the payload is poisoned and would fail again.
    Reject,
    /// NACK with requeue: transient condition on this side.
    Requeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Connecting,
    Consuming,
}

impl ConsumerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Consuming => "consuming",
        }
    }
}

// ── Error ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("channel unavailable after connect")]
    ChannelUnavailable,
    #[error("QoS setup failed: {0}")]
    Qos(#[source] lapin::Error),
    #[error("failed to start consuming '{queue}': {source}")]
    Start {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("delivery stream failed: {0}")]
    Stream(#[source] lapin::Error),
    #[error("consumer cancelled by the broker")]
    Cancelled,
}

/// Why one connect/consume cycle ended early.
#[derive(Debug, Error)]
enum CycleError {
    /// Never got connected; the backoff keeps growing.
    #[error(transparent)]
    Connect(#[from] ConnectionError),
    /// Connected, then lost the subscription; the backoff starts over.
    #[error(transparent)]
    Consume(#[from] ConsumerError),
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("no async runtime to run the job on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

// ── Dispatcher ─────────────────────────────────────────────────────────────────

/// Per-message decision logic: decode, validate, dispatch.
///
/// Kept apart from the broker plumbing so that every path is exercised without
/// a broker. The returned [`Disposition`] is applied exactly once by the
/// consume loop.
pub struct Dispatcher {
    handler: Option<Arc<dyn JobHandler>>,
    results: Arc<dyn ResultSink>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        handler: Option<Arc<dyn JobHandler>>,
        results: Arc<dyn ResultSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler,
            results,
            metrics,
        }
    }

    /// Decide the fate of one delivery body.
    ///
    /// | Outcome                              | Disposition | FAIL result        |
    /// |--------------------------------------|-------------|--------------------|
    /// | not JSON                             | `Reject`    | no                 |
    /// | JSON, schema/validation failure      | `Reject`    | if task id found   |
    /// | no handler configured                | `Requeue`   | no                 |
    /// | dispatch failed                      | `Requeue`   | yes                |
    /// | dispatched                           | `Ack`       | no                 |
    pub async fn on_message(&self, body: &[u8]) -> Disposition {
        self.metrics.inc_received();

        let job = match JobMessage::decode(body) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️  malformed job, NACKing without requeue");
                self.metrics.inc_rejected();
                if let Some(task_id) = e.task_id() {
                    self.report_failure(task_id, e.to_string()).await;
                }
                return Disposition::Reject;
            }
        };

        let Some(handler) = self.handler.as_ref() else {
            tracing::error!(task_id = %job.task_id, "no job handler configured, NACKing with requeue");
            self.metrics.inc_requeued();
            return Disposition::Requeue;
        };

        let task_id = job.task_id.clone();
        match self.spawn_job(Arc::clone(handler), job) {
            Ok(()) => {
                self.metrics.inc_accepted();
                tracing::info!(task_id = %task_id, "📥 job accepted");
                Disposition::Ack
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "❌ dispatch failed, NACKing with requeue");
                self.metrics.inc_requeued();
                self.report_failure(&task_id, e.to_string()).await;
                Disposition::Requeue
            }
        }
    }

    /// Run `handler` on a task of its own. A panic inside the job is caught
    /// and logged there; it never reaches the consume loop.
    fn spawn_job(&self, handler: Arc<dyn JobHandler>, job: JobMessage) -> Result<(), DispatchError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let metrics = Arc::clone(&self.metrics);

        runtime.spawn(async move {
            let task_id = job.task_id.clone();
            metrics.inc_in_flight();
            let outcome = AssertUnwindSafe(handler.handle(job)).catch_unwind().await;
            metrics.dec_in_flight();
            if outcome.is_err() {
                metrics.inc_failed();
                tracing::error!(task_id = %task_id, "💥 job task panicked");
            }
        });

        Ok(())
    }

    async fn report_failure(&self, task_id: &str, error: String) {
        let message = ResultMessage::failure(task_id, error);
        if let Err(e) = publish_result(self.results.as_ref(), ResultCategory::Error, &message).await {
            tracing::error!(task_id, error = %e, "❌ could not publish FAIL result");
        }
    }
}

// ── Consume cycle ──────────────────────────────────────────────────────────────

/// One connect + subscribe + consume pass. Returns `Ok` only when asked to stop.
#[async_trait]
trait ConsumeCycle: Send {
    async fn run_cycle(&mut self, state: &watch::Sender<ConsumerState>) -> Result<(), CycleError>;
}

/// The broker-backed cycle: owns the connection, the queue name and the
/// dispatcher.
struct Session {
    connection: RabbitConnection,
    queue: String,
    dispatcher: Dispatcher,
}

#[async_trait]
impl ConsumeCycle for Session {
    async fn run_cycle(&mut self, state: &watch::Sender<ConsumerState>) -> Result<(), CycleError> {
        self.connection.connect().await?;
        let outcome = self.consume(state).await;
        self.connection.close().await;
        Ok(outcome?)
    }
}

impl Session {
    async fn consume(&mut self, state: &watch::Sender<ConsumerState>) -> Result<(), ConsumerError> {
        let channel = self
            .connection
            .channel()
            .cloned()
            .ok_or(ConsumerError::ChannelUnavailable)?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
            .await
            .map_err(ConsumerError::Qos)?;

        let mut deliveries = channel
            .basic_consume(
                &self.queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: false, // manual ACK
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| ConsumerError::Start {
                queue: self.queue.clone(),
                source,
            })?;

        state.send_replace(ConsumerState::Consuming);
        tracing::info!(queue = %self.queue, prefetch = PREFETCH_COUNT, "▶️  consuming");

        loop {
            tokio::select! {
                request = self.connection.next_owner_request() => {
                    tracing::info!(?request, "🛑 stop requested, cancelling consumer");
                    if let Err(e) = channel
                        .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
                        .await
                    {
                        tracing::warn!(error = %e, "basic.cancel failed");
                    }
                    return Ok(());
                }

                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => {
                        let disposition = self.dispatcher.on_message(&delivery.data).await;
                        settle(&delivery, disposition).await;
                    }
                    Some(Err(e)) => return Err(ConsumerError::Stream(e)),
                    None => return Err(ConsumerError::Cancelled),
                },
            }
        }
    }
}

/// NACK options for `disposition`, or `None` when it is an ACK.
fn nack_options(disposition: Disposition) -> Option<BasicNackOptions> {
    match disposition {
        Disposition::Ack => None,
        Disposition::Reject => Some(BasicNackOptions {
            multiple: false,
            requeue: false,
        }),
        Disposition::Requeue => Some(BasicNackOptions {
            multiple: false,
            requeue: true,
        }),
    }
}

/// Apply `disposition` to `delivery`. Called exactly once per delivery.
async fn settle(delivery: &Delivery, disposition: Disposition) {
    let result = match nack_options(disposition) {
        None => delivery.ack(BasicAckOptions::default()).await,
        Some(options) => delivery.nack(options).await,
    };

    if let Err(e) = result {
        tracing::warn!(
            delivery_tag = delivery.delivery_tag,
            ?disposition,
            error = %e,
            "settling delivery failed"
        );
    }
}

// ── Supervisor loop ────────────────────────────────────────────────────────────

/// Stop request shared between [`ConsumerHandle`] and the supervisor loop.
#[derive(Debug, Default)]
struct StopFlag {
    stopped: AtomicBool,
    wake: Notify,
}

impl StopFlag {
    fn request(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // `notify_one` keeps a permit when nobody is waiting yet.
        self.wake.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, returning early if a stop is requested.
    async fn sleep(&self, delay: Duration) {
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Run cycles until a stop is requested, sleeping per `backoff` between
/// failed ones.
///
/// A connect failure sleeps the current delay and doubles it. A failure after
/// a successful connect resets the backoff first, so it sleeps the initial
/// delay. A stop request cuts the sleep short.
async fn supervise<C: ConsumeCycle>(
    cycle: &mut C,
    backoff: &mut Backoff,
    stop: &StopFlag,
    state: &watch::Sender<ConsumerState>,
) {
    while !stop.is_stopped() {
        state.send_replace(ConsumerState::Connecting);

        match cycle.run_cycle(state).await {
            Ok(()) => {
                backoff.reset();
                continue;
            }
            Err(CycleError::Connect(e)) => {
                tracing::error!(error = %e, "❌ broker connect failed");
            }
            Err(CycleError::Consume(e)) => {
                backoff.reset();
                tracing::error!(error = %e, "❌ consume loop failed");
            }
        }

        if stop.is_stopped() {
            break;
        }

        let delay = backoff.next_delay();
        tracing::warn!("🔄 reconnecting in {:.1}s", delay.as_secs_f64());
        stop.sleep(delay).await;
    }

    state.send_replace(ConsumerState::Stopped);
    tracing::info!("consumer stopped");
}

// ── JobConsumer ────────────────────────────────────────────────────────────────

/// Handle for observing and stopping a running [`JobConsumer`] from other tasks.
#[derive(Clone)]
pub struct ConsumerHandle {
    stop: Arc<StopFlag>,
    owner: OwnerHandle,
    state: watch::Receiver<ConsumerState>,
}

impl ConsumerHandle {
    /// Ask the consumer to stop. Cooperative: the loop exits once the current
    /// cycle observes the request, and a pending reconnect delay is cut short.
    /// Jobs already dispatched run to completion.
    pub fn stop(&self) {
        self.stop.request();
        self.owner.submit(OwnerRequest::StopConsuming);
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }
}

/// RabbitMQ job consumer.
///
/// ```text
/// run() ──► connect ──► qos(5) ──► basic_consume ──► deliveries
///   ▲                                                   │
///   └──── sleep(backoff) ◄──── error ◄──────────────────┤
///                                                       ▼
///                                     Dispatcher::on_message ──► tokio::spawn(handler)
///                                                       │
///                                            ack / nack(requeue?)
/// ```
pub struct JobConsumer {
    session: Session,
    backoff: Backoff,
    stop: Arc<StopFlag>,
    state: watch::Sender<ConsumerState>,
}

impl JobConsumer {
    pub fn new(
        connection: RabbitConnection,
        queue: impl Into<String>,
        dispatcher: Dispatcher,
        backoff: Backoff,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            session: Session {
                connection,
                queue: queue.into(),
                dispatcher,
            },
            backoff,
            stop: Arc::new(StopFlag::default()),
            state,
        }
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            stop: Arc::clone(&self.stop),
            owner: self.session.connection.owner_handle(),
            state: self.state.subscribe(),
        }
    }

    /// Consume until [`ConsumerHandle::stop`] is called.
    pub async fn run(mut self) {
        tracing::info!(queue = %self.session.queue, "consumer starting");
        supervise(&mut self.session, &mut self.backoff, &self.stop, &self.state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::publisher::{MockResultSink, PublishError};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    // ── Dispatcher ────────────────────────────────────────────────────────────

    struct RecordingHandler {
        tx: mpsc::UnboundedSender<JobMessage>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: JobMessage) {
            let _ = self.tx.send(job);
        }
    }

    fn recording() -> (Arc<dyn JobHandler>, mpsc::UnboundedReceiver<JobMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingHandler { tx }), rx)
    }

    fn dispatcher(handler: Option<Arc<dyn JobHandler>>, sink: MockResultSink) -> Dispatcher {
        Dispatcher::new(handler, Arc::new(sink), Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn valid_job_is_dispatched_then_acked() {
        let (handler, mut jobs) = recording();
        let mut sink = MockResultSink::new();
        sink.expect_publish().never();
        let dispatcher = dispatcher(Some(handler), sink);

        let body = br#"{"taskId":"t1","filePath":"/shared/audio/a.wav","analysisRequest":{"fullText":"I am a student"}}"#;
        assert_eq!(dispatcher.on_message(body).await, Disposition::Ack);

        let job = tokio::time::timeout(Duration::from_secs(1), jobs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.task_id, "t1");
        assert_eq!(dispatcher.metrics.snapshot().accepted, 1);
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_without_result() {
        let (handler, mut jobs) = recording();
        let mut sink = MockResultSink::new();
        sink.expect_publish().never();
        let dispatcher = dispatcher(Some(handler), sink);

        assert_eq!(dispatcher.on_message(b"{\"taskId\": ").await, Disposition::Reject);
        assert!(jobs.try_recv().is_err());
        assert_eq!(dispatcher.metrics.snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn schema_violation_is_rejected_and_reported() {
        let (handler, mut jobs) = recording();
        let mut sink = MockResultSink::new();
        sink.expect_publish()
            .withf(|category, payload| {
                *category == ResultCategory::Error
                    && payload["taskId"] == "t9"
                    && payload["status"] == "FAIL"
                    && payload["error"].as_str().is_some_and(|e| !e.is_empty())
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let dispatcher = dispatcher(Some(handler), sink);

        assert_eq!(dispatcher.on_message(br#"{"taskId":"t9"}"#).await, Disposition::Reject);
        assert!(jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_fail_report_still_rejects() {
        let mut sink = MockResultSink::new();
        sink.expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::NotConnected));
        let (handler, _jobs) = recording();
        let dispatcher = dispatcher(Some(handler), sink);

        let body = br#"{"task_id":"t3","file_path":""}"#;
        assert_eq!(dispatcher.on_message(body).await, Disposition::Reject);
    }

    #[tokio::test]
    async fn missing_handler_requeues_silently() {
        let mut sink = MockResultSink::new();
        sink.expect_publish().never();
        let dispatcher = dispatcher(None, sink);

        let body = br#"{"taskId":"t1","filePath":"/shared/audio/a.wav"}"#;
        assert_eq!(dispatcher.on_message(body).await, Disposition::Requeue);
        assert_eq!(dispatcher.metrics.snapshot().requeued, 1);
    }

    #[test]
    fn dispatch_without_runtime_requeues_and_reports() {
        let mut sink = MockResultSink::new();
        sink.expect_publish()
            .withf(|category, payload| *category == ResultCategory::Error && payload["taskId"] == "t7")
            .times(1)
            .returning(|_, _| Ok(()));
        let (handler, _jobs) = recording();
        let dispatcher = dispatcher(Some(handler), sink);

        let body = br#"{"taskId":"t7","filePath":"/shared/audio/a.wav"}"#;
        let disposition = futures::executor::block_on(dispatcher.on_message(body));
        assert_eq!(disposition, Disposition::Requeue);
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        async fn handle(&self, _job: JobMessage) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_job_does_not_escape_its_task() {
        let mut sink = MockResultSink::new();
        sink.expect_publish().never();
        let dispatcher = dispatcher(Some(Arc::new(PanickingHandler)), sink);

        let body = br#"{"taskId":"t1","filePath":"/a.wav"}"#;
        assert_eq!(dispatcher.on_message(body).await, Disposition::Ack);

        for _ in 0..50 {
            if dispatcher.metrics.snapshot().failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = dispatcher.metrics.snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    // ── Supervisor ────────────────────────────────────────────────────────────

    enum Step {
        ConnectFails,
        ConsumeFails,
    }

    /// Plays back a script of cycle outcomes and records when each cycle began.
    /// Requests a stop once the script is exhausted.
    struct ScriptedCycle {
        steps: VecDeque<Step>,
        started: Vec<Instant>,
        stop: Arc<StopFlag>,
    }

    #[async_trait]
    impl ConsumeCycle for ScriptedCycle {
        async fn run_cycle(&mut self, state: &watch::Sender<ConsumerState>) -> Result<(), CycleError> {
            self.started.push(Instant::now());
            match self.steps.pop_front() {
                Some(Step::ConnectFails) => Err(CycleError::Connect(ConnectionError::Unreachable {
                    addr: "localhost:5672".into(),
                    attempts: 1,
                    reason: "refused".into(),
                })),
                Some(Step::ConsumeFails) => {
                    state.send_replace(ConsumerState::Consuming);
                    Err(CycleError::Consume(ConsumerError::Cancelled))
                }
                None => {
                    self.stop.request();
                    Ok(())
                }
            }
        }
    }

    async fn gaps(steps: Vec<Step>, initial: u64, max: u64) -> Vec<Duration> {
        let stop = Arc::new(StopFlag::default());
        let mut cycle = ScriptedCycle {
            steps: steps.into(),
            started: Vec::new(),
            stop: Arc::clone(&stop),
        };
        let mut backoff = Backoff::new(Duration::from_secs(initial), Duration::from_secs(max));
        let (state, rx) = watch::channel(ConsumerState::Stopped);

        supervise(&mut cycle, &mut backoff, &stop, &state).await;

        assert_eq!(*rx.borrow(), ConsumerState::Stopped);
        cycle.started.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_connect_failures_double_up_to_ceiling() {
        let observed = gaps(
            vec![Step::ConnectFails, Step::ConnectFails, Step::ConnectFails],
            2,
            5,
        )
        .await;

        let secs = |n| Duration::from_secs(n);
        assert_eq!(observed, vec![secs(2), secs(4), secs(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connect_resets_backoff() {
        let observed = gaps(
            vec![
                Step::ConnectFails,
                Step::ConnectFails,
                Step::ConsumeFails,
                Step::ConnectFails,
            ],
            1,
            60,
        )
        .await;

        let secs = |n| Duration::from_secs(n);
        assert_eq!(observed, vec![secs(1), secs(2), secs(1), secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_failure_skips_the_sleep() {
        struct StopOnFailure(Arc<StopFlag>, usize);

        #[async_trait]
        impl ConsumeCycle for StopOnFailure {
            async fn run_cycle(&mut self, _: &watch::Sender<ConsumerState>) -> Result<(), CycleError> {
                self.1 += 1;
                self.0.request();
                Err(CycleError::Consume(ConsumerError::Cancelled))
            }
        }

        let stop = Arc::new(StopFlag::default());
        let mut cycle = StopOnFailure(Arc::clone(&stop), 0);
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(60));
        let (state, _rx) = watch::channel(ConsumerState::Stopped);

        let started = Instant::now();
        supervise(&mut cycle, &mut backoff, &stop, &state).await;

        assert_eq!(cycle.1, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_sleep_returns_promptly() {
        struct AlwaysUnreachable(usize);

        #[async_trait]
        impl ConsumeCycle for AlwaysUnreachable {
            async fn run_cycle(&mut self, _: &watch::Sender<ConsumerState>) -> Result<(), CycleError> {
                self.0 += 1;
                Err(CycleError::Connect(ConnectionError::Unreachable {
                    addr: "localhost:5672".into(),
                    attempts: 1,
                    reason: "refused".into(),
                }))
            }
        }

        let stop = Arc::new(StopFlag::default());
        let mut cycle = AlwaysUnreachable(0);
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let (state, rx) = watch::channel(ConsumerState::Stopped);

        let stopper = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.request();
        });

        let started = Instant::now();
        supervise(&mut cycle, &mut backoff, &stop, &state).await;

        assert_eq!(cycle.0, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(*rx.borrow(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn stop_requested_before_sleep_is_not_lost() {
        let stop = StopFlag::default();
        stop.request();
        tokio::time::timeout(Duration::from_secs(1), stop.sleep(Duration::from_secs(3600)))
            .await
            .expect("sleep ignored the stop request");
    }

    #[test]
    fn dispositions_map_to_broker_settlement() {
        assert!(nack_options(Disposition::Ack).is_none());

        let reject = nack_options(Disposition::Reject).unwrap();
        assert!(!reject.requeue);
        assert!(!reject.multiple);

        let requeue = nack_options(Disposition::Requeue).unwrap();
        assert!(requeue.requeue);
        assert!(!requeue.multiple);
    }

    #[tokio::test]
    async fn handle_stop_clears_flag_and_reaches_owner() {
        let mut sink = MockResultSink::new();
        sink.expect_publish().never();
        let connection = RabbitConnection::new(crate::config::BrokerSettings::default(), "test");
        let mut consumer = JobConsumer::new(
            connection,
            "ai.jobs",
            dispatcher(None, sink),
            Backoff::new(Duration::from_secs(1), Duration::from_secs(1)),
        );

        let handle = consumer.handle();
        assert_eq!(handle.state(), ConsumerState::Stopped);
        handle.stop();

        assert!(consumer.stop.is_stopped());
        assert_eq!(
            consumer.session.connection.next_owner_request().await,
            Some(OwnerRequest::StopConsuming)
        );
    }
}
