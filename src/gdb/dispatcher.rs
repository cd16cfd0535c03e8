//! Request/response dispatch over the unframed console stream
//!
//! The console carries no request ids, so correlation is positional: the
//! driver task owns the session, writes one command, waits for the frame that
//! ends at the next prompt, and only then sends the next command. Responses
//! therefore arrive in issue order.
//!
//! A timed-out request is dead, but gdb will still answer it eventually. The
//! driver counts such stale answers and discards exactly that many frames
//! before correlating again.

use crate::gdb::error::DispatchError;
use crate::gdb::parser::{classify_response, ResponseBuffer};
use crate::gdb::session::{SessionIo, SessionProbe};
use crate::gdb::types::{GdbConfig, MetricsSnapshot, Priority, RequestOptions};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Callback fired exactly once with the response lines or the failure
pub type ResponseCallback = Box<dyn FnOnce(Result<Vec<String>, DispatchError>) + Send + 'static>;

struct Request {
    command: String,
    callback: ResponseCallback,
    created_at: Instant,
    opts: RequestOptions,
}

#[derive(Debug, Default)]
struct Metrics {
    outstanding: usize,
    completed: u64,
    failed: u64,
    timeouts: u64,
    rejected: u64,
    total_latency: Duration,
    max_latency: Duration,
}

impl Metrics {
    fn record(&mut self, latency: Duration, result: &Result<Vec<String>, DispatchError>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match result {
            Ok(_) => self.completed += 1,
            Err(DispatchError::Timeout) => self.timeouts += 1,
            Err(_) => self.failed += 1,
        }
        self.total_latency += latency;
        self.max_latency = self.max_latency.max(latency);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let resolved = self.completed + self.failed + self.timeouts;
        let avg_response_time_ms = if resolved == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / resolved as f64
        };
        MetricsSnapshot {
            outstanding: self.outstanding,
            completed: self.completed,
            failed: self.failed,
            timeouts: self.timeouts,
            rejected: self.rejected,
            avg_response_time_ms,
            max_response_time_ms: self.max_latency.as_secs_f64() * 1000.0,
        }
    }
}

fn lock(metrics: &Mutex<Metrics>) -> MutexGuard<'_, Metrics> {
    metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the dispatcher. Clones share the same session and queue.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Request>,
    probe: Arc<dyn SessionProbe>,
    metrics: Arc<Mutex<Metrics>>,
}

impl Dispatcher {
    /// Take ownership of `session` and start the driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: SessionIo>(session: S, config: &GdbConfig) -> Self {
        let probe = session.probe();
        let metrics = Arc::new(Mutex::new(Metrics::default()));
        let (queue, requests) = mpsc::unbounded_channel();

        let driver = Driver {
            session,
            probe: Arc::clone(&probe),
            requests,
            queue: VecDeque::new(),
            buffer: ResponseBuffer::new(config.prompt.clone()),
            stale: 0,
            closed: false,
            default_timeout: config.timeout(),
            metrics: Arc::clone(&metrics),
        };
        tokio::spawn(driver.run());

        Self {
            queue,
            probe,
            metrics,
        }
    }

    /// Issue `command` and schedule exactly one call of `callback`.
    ///
    /// Never blocks. When the session is not running the callback fires
    /// immediately with [`DispatchError::NotRunning`] and nothing is written.
    pub fn async_gdb_response<F>(&self, command: impl Into<String>, callback: F, opts: Option<RequestOptions>)
    where
        F: FnOnce(Result<Vec<String>, DispatchError>) + Send + 'static,
    {
        let command = command.into();
        if !self.probe.is_running() {
            debug!("Rejecting '{}': debugger not running", command);
            lock(&self.metrics).rejected += 1;
            callback(Err(DispatchError::NotRunning));
            return;
        }

        let request = Request {
            command,
            callback: Box::new(callback),
            created_at: Instant::now(),
            opts: opts.unwrap_or_default(),
        };

        lock(&self.metrics).outstanding += 1;
        if let Err(mpsc::error::SendError(request)) = self.queue.send(request) {
            warn!("Dispatcher stopped, dropping '{}'", request.command);
            let latency = request.created_at.elapsed();
            let result = Err(DispatchError::Closed);
            lock(&self.metrics).record(latency, &result);
            (request.callback)(result);
        }
    }

    /// Queue `command` now and collect its response later
    pub fn submit(&self, command: impl Into<String>, opts: Option<RequestOptions>) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.async_gdb_response(
            command,
            move |result| {
                let _ = tx.send(result);
            },
            opts,
        );
        PendingResponse(rx)
    }

    /// Issue `command` and wait for its response
    pub async fn request(
        &self,
        command: impl Into<String>,
        opts: Option<RequestOptions>,
    ) -> Result<Vec<String>, DispatchError> {
        self.submit(command, opts).wait().await
    }

    pub fn is_session_running(&self) -> bool {
        self.probe.is_running()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.metrics).snapshot()
    }
}

/// Response of a request issued with [`Dispatcher::submit`]
pub struct PendingResponse(oneshot::Receiver<Result<Vec<String>, DispatchError>>);

impl PendingResponse {
    pub async fn wait(self) -> Result<Vec<String>, DispatchError> {
        self.0.await.unwrap_or(Err(DispatchError::Closed))
    }
}

/// Sole reader and writer of the session
struct Driver<S> {
    session: S,
    probe: Arc<dyn SessionProbe>,
    requests: mpsc::UnboundedReceiver<Request>,
    queue: VecDeque<Request>,
    buffer: ResponseBuffer,
    /// Frames still owed to timed-out requests
    stale: usize,
    closed: bool,
    default_timeout: Duration,
    metrics: Arc<Mutex<Metrics>>,
}

impl<S: SessionIo> Driver<S> {
    async fn run(mut self) {
        loop {
            while let Ok(request) = self.requests.try_recv() {
                self.enqueue(request);
            }

            let request = match self.queue.pop_front() {
                Some(request) => request,
                None => match self.idle().await {
                    Some(request) => request,
                    None => break,
                },
            };
            self.execute(request).await;
        }
        info!("Dispatcher stopped");
    }

    fn enqueue(&mut self, request: Request) {
        match request.opts.priority {
            Priority::High => {
                let pos = self
                    .queue
                    .iter()
                    .position(|queued| queued.opts.priority != Priority::High)
                    .unwrap_or(self.queue.len());
                self.queue.insert(pos, request);
            }
            Priority::Normal => self.queue.push_back(request),
        }
    }

    /// Wait for the next request while consuming output nobody asked for
    async fn idle(&mut self) -> Option<Request> {
        loop {
            if self.closed {
                return self.requests.recv().await;
            }
            tokio::select! {
                request = self.requests.recv() => return request,
                chunk = self.session.read_chunk() => match chunk {
                    Ok(Some(text)) => self.absorb_unsolicited(&text),
                    Ok(None) => {
                        info!("Debugger output stream ended");
                        self.closed = true;
                    }
                    Err(e) => {
                        warn!("Error reading debugger output: {}", e);
                        self.closed = true;
                    }
                },
            }
        }
    }

    fn absorb_unsolicited(&mut self, text: &str) {
        for frame in self.buffer.push(text) {
            if self.stale > 0 {
                self.stale -= 1;
                warn!("Discarding late response ({} lines)", frame.len());
            } else {
                debug!("Dropping unsolicited output: {:?}", frame);
            }
        }
        let lines = self.buffer.drain_unsolicited();
        if !lines.is_empty() {
            debug!("Dropping unsolicited output: {:?}", lines);
        }
    }

    /// A request's clock starts when it is issued, not when it is written
    fn deadline(&self, request: &Request) -> Instant {
        request.created_at + request.opts.timeout.unwrap_or(self.default_timeout)
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.queue.iter().map(|request| self.deadline(request)).min()
    }

    /// Fail queued requests whose deadline passed. They were never written,
    /// so no frame is owed for them.
    fn expire_queued(&mut self) {
        let now = Instant::now();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for request in std::mem::take(&mut self.queue) {
            if self.deadline(&request) <= now {
                warn!("Command '{}' expired before it was sent", request.command);
                self.finish(request, Err(DispatchError::Timeout));
            } else {
                kept.push_back(request);
            }
        }
        self.queue = kept;
    }

    async fn execute(&mut self, request: Request) {
        if self.closed {
            return self.finish(request, Err(DispatchError::Closed));
        }
        if !self.probe.is_running() {
            return self.finish(request, Err(DispatchError::NotRunning));
        }
        let deadline = self.deadline(&request);
        if deadline <= Instant::now() {
            warn!("Command '{}' expired before it was sent", request.command);
            return self.finish(request, Err(DispatchError::Timeout));
        }

        debug!("Sending command: {}", request.command);
        if let Err(e) = self.session.write_line(&request.command).await {
            warn!("Failed to write '{}': {}", request.command, e);
            return self.finish(request, Err(e.into()));
        }

        let result = self.await_frame(&request.command, deadline).await;
        self.finish(request, result);
    }

    /// Wait for the in-flight frame while queued requests keep their own clocks
    async fn await_frame(&mut self, command: &str, deadline: Instant) -> Result<Vec<String>, DispatchError> {
        let mut accepting = true;
        loop {
            let expiry = self.next_expiry();
            tokio::select! {
                chunk = tokio::time::timeout_at(deadline, self.session.read_chunk()) => match chunk {
                    Err(_) => {
                        self.stale += 1;
                        warn!("Command '{}' timed out", command);
                        return Err(DispatchError::Timeout);
                    }
                    Ok(Ok(Some(text))) => {
                        debug!("GDB output: {:?}", text);
                        let mut frames = self.buffer.push(&text).into_iter();
                        while let Some(frame) = frames.next() {
                            if self.stale > 0 {
                                self.stale -= 1;
                                warn!("Discarding late response ({} lines)", frame.len());
                                continue;
                            }
                            for extra in frames.by_ref() {
                                debug!("Dropping unsolicited output: {:?}", extra);
                            }
                            return classify_response(command, frame);
                        }
                    }
                    Ok(Ok(None)) => {
                        info!("Debugger output stream ended");
                        self.closed = true;
                        return Err(DispatchError::Closed);
                    }
                    Ok(Err(e)) => {
                        warn!("Error reading debugger output: {}", e);
                        self.closed = true;
                        return Err(e.into());
                    }
                },
                request = self.requests.recv(), if accepting => match request {
                    Some(request) => self.enqueue(request),
                    None => accepting = false,
                },
                _ = tokio::time::sleep_until(expiry.unwrap_or(deadline)), if expiry.is_some() => {
                    self.expire_queued();
                }
            }
        }
    }

    fn finish(&self, request: Request, result: Result<Vec<String>, DispatchError>) {
        let latency = request.created_at.elapsed();
        lock(&self.metrics).record(latency, &result);
        (request.callback)(result);
    }
}

/// Trailing-edge debounce: rapid calls collapse into one call carrying the
/// most recent arguments, fired once `delay` passes without another call.
pub struct Debounced<A> {
    delay: Duration,
    action: Arc<dyn Fn(A) + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

/// Wrap `action` so it only fires after `delay` of quiet
pub fn debounce<A, F>(action: F, delay: Duration) -> Debounced<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debounced {
        delay,
        action: Arc::new(action),
        pending: Mutex::new(None),
    }
}

impl<A: Send + 'static> Debounced<A> {
    /// Schedule the action, cancelling the call scheduled before it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call(&self, args: A) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
        let action = Arc::clone(&self.action);
        let delay = self.delay;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action(args);
        }));
    }

    /// Drop the scheduled call, if any
    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<A> Drop for Debounced<A> {
    fn drop(&mut self) {
        if let Some(task) = self.pending.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}
