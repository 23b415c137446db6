//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! The concrete scheduler collaborator (§6, §10): `tokio`-backed timer
//! handles with cancel-on-drop semantics, built the way the donor codebase
//! wraps its own protocol timers. A `testing` feature turns every timer into
//! an inert no-op so the FSM and timing logic can be driven deterministically
//! without a live reactor.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tokio::time::Instant;
#[cfg(not(feature = "testing"))]
use tokio::time;
#[cfg(not(feature = "testing"))]
use tracing::Instrument;
use tracing::error;

/// A handle to a spawned asynchronous task. Dropping it aborts the task
/// unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Detaches the task so dropping the handle no longer cancels it. Used
    /// for fire-and-forget sends, e.g. the single Final-bit reply.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

/// A one-shot timer, used for `t_hello` (re-armed with a fresh jittered delay
/// on every firing, per §4.1's "jitter is redrawn per packet, not cached"),
/// `t_timer` (detection), `t_session`
/// (session-timeout), and `t_delete`. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimeoutTaskInner,
}

#[derive(Debug, new)]
struct TimeoutTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl TimeoutTask {
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + timeout;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let timeout_fut = tokio::time::sleep(timeout);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(None)) => {
                                    let next = Instant::now() + timeout;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                Some(Message::Reset(Some(new_timeout))) => {
                                    let next = Instant::now() + new_timeout;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimeoutTaskInner::new(task, control_tx, next),
        }
    }

    #[cfg(feature = "testing")]
    pub fn new<F, Fut>(_timeout: Duration, _cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TimeoutTask {}
    }

    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        {
            if self.inner.control.send(Message::Reset(timeout)).is_err() {
                error!("failed to reset timeout");
            }
        }
        #[cfg(feature = "testing")]
        {
            let _ = timeout;
        }
    }

    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let next = self.inner.next.lock().unwrap();
            next.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

/// Messages fed back from expired one-shot timers into the session
/// manager's event loop (§6 scheduler collaborator, applied to this
/// protocol's three non-Tx timers).
pub mod messages {
    use serde::{Deserialize, Serialize};

    use crate::session::SessionId;

    #[derive(Clone, Copy, Debug, Deserialize, Serialize)]
    pub enum TimerMsg {
        /// `t_hello` expired: transmit one BFDCP and, unless this was the
        /// one-shot final transmission before Demand mode suppresses further
        /// sends (§4.2 `up` action, point 5), redraw jitter and re-arm.
        Hello(SessionId),
        /// `t_timer` expired: detection-timeout, feeds FSM event `Timer`.
        Detection(SessionId),
        /// `t_session` expired: session-timeout housekeeping (§4.3), not an
        /// FSM event.
        SessionTimeout(SessionId),
        /// `t_delete` expired: permanently remove the session (§4.3), not an
        /// FSM event.
        Delete(SessionId),
    }
}
