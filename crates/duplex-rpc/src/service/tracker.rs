//! Request tracker: issues outbound calls and correlates their results.
//!
//! Flow:
//! 1. Pick a correlation ID not currently pending
//! 2. Register the pending entry before anything is sent
//! 3. Marshal the arguments and post the request envelope
//! 4. Arm the timeout timer
//! 5. The caller awaits the [`CallHandle`]; the dispatcher or the timer
//!    completes it, whichever comes first

use crate::domain::context::PendingEntry;
use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::Envelope;
use crate::domain::value::{Buffer, Value};
use crate::error::{RpcError, RpcResult};
use crate::ports::Message;
use crate::service::endpoint::Shared;
use crate::stats::RpcStats;
use crate::transform::marshal::marshal;
use crate::transform::view::Received;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Awaitable result of an outbound call.
#[must_use = "a call handle does nothing unless awaited"]
pub struct CallHandle {
    reqid: Option<CorrelationId>,
    state: HandleState,
}

enum HandleState {
    Waiting(oneshot::Receiver<RpcResult<Received>>),
    Failed(Option<RpcError>),
}

impl CallHandle {
    fn waiting(reqid: CorrelationId, rx: oneshot::Receiver<RpcResult<Received>>) -> Self {
        Self {
            reqid: Some(reqid),
            state: HandleState::Waiting(rx),
        }
    }

    /// A handle that completes immediately with `err`.
    pub(crate) fn failed(err: RpcError) -> Self {
        Self {
            reqid: None,
            state: HandleState::Failed(Some(err)),
        }
    }

    /// Correlation ID of the request, if one was sent.
    pub fn reqid(&self) -> Option<&CorrelationId> {
        self.reqid.as_ref()
    }
}

impl Future for CallHandle {
    type Output = RpcResult<Received>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            HandleState::Waiting(rx) => Pin::new(rx).poll(cx).map(|outcome| {
                outcome.unwrap_or_else(|_| Err(RpcError::connection("endpoint dropped")))
            }),
            HandleState::Failed(err) => Poll::Ready(Err(err
                .take()
                .unwrap_or_else(|| RpcError::connection("call handle polled after completion")))),
        }
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("reqid", &self.reqid)
            .finish_non_exhaustive()
    }
}

/// Issue a call to the remote handler `name`.
///
/// `timeout` of `None` falls back to the endpoint's default.
pub(crate) fn issue_call(
    shared: &Arc<Shared>,
    name: &str,
    args: Vec<Value>,
    transfer: Vec<Buffer>,
    timeout: Option<Duration>,
) -> CallHandle {
    let timeout = timeout.unwrap_or(shared.config.default_timeout);
    let (tx, rx) = oneshot::channel();

    let (reqid, request, moved) = {
        let mut ctx = shared.context.lock();
        if ctx.is_closed() {
            return CallHandle::failed(RpcError::connection("channel closed"));
        }

        let reqid = ctx.next_correlation_id();
        ctx.insert_pending(reqid.clone(), PendingEntry::new(name, tx));

        let out = marshal(
            &mut ctx,
            &shared.config.ephemeral_prefix,
            &Value::list(args),
            &transfer,
        );
        let request = Envelope::Request {
            reqid: reqid.clone(),
            name: name.to_string(),
            args: out.payload,
        };
        (reqid, request, out.transfer)
    };

    RpcStats::incr(&shared.stats.calls_issued);
    debug!(reqid = %reqid, name, timeout_ms = timeout.as_millis() as u64, "Issuing call");

    if let Err(e) = shared.sender.send(Message::Envelope(request), moved) {
        warn!(reqid = %reqid, name, error = %e, "Failed to send request");
        let entry = shared.context.lock().take_pending(&reqid);
        if let Some(entry) = entry {
            entry.complete(Err(RpcError::connection(e.to_string())));
        }
        return CallHandle::waiting(reqid, rx);
    }

    let timer = shared
        .runtime
        .spawn(expire(Arc::downgrade(shared), reqid.clone(), timeout))
        .abort_handle();
    if !shared.context.lock().attach_timer(&reqid, timer.clone()) {
        // Result already arrived
        timer.abort();
    }

    CallHandle::waiting(reqid, rx)
}

/// Timer body: fail the call if it is still pending after `after`.
async fn expire(shared: Weak<Shared>, reqid: CorrelationId, after: Duration) {
    tokio::time::sleep(after).await;

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let entry = shared.context.lock().take_pending(&reqid);

    if let Some(entry) = entry {
        RpcStats::incr(&shared.stats.timeouts);
        warn!(
            reqid = %reqid,
            name = %entry.name,
            timeout_ms = after.as_millis() as u64,
            "Call timed out"
        );
        let name = entry.name.clone();
        entry.complete(Err(RpcError::Timeout { name, after }));
    }
}
