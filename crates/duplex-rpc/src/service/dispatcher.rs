//! Message dispatcher: the single inbound entry point of an endpoint.
//!
//! ```text
//!                 ┌── foreign ─────────────→ ignored
//! ChannelEvent ───┼── Request ─→ lookup ──┬→ not found ─→ reject
//!   ::Message     │                       └→ view args ─→ spawn handler ─→ resolve / reject
//!                 ├── Result ──→ take pending ─┬→ absent ─→ dropped
//!                 │                            └→ view data ─→ fulfill / fail
//!                 └── malformed ─→ reject (request) / fail pending (result)
//!
//! ChannelEvent::Error  ─→ fail all pending, clear registry, keep listening
//! ChannelEvent::Closed ─→ fail all pending, clear registry, stop
//! ```
//!
//! Messages are handled one at a time in arrival order. Handler bodies run
//! as separate tasks so they can call back across the channel.

use crate::codec::{self, MalformedEnvelope};
use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::{Envelope, Payload};
use crate::domain::value::Buffer;
use crate::error::{codes, RpcError};
use crate::ports::{ChannelEvent, ChannelReceiver, Message};
use crate::service::endpoint::Shared;
use crate::stats::RpcStats;
use crate::transform::marshal::marshal;
use crate::transform::view::{self, Received};
use futures::FutureExt;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Receive loop. Runs until the channel closes or the endpoint is dropped.
pub(crate) async fn run(shared: Weak<Shared>, mut receiver: Box<dyn ChannelReceiver>) {
    loop {
        let event = receiver.recv().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };

        match event {
            ChannelEvent::Message(message) => {
                handle_message(&shared, message);
                shared.collector.reschedule(&shared);
            }
            ChannelEvent::Error(reason) => connection_failed(&shared, &reason),
            ChannelEvent::Closed => {
                connection_failed(&shared, "channel closed");
                break;
            }
        }
    }

    debug!("Dispatcher stopped");
}

pub(crate) fn handle_message(shared: &Arc<Shared>, message: Message) {
    let envelope = match message {
        Message::Envelope(envelope) => envelope,
        Message::Raw(frame) => match codec::decode_envelope(&frame) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                trace!("Ignoring foreign message");
                return;
            }
            Err(malformed) => {
                handle_malformed(shared, malformed);
                return;
            }
        },
    };

    match envelope {
        Envelope::Request { reqid, name, args } => serve(shared, reqid, name, args),
        Envelope::Result {
            reqid,
            is_reject,
            data,
        } => deliver(shared, reqid, is_reject, data),
    }
}

// =============================================================================
// REQUEST BRANCH
// =============================================================================

fn serve(shared: &Arc<Shared>, reqid: CorrelationId, name: String, args: Payload) {
    let handler = {
        let mut ctx = shared.context.lock();
        let handler = ctx.handler(&name);
        if let Some(handler) = &handler {
            if shared.config.is_ephemeral(&name) {
                ctx.liveness_mut().touch_if_tracked(handler, Instant::now());
            }
        }
        handler
    };

    let Some(handler) = handler else {
        debug!(reqid = %reqid, name = %name, "Handler not found");
        reply_reject(
            shared,
            reqid,
            codes::HANDLER_NOT_FOUND,
            format!("Function not found: {name}"),
        );
        return;
    };

    let args = match view::unmarshal(args, Arc::downgrade(shared)) {
        Received::View(args) if args.is_list() => args,
        _ => {
            warn!(reqid = %reqid, name = %name, "Request arguments are not a list");
            reply_reject(
                shared,
                reqid,
                codes::HANDLER_ERROR,
                "malformed request: arguments must be a list",
            );
            return;
        }
    };

    RpcStats::incr(&shared.stats.requests_served);
    debug!(reqid = %reqid, name = %name, args = args.len(), "Serving request");

    let future = match catch_unwind(AssertUnwindSafe(|| handler.invoke(args))) {
        Ok(future) => future,
        Err(panic) => {
            reply_reject(shared, reqid, codes::HANDLER_ERROR, panic_message(&*panic));
            return;
        }
    };

    let weak = Arc::downgrade(shared);
    shared.runtime.spawn(async move {
        let outcome = AssertUnwindSafe(future).catch_unwind().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };

        match outcome {
            Ok(Ok(value)) => {
                let out = {
                    let mut ctx = shared.context.lock();
                    marshal(&mut ctx, &shared.config.ephemeral_prefix, &value, &[])
                };
                send(&shared, Envelope::resolve(reqid, out.payload), out.transfer);
            }
            Ok(Err(err)) => {
                debug!(reqid = %reqid, name = %name, error = %err, "Handler failed");
                reply_reject(&shared, reqid, codes::HANDLER_ERROR, err.message);
            }
            Err(panic) => {
                warn!(reqid = %reqid, name = %name, "Handler panicked");
                reply_reject(&shared, reqid, codes::HANDLER_ERROR, panic_message(&*panic));
            }
        }
    });
}

fn handle_malformed(shared: &Arc<Shared>, malformed: MalformedEnvelope) {
    RpcStats::incr(&shared.stats.malformed_messages);

    match (malformed.is_request, malformed.reqid) {
        (Some(true), Some(reqid)) => {
            warn!(reqid = %reqid, error = %malformed.error, "Malformed request");
            reply_reject(
                shared,
                reqid,
                codes::HANDLER_ERROR,
                format!("malformed request: {}", malformed.error),
            );
        }
        (Some(false), Some(reqid)) => {
            let entry = shared.context.lock().take_pending(&reqid);
            match entry {
                Some(entry) => {
                    warn!(reqid = %reqid, error = %malformed.error, "Malformed result");
                    entry.complete(Err(RpcError::malformed(malformed.error.to_string())));
                }
                None => {
                    warn!(reqid = %reqid, error = %malformed.error, "Malformed result dropped");
                }
            }
        }
        (_, reqid) => {
            warn!(
                reqid = ?reqid.as_ref().map(CorrelationId::as_str),
                error = %malformed.error,
                "Malformed message dropped"
            );
        }
    }
}

fn reply_reject(shared: &Shared, reqid: CorrelationId, code: i64, message: impl Into<String>) {
    RpcStats::incr(&shared.stats.rejections_sent);
    send(shared, Envelope::reject(reqid, code, message), Vec::new());
}

fn send(shared: &Shared, envelope: Envelope, transfer: Vec<Buffer>) {
    let reqid = envelope.reqid().clone();
    if let Err(e) = shared.sender.send(Message::Envelope(envelope), transfer) {
        warn!(reqid = %reqid, error = %e, "Failed to send result");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

// =============================================================================
// RESULT BRANCH
// =============================================================================

fn deliver(shared: &Arc<Shared>, reqid: CorrelationId, is_reject: bool, data: Payload) {
    let entry = shared.context.lock().take_pending(&reqid);

    let Some(entry) = entry else {
        RpcStats::incr(&shared.stats.stray_results);
        debug!(reqid = %reqid, "Dropping result with no pending call");
        return;
    };

    RpcStats::incr(&shared.stats.results_received);
    debug!(
        reqid = %reqid,
        name = %entry.name,
        elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
        rejected = is_reject,
        "Call completed"
    );

    let received = view::unmarshal(data, Arc::downgrade(shared));
    let outcome = if is_reject {
        Err(rejection_error(&entry.name, &received))
    } else {
        Ok(received)
    };

    if !entry.complete(outcome) {
        trace!(reqid = %reqid, "Caller no longer waiting");
    }
}

/// Map a rejection payload back onto an [`RpcError`].
fn rejection_error(name: &str, data: &Received) -> RpcError {
    if let Some(view) = data.as_view() {
        let code = view.get("code").and_then(|c| c.as_i64());
        let message = view.get("message").and_then(|m| m.as_str().map(str::to_string));
        if let (Some(code), Some(message)) = (code, message) {
            return RpcError::from_rejection(name, code, message);
        }
    }

    let message = data
        .as_str()
        .map_or_else(|| "call rejected".to_string(), str::to_string);
    RpcError::Remote {
        code: codes::HANDLER_ERROR,
        message,
    }
}

// =============================================================================
// CONNECTION FAILURE
// =============================================================================

fn connection_failed(shared: &Shared, reason: &str) {
    let failed = shared.context.lock().fail_connection(reason);
    shared.collector.cancel();
    if failed > 0 {
        warn!(reason, failed, "Connection failure, pending calls rejected");
    } else {
        info!(reason, "Connection failure, handler registry cleared");
    }
}
