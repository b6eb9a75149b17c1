//! Transport envelopes.
//!
//! ```text
//! Request: { marker, isRequest: true,  reqid, name, args }
//! Result:  { marker, isRequest: false, reqid, isReject?, data }
//! ```

use crate::domain::correlation::CorrelationId;
use crate::domain::value::{Record, Value};

/// Marker field distinguishing protocol messages from unrelated traffic.
pub const PROTOCOL_MARKER: &str = "__duplex_rpc__";

/// A transport-safe value graph.
///
/// Produced by marshalling or by decoding a wire frame; never contains a
/// local [`Callable`](crate::Callable).
#[derive(Clone, Debug, Default)]
pub struct Payload(pub(crate) Value);

impl Payload {
    /// Null payload.
    pub fn null() -> Self {
        Self(Value::Null)
    }

    /// Rejection payload `{ code, message }`.
    pub(crate) fn rejection(code: i64, message: impl Into<String>) -> Self {
        Self(Value::Record(Record::from_entries([
            ("code", Value::Int(code)),
            ("message", Value::Str(message.into())),
        ])))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// A protocol message.
#[derive(Clone, Debug)]
pub enum Envelope {
    Request {
        reqid: CorrelationId,
        name: String,
        args: Payload,
    },
    Result {
        reqid: CorrelationId,
        is_reject: bool,
        data: Payload,
    },
}

impl Envelope {
    pub fn reqid(&self) -> &CorrelationId {
        match self {
            Self::Request { reqid, .. } | Self::Result { reqid, .. } => reqid,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    pub(crate) fn resolve(reqid: CorrelationId, data: Payload) -> Self {
        Self::Result {
            reqid,
            is_reject: false,
            data,
        }
    }

    pub(crate) fn reject(reqid: CorrelationId, code: i64, message: impl Into<String>) -> Self {
        Self::Result {
            reqid,
            is_reject: true,
            data: Payload::rejection(code, message),
        }
    }
}
