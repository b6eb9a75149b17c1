//! JSON wire codec for envelopes.
//!
//! ## Frame shape
//!
//! ```text
//! { "__duplex_rpc__": true, "isRequest": true,  "reqid": "..", "name": "..", "args": <node> }
//! { "__duplex_rpc__": true, "isRequest": false, "reqid": "..", "isReject": true, "data": <node> }
//! ```
//!
//! ## Nodes
//!
//! Scalars encode as plain JSON. Every JSON object in a frame is tagged:
//!
//! | Node        | Encoding                                             |
//! |-------------|------------------------------------------------------|
//! | list        | `{ "$id": n, "$list": [node, ..] }`                  |
//! | record      | `{ "$id": n, "$record": [[key, node], ..] }`         |
//! | back-ref    | `{ "$ref": n }`                                      |
//! | buffer      | `{ "$bytes": "<hex>" }` (`null` when detached)       |
//! | NaN / ±inf  | `{ "$float": "NaN" \| "Infinity" \| "-Infinity" }` |
//! | token       | `{ "__duplex_rpc__": true, "kind": "ref", "id": .. }`|
//!
//! Node ids are assigned per frame on first visit, so cycles and shared
//! sub-structure survive a round trip with identity intact. In the decoded
//! graph a back-reference to a node that is still open becomes a
//! back-link, so the graph is freed with its root.

use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::{Envelope, Payload, PROTOCOL_MARKER};
use crate::domain::token::{CallableRef, TokenKind};
use crate::domain::value::{Buffer, List, Record, Value};
use crate::error::CodecError;
use bytes::Bytes;
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;

const ID: &str = "$id";
const LIST: &str = "$list";
const RECORD: &str = "$record";
const BACKREF: &str = "$ref";
const BYTES: &str = "$bytes";
const FLOAT: &str = "$float";

/// A frame that carried the protocol marker but could not be decoded.
///
/// Whatever could be read before the failure is kept so a request can still
/// be answered with a rejection.
#[derive(Debug)]
pub struct MalformedEnvelope {
    pub reqid: Option<CorrelationId>,
    pub is_request: Option<bool>,
    pub error: CodecError,
}

/// Encode an envelope into a JSON frame.
pub fn encode_envelope(envelope: &Envelope) -> Result<Json, CodecError> {
    let mut frame = Map::new();
    frame.insert(PROTOCOL_MARKER.into(), Json::Bool(true));

    match envelope {
        Envelope::Request { reqid, name, args } => {
            frame.insert("isRequest".into(), Json::Bool(true));
            frame.insert("reqid".into(), Json::String(reqid.to_string()));
            frame.insert("name".into(), Json::String(name.clone()));
            frame.insert("args".into(), encode_payload(args)?);
        }
        Envelope::Result {
            reqid,
            is_reject,
            data,
        } => {
            frame.insert("isRequest".into(), Json::Bool(false));
            frame.insert("reqid".into(), Json::String(reqid.to_string()));
            if *is_reject {
                frame.insert("isReject".into(), Json::Bool(true));
            }
            frame.insert("data".into(), encode_payload(data)?);
        }
    }

    Ok(Json::Object(frame))
}

/// Decode a JSON frame.
///
/// Returns `Ok(None)` for frames without the protocol marker; those belong
/// to unrelated traffic on the same channel.
pub fn decode_envelope(frame: &Json) -> Result<Option<Envelope>, MalformedEnvelope> {
    let Some(obj) = frame.as_object() else {
        return Ok(None);
    };
    if obj.get(PROTOCOL_MARKER) != Some(&Json::Bool(true)) {
        return Ok(None);
    }

    let reqid = obj
        .get("reqid")
        .and_then(Json::as_str)
        .map(CorrelationId::from);
    let is_request = obj.get("isRequest").and_then(Json::as_bool);

    decode_fields(obj).map(Some).map_err(|error| MalformedEnvelope {
        reqid,
        is_request,
        error,
    })
}

fn decode_fields(obj: &Map<String, Json>) -> Result<Envelope, CodecError> {
    let reqid = CorrelationId::from(str_field(obj, "reqid")?);
    let is_request = obj
        .get("isRequest")
        .ok_or(CodecError::MissingField("isRequest"))?
        .as_bool()
        .ok_or_else(|| invalid("isRequest", "expected a boolean"))?;

    if is_request {
        let name = str_field(obj, "name")?.to_string();
        let args = decode_payload(obj.get("args").ok_or(CodecError::MissingField("args"))?)?;
        Ok(Envelope::Request { reqid, name, args })
    } else {
        let is_reject = match obj.get("isReject") {
            None | Some(Json::Null) => false,
            Some(Json::Bool(b)) => *b,
            Some(_) => return Err(invalid("isReject", "expected a boolean")),
        };
        let data = match obj.get("data") {
            Some(data) => decode_payload(data)?,
            None => Payload::null(),
        };
        Ok(Envelope::Result {
            reqid,
            is_reject,
            data,
        })
    }
}

fn str_field<'a>(obj: &'a Map<String, Json>, field: &'static str) -> Result<&'a str, CodecError> {
    obj.get(field)
        .ok_or(CodecError::MissingField(field))?
        .as_str()
        .ok_or_else(|| invalid(field, "expected a string"))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidField {
        field,
        reason: reason.into(),
    }
}

// =============================================================================
// PAYLOAD NODES
// =============================================================================

/// Encode a payload's value graph.
pub fn encode_payload(payload: &Payload) -> Result<Json, CodecError> {
    Encoder::default().encode(payload.as_value())
}

/// Decode a value graph into a payload.
pub fn decode_payload(node: &Json) -> Result<Payload, CodecError> {
    Decoder::default().decode(node).map(Payload)
}

#[derive(Default)]
struct Encoder {
    /// Node address → assigned id
    ids: HashMap<usize, u64>,
}

impl Encoder {
    fn encode(&mut self, value: &Value) -> Result<Json, CodecError> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(n) => match serde_json::Number::from_f64(*n) {
                Some(n) => Json::Number(n),
                None => json!({ FLOAT: non_finite_name(*n) }),
            },
            Value::Str(s) => Json::String(s.clone()),
            Value::Buffer(buffer) => {
                let hex = buffer.bytes().map(hex::encode);
                json!({ BYTES: hex })
            }
            Value::List(list) => {
                if let Some(id) = self.ids.get(&list.addr()) {
                    return Ok(json!({ BACKREF: id }));
                }
                let id = self.assign(list.addr());
                let items = list
                    .items()
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>, _>>()?;
                json!({ ID: id, LIST: items })
            }
            Value::Record(record) => {
                if let Some(id) = self.ids.get(&record.addr()) {
                    return Ok(json!({ BACKREF: id }));
                }
                let id = self.assign(record.addr());
                let mut entries = Vec::with_capacity(record.len());
                for (key, item) in record.entries() {
                    entries.push(json!([key, self.encode(&item)?]));
                }
                json!({ ID: id, RECORD: entries })
            }
            Value::Ref(token) => json!({
                PROTOCOL_MARKER: true,
                "kind": TokenKind::Ref.as_str(),
                "id": token.id(),
            }),
            Value::Callable(_) => return Err(CodecError::UnexpectedCallable),
        })
    }

    fn assign(&mut self, addr: usize) -> u64 {
        let id = self.ids.len() as u64;
        self.ids.insert(addr, id);
        id
    }
}

#[derive(Default)]
struct Decoder {
    nodes: HashMap<u64, Value>,
}

impl Decoder {
    fn decode(&mut self, node: &Json) -> Result<Value, CodecError> {
        Ok(match node {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(_) => return Err(invalid("node", "untagged array")),
            Json::Object(obj) => self.decode_object(obj)?,
        })
    }

    fn decode_object(&mut self, obj: &Map<String, Json>) -> Result<Value, CodecError> {
        if obj.contains_key(PROTOCOL_MARKER) {
            return decode_token(obj);
        }

        if let Some(target) = obj.get(BACKREF) {
            let id = target
                .as_u64()
                .ok_or_else(|| invalid("$ref", "expected a node id"))?;
            return self
                .nodes
                .get(&id)
                .cloned()
                .ok_or(CodecError::DanglingReference(id));
        }

        if let Some(name) = obj.get(FLOAT) {
            return match name.as_str() {
                Some("NaN") => Ok(Value::Float(f64::NAN)),
                Some("Infinity") => Ok(Value::Float(f64::INFINITY)),
                Some("-Infinity") => Ok(Value::Float(f64::NEG_INFINITY)),
                _ => Err(invalid("$float", "expected NaN, Infinity or -Infinity")),
            };
        }

        if let Some(hex) = obj.get(BYTES) {
            let bytes = match hex {
                Json::Null => None,
                Json::String(s) => Some(Bytes::from(hex::decode(s)?)),
                _ => return Err(invalid("$bytes", "expected a hex string")),
            };
            return Ok(Value::Buffer(Buffer::from_slot(bytes)));
        }

        let id = obj
            .get(ID)
            .ok_or(CodecError::MissingField("$id"))?
            .as_u64()
            .ok_or_else(|| invalid("$id", "expected a node id"))?;

        if let Some(items) = obj.get(LIST) {
            let items = items
                .as_array()
                .ok_or_else(|| invalid("$list", "expected an array"))?;
            let list = List::with_capacity(items.len());
            self.nodes.insert(id, Value::List(list.back_link()));
            for item in items {
                let item = self.decode(item)?;
                list.push(item);
            }
            self.nodes.insert(id, Value::List(list.clone()));
            return Ok(Value::List(list));
        }

        if let Some(entries) = obj.get(RECORD) {
            let entries = entries
                .as_array()
                .ok_or_else(|| invalid("$record", "expected an array"))?;
            let record = Record::new();
            self.nodes.insert(id, Value::Record(record.back_link()));
            for entry in entries {
                let (key, item) = match entry.as_array().map(Vec::as_slice) {
                    Some([Json::String(key), item]) => (key, item),
                    _ => return Err(invalid("$record", "expected [key, node] pairs")),
                };
                let item = self.decode(item)?;
                record.insert(key.clone(), item);
            }
            self.nodes.insert(id, Value::Record(record.clone()));
            return Ok(Value::Record(record));
        }

        Err(invalid("node", "unrecognized object tag"))
    }
}

fn non_finite_name(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn decode_token(obj: &Map<String, Json>) -> Result<Value, CodecError> {
    let kind = str_field(obj, "kind")?;
    match TokenKind::parse(kind) {
        Some(TokenKind::Ref) => Ok(Value::Ref(CallableRef::new(str_field(obj, "id")?))),
        Some(TokenKind::Inline) | None => Err(CodecError::UnsupportedToken(kind.to_string())),
    }
}
