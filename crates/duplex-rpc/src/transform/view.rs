//! Unmarshal: transport payload → read-through view.
//!
//! Received graphs are not rebuilt eagerly. A [`View`] wraps an aggregate
//! node and resolves each field on access: nested aggregates come back as
//! further views, callable tokens as call stubs, everything else as-is.
//! Stubs are cached per received message by token id, so repeated access to
//! the same embedded callable yields the same stub and its settings.

use crate::domain::envelope::Payload;
use crate::domain::token::CallableRef;
use crate::domain::value::{Buffer, Callable, List, Record, Value};
use crate::error::{HandlerError, RpcError};
use crate::service::endpoint::Shared;
use crate::service::tracker::{self, CallHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Build the read-through view of a received payload.
///
/// Stubs created from it issue their calls through `endpoint`.
pub(crate) fn unmarshal(payload: Payload, endpoint: Weak<Shared>) -> Received {
    let root = payload.into_value();
    let scope = Arc::new(ViewScope {
        root: root.clone(),
        endpoint,
        stubs: Mutex::new(HashMap::new()),
    });
    scope.resolve(root)
}

/// State shared by every view over one received message.
pub(crate) struct ViewScope {
    /// Keeps nodes reached through back-links alive while any view exists
    root: Value,
    endpoint: Weak<Shared>,
    stubs: Mutex<HashMap<String, RemoteFn>>,
}

impl ViewScope {
    fn resolve(self: &Arc<Self>, value: Value) -> Received {
        match value {
            Value::List(list) => Received::View(View {
                node: Node::List(list),
                scope: Arc::clone(self),
            }),
            Value::Record(record) => Received::View(View {
                node: Node::Record(record),
                scope: Arc::clone(self),
            }),
            Value::Ref(token) => Received::Fn(self.stub(&token)),
            other => Received::Value(other),
        }
    }

    fn stub(&self, token: &CallableRef) -> RemoteFn {
        self.stubs
            .lock()
            .entry(token.id().to_string())
            .or_insert_with(|| RemoteFn::new(token.id(), self.endpoint.clone()))
            .clone()
    }

    fn materialize(&self, value: &Value, seen: &mut HashMap<usize, Value>) -> Value {
        match value {
            Value::List(list) => {
                if let Some(done) = seen.get(&list.addr()) {
                    return done.clone();
                }
                let items = list.items();
                let out = List::with_capacity(items.len());
                seen.insert(list.addr(), Value::List(out.back_link()));
                for item in &items {
                    out.push(self.materialize(item, seen));
                }
                seen.insert(list.addr(), Value::List(out.clone()));
                Value::List(out)
            }
            Value::Record(record) => {
                if let Some(done) = seen.get(&record.addr()) {
                    return done.clone();
                }
                let out = Record::new();
                seen.insert(record.addr(), Value::Record(out.back_link()));
                for (key, item) in record.entries() {
                    out.insert(key, self.materialize(&item, seen));
                }
                seen.insert(record.addr(), Value::Record(out.clone()));
                Value::Record(out)
            }
            Value::Ref(token) => Value::Callable(self.stub(token).to_callable()),
            other => other.clone(),
        }
    }
}

#[derive(Clone)]
enum Node {
    List(List),
    Record(Record),
}

/// Read-through view over a received aggregate.
#[derive(Clone)]
pub struct View {
    node: Node,
    scope: Arc<ViewScope>,
}

impl View {
    /// Field access. On a list, `key` is parsed as an index.
    pub fn get(&self, key: &str) -> Option<Received> {
        let value = match &self.node {
            Node::Record(record) => record.get(key)?,
            Node::List(list) => list.get(key.parse().ok()?)?,
        };
        Some(self.scope.resolve(value))
    }

    /// Positional access on a list; `None` for records.
    pub fn index(&self, index: usize) -> Option<Received> {
        match &self.node {
            Node::List(list) => list.get(index).map(|v| self.scope.resolve(v)),
            Node::Record(_) => None,
        }
    }

    /// Positional handler argument.
    pub fn arg(&self, index: usize) -> Result<Received, HandlerError> {
        self.index(index)
            .ok_or_else(|| HandlerError::new(format!("missing argument {index}")))
    }

    pub fn len(&self) -> usize {
        match &self.node {
            Node::List(list) => list.len(),
            Node::Record(record) => record.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_list(&self) -> bool {
        matches!(self.node, Node::List(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self.node, Node::Record(_))
    }

    /// Record keys in order, or list indices.
    pub fn keys(&self) -> Vec<String> {
        match &self.node {
            Node::Record(record) => record.keys(),
            Node::List(list) => (0..list.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Every item (list) or field value (record), resolved.
    pub fn values(&self) -> Vec<Received> {
        let values = match &self.node {
            Node::List(list) => list.items(),
            Node::Record(record) => record.entries().into_iter().map(|(_, v)| v).collect(),
        };
        values
            .into_iter()
            .map(|v| self.scope.resolve(v))
            .collect()
    }

    /// True when both views wrap the same received node.
    pub fn ptr_eq(&self, other: &View) -> bool {
        match (&self.node, &other.node) {
            (Node::List(a), Node::List(b)) => a.ptr_eq(b),
            (Node::Record(a), Node::Record(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Eagerly rebuild a local value. Call stubs become forwarding callables.
    ///
    /// Edges that close a cycle are back-links into the rebuilt graph; keep
    /// the returned root alive while using its descendants.
    pub fn materialize(&self) -> Value {
        let root = match &self.node {
            Node::List(list) => Value::List(list.clone()),
            Node::Record(record) => Value::Record(record.clone()),
        };
        self.scope.materialize(&root, &mut HashMap::new())
    }

    /// Materialized items of a list view; empty for records.
    pub fn to_vec(&self) -> Vec<Value> {
        match self.materialize() {
            Value::List(list) => list.items(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::List(list) => write!(f, "View({list:?})"),
            Node::Record(record) => write!(f, "View({record:?})"),
        }
    }
}

/// A value obtained from the other side.
#[derive(Clone, Debug)]
pub enum Received {
    /// Scalar or buffer, delivered as-is
    Value(Value),
    /// Aggregate, resolved lazily
    View(View),
    /// Embedded callable
    Fn(RemoteFn),
}

impl Received {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value()?.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value()?.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value()?.as_bool()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value()?.as_str()
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        self.as_value()?.as_buffer()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    pub fn as_view(&self) -> Option<&View> {
        match self {
            Self::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_fn(&self) -> Option<&RemoteFn> {
        match self {
            Self::Fn(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_view(self) -> Option<View> {
        match self {
            Self::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_fn(self) -> Option<RemoteFn> {
        match self {
            Self::Fn(f) => Some(f),
            _ => None,
        }
    }

    /// Convert into a local value, materializing views.
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::View(v) => v.materialize(),
            Self::Fn(f) => Value::Callable(f.to_callable()),
        }
    }
}

#[derive(Default)]
struct StubSettings {
    timeout: Option<Duration>,
    transfer: Vec<Buffer>,
}

struct StubInner {
    name: String,
    endpoint: Weak<Shared>,
    settings: Mutex<StubSettings>,
}

/// Call stub for a callable exposed by the other side.
///
/// Clones share the same settings.
#[derive(Clone)]
pub struct RemoteFn {
    inner: Arc<StubInner>,
}

impl RemoteFn {
    pub(crate) fn new(name: impl Into<String>, endpoint: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(StubInner {
                name: name.into(),
                endpoint,
                settings: Mutex::new(StubSettings::default()),
            }),
        }
    }

    /// Remote handler name this stub calls.
    pub fn id(&self) -> &str {
        &self.inner.name
    }

    /// Timeout for subsequent calls; `None` means the endpoint default.
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.settings.lock().timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.settings.lock().timeout = Some(timeout);
    }

    /// Resources to transfer with the next invocation.
    pub fn set_transfer(&self, transfer: Vec<Buffer>) {
        self.inner.settings.lock().transfer = transfer;
    }

    /// Issue a call to the remote handler.
    pub fn call(&self, args: Vec<Value>) -> CallHandle {
        let (timeout, transfer) = {
            let mut settings = self.inner.settings.lock();
            (settings.timeout, std::mem::take(&mut settings.transfer))
        };

        match self.inner.endpoint.upgrade() {
            Some(shared) => tracker::issue_call(&shared, &self.inner.name, args, transfer, timeout),
            None => CallHandle::failed(RpcError::connection("endpoint dropped")),
        }
    }

    /// Wrap as a local callable that forwards to the remote handler.
    pub fn to_callable(&self) -> Callable {
        let stub = self.clone();
        Callable::new(move |args: View| {
            let stub = stub.clone();
            async move {
                let result = stub.call(args.to_vec()).await?;
                Ok(result.into_value())
            }
        })
    }

    pub fn ptr_eq(&self, other: &RemoteFn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RemoteFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFn")
            .field("id", &self.inner.name)
            .field("timeout", &self.timeout())
            .finish()
    }
}
