//! In-memory value graph.
//!
//! Aggregates (`List`, `Record`) are shared nodes with reference identity,
//! so a graph may contain shared sub-structure and cycles. Callables are
//! local async handlers; they never cross the channel themselves.
//!
//! A cycle built by hand out of strong handles is never freed. Graphs the
//! library builds (marshal shadows, decoded payloads, materialized views)
//! hold the edge that closes each cycle as a back-reference instead.

use crate::domain::token::CallableRef;
use crate::error::{CodecError, HandlerError};
use crate::transform::view::View;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

/// Future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

pub(crate) type HandlerFn = dyn Fn(View) -> HandlerFuture + Send + Sync;

/// A locally invocable async handler.
///
/// Clones share identity; the registry and payload transform compare
/// callables by identity, never by behaviour.
#[derive(Clone)]
pub struct Callable(Arc<HandlerFn>);

impl Callable {
    /// Wrap an async closure taking the call's argument list.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(View) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |args| f(args).boxed()))
    }

    /// Start the handler.
    pub fn invoke(&self, args: View) -> HandlerFuture {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<HandlerFn> {
        Arc::downgrade(&self.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({:#x})", self.addr())
    }
}

// =============================================================================
// NODE LINKS
// =============================================================================

/// Handle to an aggregate node.
///
/// Graphs built by the payload transform and the codec store the edge that
/// closes a cycle as a `Back` link, so dropping the root frees the whole
/// graph. A `Back` link to a dropped node reads as empty.
#[derive(Clone)]
enum Link<T> {
    Strong(Arc<RwLock<T>>),
    Back(Weak<RwLock<T>>),
}

impl<T: Default> Default for Link<T> {
    fn default() -> Self {
        Self::Strong(Arc::default())
    }
}

impl<T> Link<T> {
    fn new(node: T) -> Self {
        Self::Strong(Arc::new(RwLock::new(node)))
    }

    fn with<R>(&self, f: impl FnOnce(&RwLock<T>) -> R) -> Option<R> {
        match self {
            Self::Strong(node) => Some(f(node)),
            Self::Back(node) => node.upgrade().map(|node| f(&node)),
        }
    }

    fn back(&self) -> Self {
        match self {
            Self::Strong(node) => Self::Back(Arc::downgrade(node)),
            Self::Back(node) => Self::Back(node.clone()),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Back(node) => node.strong_count() > 0,
        }
    }

    fn addr(&self) -> usize {
        match self {
            Self::Strong(node) => Arc::as_ptr(node) as *const () as usize,
            Self::Back(node) => node.as_ptr() as *const () as usize,
        }
    }
}

/// Ordered sequence node.
#[derive(Clone, Default)]
pub struct List(Link<Vec<Value>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Link::new(items))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.0.with(|n| n.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.with(|n| n.read().get(index).cloned()).flatten()
    }

    pub fn push(&self, value: Value) {
        self.0.with(|n| n.write().push(value));
    }

    /// Replace the item at `index`. Returns false when out of bounds.
    pub fn set(&self, index: usize, value: Value) -> bool {
        self.0
            .with(|n| match n.write().get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            })
            .unwrap_or(false)
    }

    /// Snapshot of the items; the node lock is not held afterwards.
    pub fn items(&self) -> Vec<Value> {
        self.0.with(|n| n.read().clone()).unwrap_or_default()
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        self.addr() == other.addr()
    }

    /// False once a back-reference outlives the node it points to.
    pub fn is_live(&self) -> bool {
        self.0.is_live()
    }

    /// Non-owning handle to this node, used for the edge closing a cycle.
    pub fn back_link(&self) -> List {
        Self(self.0.back())
    }

    pub(crate) fn addr(&self) -> usize {
        self.0.addr()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List(len={}, {:#x})", self.len(), self.addr())
    }
}

/// Keyed record node. Keys keep insertion order.
#[derive(Clone, Default)]
pub struct Record(Link<Vec<(String, Value)>>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let record = Self::new();
        for (key, value) in entries {
            record.insert(key, value);
        }
        record
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        self.0
            .with(|n| {
                let mut entries = n.write();
                if let Some((_, slot)) = entries.iter_mut().find(|(k, _)| *k == key) {
                    return Some(std::mem::replace(slot, value));
                }
                entries.push((key, value));
                None
            })
            .flatten()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .with(|n| {
                n.read()
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            })
            .flatten()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0
            .with(|n| {
                let mut entries = n.write();
                let position = entries.iter().position(|(k, _)| k == key)?;
                Some(entries.remove(position).1)
            })
            .flatten()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0
            .with(|n| n.read().iter().any(|(k, _)| k == key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0
            .with(|n| n.read().iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the entries; the node lock is not held afterwards.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.with(|n| n.read().clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.with(|n| n.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        self.addr() == other.addr()
    }

    /// False once a back-reference outlives the node it points to.
    pub fn is_live(&self) -> bool {
        self.0.is_live()
    }

    /// Non-owning handle to this node, used for the edge closing a cycle.
    pub fn back_link(&self) -> Record {
        Self(self.0.back())
    }

    pub(crate) fn addr(&self) -> usize {
        self.0.addr()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record(keys={:?}, {:#x})", self.keys(), self.addr())
    }
}

/// A transferable byte resource.
///
/// Transferring moves the bytes into a new handle without copying and
/// leaves this handle detached.
#[derive(Clone)]
pub struct Buffer(Arc<Mutex<Option<Bytes>>>);

impl Buffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(Arc::new(Mutex::new(Some(bytes.into()))))
    }

    pub(crate) fn from_slot(bytes: Option<Bytes>) -> Self {
        Self(Arc::new(Mutex::new(bytes)))
    }

    /// Length in bytes; zero once detached.
    pub fn len(&self) -> usize {
        self.0.lock().as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_detached(&self) -> bool {
        self.0.lock().is_none()
    }

    pub fn bytes(&self) -> Option<Bytes> {
        self.0.lock().clone()
    }

    /// Deep copy into an independent handle.
    pub(crate) fn copy(&self) -> Buffer {
        let copied = self
            .0
            .lock()
            .as_ref()
            .map(|bytes| Bytes::copy_from_slice(bytes));
        Self::from_slot(copied)
    }

    /// Move the bytes into a fresh handle, detaching this one.
    pub(crate) fn transfer(&self) -> Buffer {
        Self::from_slot(self.0.lock().take())
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_detached() {
            write!(f, "Buffer(detached)")
        } else {
            write!(f, "Buffer(len={})", self.len())
        }
    }
}

/// A value in the local graph.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Buffer(Buffer),
    List(List),
    Record(Record),
    Callable(Callable),
    /// An already-tagged callable-reference token.
    Ref(CallableRef),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(List::new(items))
    }

    pub fn record<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Record(Record::from_entries(entries))
    }

    pub fn callable<F, Fut>(f: F) -> Self
    where
        F: Fn(View) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Callable(Callable::new(f))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::List(_) | Self::Record(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Convert plain data into JSON.
    ///
    /// Buffers become hex strings. Callables, tokens, cycles and non-finite
    /// floats are errors.
    pub fn to_json(&self) -> Result<serde_json::Value, CodecError> {
        to_json_inner(self, &mut HashSet::new())
    }
}

fn to_json_inner(
    value: &Value,
    in_progress: &mut HashSet<usize>,
) -> Result<serde_json::Value, CodecError> {
    use serde_json::Value as Json;

    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .ok_or(CodecError::NonFinite(*n))?,
        Value::Str(s) => Json::String(s.clone()),
        Value::Buffer(b) => b.bytes().map_or(Json::Null, |b| Json::String(hex::encode(b))),
        Value::List(list) => {
            if !in_progress.insert(list.addr()) {
                return Err(CodecError::Cyclic);
            }
            let items = list
                .items()
                .iter()
                .map(|item| to_json_inner(item, in_progress))
                .collect::<Result<Vec<_>, _>>()?;
            in_progress.remove(&list.addr());
            Json::Array(items)
        }
        Value::Record(record) => {
            if !in_progress.insert(record.addr()) {
                return Err(CodecError::Cyclic);
            }
            let mut map = serde_json::Map::new();
            for (key, item) in record.entries() {
                map.insert(key, to_json_inner(&item, in_progress)?);
            }
            in_progress.remove(&record.addr());
            Json::Object(map)
        }
        Value::Callable(_) | Value::Ref(_) => return Err(CodecError::UnexpectedCallable),
    })
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Buffer> for Value {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Self::Callable(callable)
    }
}

impl From<CallableRef> for Value {
    fn from(token: CallableRef) -> Self {
        Self::Ref(token)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::Str(s),
            Json::Array(items) => Self::list(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Self::record(map.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}
