//! Playback engine contract consumed by the synchronization core.
//!
//! The engine runs its own worker threads. The only things that may cross
//! from those threads into the core are the wakeup callback invocations;
//! everything else (`wait_event`, property get/set, commands) is called from
//! the single consumer context that owns the [`EngineHandle`].

use std::collections::BTreeMap;

use log::debug;

/// Value kind declared when observing a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyFormat {
    None,
    Flag,
    Int64,
    Double,
    String,
    Node,
}

impl PropertyFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyFormat::None => "none",
            PropertyFormat::Flag => "flag",
            PropertyFormat::Int64 => "int64",
            PropertyFormat::Double => "double",
            PropertyFormat::String => "string",
            PropertyFormat::Node => "node",
        }
    }
}

/// Tree-structured engine value. List-shaped properties arrive as `Array`
/// of `Map` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNode {
    None,
    Flag(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Array(Vec<EngineNode>),
    Map(BTreeMap<String, EngineNode>),
}

impl EngineNode {
    pub fn format(&self) -> PropertyFormat {
        match self {
            EngineNode::None => PropertyFormat::None,
            EngineNode::Flag(_) => PropertyFormat::Flag,
            EngineNode::Int64(_) => PropertyFormat::Int64,
            EngineNode::Double(_) => PropertyFormat::Double,
            EngineNode::String(_) => PropertyFormat::String,
            EngineNode::Array(_) | EngineNode::Map(_) => PropertyFormat::Node,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EngineNode::Flag(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view; doubles are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EngineNode::Int64(value) => Some(*value),
            EngineNode::Double(value) if value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EngineNode::Int64(value) => Some(*value as f64),
            EngineNode::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EngineNode::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[EngineNode]> {
        match self {
            EngineNode::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, EngineNode>> {
        match self {
            EngineNode::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` when this node is a map.
    pub fn get(&self, key: &str) -> Option<&EngineNode> {
        self.as_map().and_then(|entries| entries.get(key))
    }

    /// Builds a map node from `(key, value)` pairs.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, EngineNode)>,
        K: Into<String>,
    {
        EngineNode::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for EngineNode {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => EngineNode::None,
            serde_json::Value::Bool(flag) => EngineNode::Flag(flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => EngineNode::Int64(integer),
                None => EngineNode::Double(number.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(text) => EngineNode::String(text),
            serde_json::Value::Array(items) => {
                EngineNode::Array(items.into_iter().map(EngineNode::from).collect())
            }
            serde_json::Value::Object(entries) => EngineNode::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, EngineNode::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&EngineNode> for serde_json::Value {
    fn from(node: &EngineNode) -> Self {
        match node {
            EngineNode::None => serde_json::Value::Null,
            EngineNode::Flag(flag) => serde_json::Value::Bool(*flag),
            EngineNode::Int64(integer) => serde_json::Value::from(*integer),
            EngineNode::Double(double) => serde_json::Value::from(*double),
            EngineNode::String(text) => serde_json::Value::String(text.clone()),
            EngineNode::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            EngineNode::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// One event pulled from the engine queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Queue is empty.
    None,
    PropertyChange {
        name: String,
        value: EngineNode,
    },
    /// Engine is going away; the handle must be released.
    Shutdown,
    /// Any other engine event. Ignored by the core.
    Other(String),
}

/// Callback invoked from arbitrary engine threads when events may be pending.
pub type WakeupCallback = Box<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("can't create engine instance: {0}")]
    Create(String),
    #[error("engine failed to initialize: {0}")]
    Initialize(String),
    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine is no longer available")]
    Unavailable,
    #[error("engine request timed out: {0}")]
    Timeout(String),
}

/// Operations the core needs from a playback engine.
pub trait Engine {
    /// Sets an option before or after initialization.
    fn set_option(&mut self, name: &str, value: EngineNode) -> Result<(), EngineError>;

    /// Registers a process-lifetime observation of `name`.
    fn observe_property(&mut self, name: &str, format: PropertyFormat)
        -> Result<(), EngineError>;

    /// Installs the wakeup callback. Called once, before `initialize`.
    fn set_wakeup_callback(&mut self, callback: WakeupCallback);

    fn initialize(&mut self) -> Result<(), EngineError>;

    /// Returns the next pending event, or [`EngineEvent::None`] once the
    /// queue is empty. `timeout_secs == 0.0` never blocks.
    fn wait_event(&mut self, timeout_secs: f64) -> EngineEvent;

    fn get_property(&mut self, name: &str) -> Option<EngineNode>;

    fn set_property(&mut self, name: &str, value: EngineNode) -> Result<(), EngineError>;

    fn command(&mut self, args: &[String]) -> Result<(), EngineError>;

    /// Tears the engine down. Called once when the handle is released.
    fn terminate(&mut self) {}
}

/// Exclusively owned, nullable engine handle.
///
/// After [`EngineHandle::release`] every accessor becomes a silent no-op.
pub struct EngineHandle {
    engine: Option<Box<dyn Engine>>,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine_mut(&mut self) -> Option<&mut (dyn Engine + 'static)> {
        self.engine.as_deref_mut()
    }

    /// Terminates and drops the engine. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!("Releasing engine handle");
            engine.terminate();
        }
    }

    pub fn get_property(&mut self, name: &str) -> Option<EngineNode> {
        self.engine.as_mut()?.get_property(name)
    }

    /// Best-effort property set; failures are logged, not surfaced.
    pub fn set_property(&mut self, name: &str, value: EngineNode) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if let Err(err) = engine.set_property(name, value) {
            debug!("set_property {} failed: {}", name, err);
        }
    }

    pub fn set_option(&mut self, name: &str, value: EngineNode) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if let Err(err) = engine.set_option(name, value) {
            debug!("set_option {} failed: {}", name, err);
        }
    }

    pub fn command<S: AsRef<str>>(&mut self, args: &[S]) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let args: Vec<String> = args.iter().map(|arg| arg.as_ref().to_string()).collect();
        if let Err(err) = engine.command(&args) {
            debug!("command {:?} failed: {}", args, err);
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
    }
}
