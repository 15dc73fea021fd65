//! Bridge transport: the single channel to the native host.
//!
//! The primitives belong to the hosting shell; this module fixes their shape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

/// Callback receiving the native reply on a later turn.
pub type ReplyHandler = Box<dyn FnOnce(Value) + Send + 'static>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge not available")]
    Unavailable,
    #[error("bridge rejected call: {0}")]
    Rejected(String),
}

/// Native bridge primitives.
pub trait Bridge: Send + Sync {
    /// Whether the native side is initialized. The gate refuses interception until it is.
    fn is_ready(&self) -> bool {
        true
    }

    /// Fire-and-forget call; `on_reply` runs when the host answers.
    fn call(
        &self,
        module: &str,
        method: &str,
        payload: Value,
        on_reply: ReplyHandler,
    ) -> Result<(), BridgeError>;

    /// Blocking call; returns once the host has answered.
    fn sync_call(&self, module: &str, method: &str, payload: Value) -> Result<Value, BridgeError>;
}

/// When the loopback bridge answers async calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Reply inline from `call`.
    Immediate,
    /// Queue replies until `flush`.
    Deferred,
    /// Never reply.
    Silent,
}

/// One call observed by the loopback bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub module: String,
    pub method: String,
    pub payload: Value,
    pub sync: bool,
}

/// In-process bridge that records every call and acknowledges by echoing the
/// payload's `requestId`.
pub struct LoopbackBridge {
    mode: AckMode,
    ready: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
    queued: Mutex<Vec<(ReplyHandler, Value)>>,
}

impl LoopbackBridge {
    pub fn new(mode: AckMode) -> Self {
        Self {
            mode,
            ready: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of replies waiting for `flush`.
    pub fn queued(&self) -> usize {
        self.queued.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Deliver queued replies in call order. Returns how many were delivered.
    pub fn flush(&self) -> usize {
        let drained: Vec<(ReplyHandler, Value)> = match self.queued.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => return 0,
        };
        let n = drained.len();
        for (on_reply, ack) in drained {
            on_reply(ack);
        }
        n
    }

    fn record(&self, module: &str, method: &str, payload: &Value, sync: bool) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                module: module.to_string(),
                method: method.to_string(),
                payload: payload.clone(),
                sync,
            });
        }
    }
}

fn echo_ack(payload: &Value) -> Value {
    json!({ "requestId": payload.get("requestId").cloned().unwrap_or(Value::Null) })
}

impl Bridge for LoopbackBridge {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn call(
        &self,
        module: &str,
        method: &str,
        payload: Value,
        on_reply: ReplyHandler,
    ) -> Result<(), BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::Unavailable);
        }
        self.record(module, method, &payload, false);
        let ack = echo_ack(&payload);
        match self.mode {
            AckMode::Immediate => on_reply(ack),
            AckMode::Deferred => {
                if let Ok(mut q) = self.queued.lock() {
                    q.push((on_reply, ack));
                }
            }
            AckMode::Silent => {}
        }
        Ok(())
    }

    fn sync_call(&self, module: &str, method: &str, payload: Value) -> Result<Value, BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::Unavailable);
        }
        self.record(module, method, &payload, true);
        Ok(echo_ack(&payload))
    }
}
