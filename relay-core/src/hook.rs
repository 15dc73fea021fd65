//! Transport hooks: wrap a transport's send step so the body reaches the native
//! host, keyed by a correlation id carried in the URL, before the request fires.
//!
//! Per request: gate, tag, encode, relay, wait for acknowledgment, dispatch.
//! A relay that is never acknowledged never dispatches; there is no retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::body::{self, BodyEnvelope, FormData, NormalizeError, RequestBody};
use crate::bridge::{Bridge, BridgeError, ReplyHandler};
use crate::config::{HookConfig, ReadFailurePolicy, RelayMode};
use crate::gate::{self, GateSnapshot};
use crate::id::{CorrelationId, IdGenerator};
use crate::pending::PendingTable;
use crate::protocol::{RelayPayload, RequestDescriptor};
use crate::url;
use crate::wire::{self, PayloadEncodeError};

/// Error raised by a wrapped transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("request {id}: {source}")]
    BodyRead {
        id: CorrelationId,
        #[source]
        source: NormalizeError,
    },
    #[error("request {id}: relay unavailable: {source}")]
    RelayUnavailable {
        id: CorrelationId,
        #[source]
        source: BridgeError,
    },
    #[error("request {id}: {source}")]
    Payload {
        id: CorrelationId,
        #[source]
        source: PayloadEncodeError,
    },
    #[error("request {0}: relay context shut down before acknowledgment")]
    Abandoned(CorrelationId),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// How a request left the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not intercepted; original call made untouched.
    Passthrough,
    /// Body relayed and acknowledged; original call made with the tagged URL.
    HandedOff(CorrelationId),
    /// Body unreadable; original call made without hand-off (passthrough policy).
    Unrelayed(CorrelationId),
}

/// Page-side HTTP request object: configure, then send.
pub trait HttpTransport {
    fn open(&mut self, method: &str, url: &str, is_async: bool) -> Result<(), TransportError>;
    fn send(&mut self, body: RequestBody) -> Result<(), TransportError>;
}

/// Form element with a submit primitive.
pub trait FormTransport {
    fn action(&self) -> String;
    fn set_action(&mut self, action: String);
    fn method(&self) -> String;
    fn enctype(&self) -> String;
    /// Current field values, in document order.
    fn form_data(&self) -> FormData;
    fn submit(&mut self) -> Result<(), TransportError>;
}

/// Beacon primitive. Returns whether the user agent queued the beacon.
pub trait BeaconTransport {
    fn send_beacon(&mut self, url: &str, body: RequestBody) -> Result<bool, TransportError>;
}

/// Process-wide hook state, created once at startup and shut down on unload.
pub struct RelayContext {
    config: HookConfig,
    enabled: AtomicBool,
    closed: AtomicBool,
    ids: IdGenerator,
    pending: PendingTable,
    bridge: Arc<dyn Bridge>,
    location: Mutex<String>,
}

impl RelayContext {
    pub fn new(
        config: HookConfig,
        bridge: Arc<dyn Bridge>,
        document_href: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(config.ajax_hook),
            config,
            closed: AtomicBool::new(false),
            ids: IdGenerator::new(),
            pending: PendingTable::new(),
            bridge,
            location: Mutex::new(document_href.into()),
        })
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Toggle the feature flag the gate consults.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Effective gate flag: feature on, context alive, bridge ready.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.is_live()
    }

    /// Context not shut down and bridge ready.
    fn is_live(&self) -> bool {
        !self.is_closed() && self.bridge.is_ready()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Document location, used as origin href and as base for relative URLs.
    pub fn location(&self) -> String {
        self.location.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn set_location(&self, href: impl Into<String>) {
        if let Ok(mut l) = self.location.lock() {
            *l = href.into();
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        self.ids.next()
    }

    /// Query-tag `url`, resolving it against the document location.
    pub fn tag_url(&self, raw_url: &str, id: &CorrelationId) -> String {
        let base = self.location();
        let base = (!base.is_empty()).then_some(base.as_str());
        url::encode_query(raw_url, base, &self.config.marker_name, id)
    }

    /// Stop intercepting and drop every pending continuation. Hand-offs still
    /// waiting end with `HookError::Abandoned`.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self.pending.clear();
        if dropped > 0 {
            warn!(dropped, "relay context shut down with pending hand-offs");
        }
        dropped
    }

    fn blocking_for(&self, request_is_async: bool) -> bool {
        match self.config.relay_mode {
            RelayMode::Async => false,
            RelayMode::Sync => true,
            RelayMode::MatchRequest => !request_is_async,
        }
    }

    /// Relay the descriptor and wait until the native host has the body.
    async fn relay(&self, descriptor: RequestDescriptor, blocking: bool) -> Result<(), HookError> {
        let id = descriptor.id.clone();
        let payload = RelayPayload::from(descriptor);
        let (value, len) = wire::encode_payload(&payload, self.config.max_payload_bytes)
            .map_err(|source| {
                error!(request_id = %id, error = %source, "relay payload rejected");
                HookError::Payload {
                    id: id.clone(),
                    source,
                }
            })?;

        // Shutdown may have run while the body was being read.
        if self.is_closed() {
            debug!(request_id = %id, "relay context closed; hand-off abandoned");
            return Err(HookError::Abandoned(id));
        }
        let (tx, rx) = oneshot::channel::<()>();
        self.pending.register(
            id.clone(),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        if self.is_closed() {
            self.pending.cancel(id.as_str());
            return Err(HookError::Abandoned(id));
        }

        let module = self.config.bridge_module.as_str();
        let method = self.config.bridge_method.as_str();
        let issued = if blocking {
            debug!(request_id = %id, bytes = len, "relaying body (blocking)");
            self.bridge.sync_call(module, method, value).map(|_| {
                self.pending.resolve_and_run(id.as_str());
            })
        } else {
            debug!(request_id = %id, bytes = len, "relaying body");
            let pending = self.pending.clone();
            let on_reply: ReplyHandler = Box::new(move |reply| match wire::decode_ack(reply) {
                Ok(ack) => {
                    if pending.resolve_and_run(ack.request_id.as_str()) {
                        debug!(request_id = %ack.request_id, "acknowledged");
                    } else {
                        warn!(request_id = %ack.request_id, "acknowledgment for no pending request ignored");
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed acknowledgment"),
            });
            self.bridge.call(module, method, value, on_reply)
        };

        if let Err(source) = issued {
            self.pending.cancel(id.as_str());
            error!(request_id = %id, error = %source, "relay unavailable; request not dispatched");
            return Err(HookError::RelayUnavailable { id, source });
        }

        rx.await.map_err(|_| HookError::Abandoned(id))
    }

    /// Apply the read-failure policy. `dispatch` makes the original call.
    fn read_failed(
        &self,
        id: CorrelationId,
        source: NormalizeError,
        dispatch: impl FnOnce() -> Result<(), TransportError>,
    ) -> Result<Dispatch, HookError> {
        match self.config.on_read_failure {
            ReadFailurePolicy::FailClosed => {
                error!(request_id = %id, error = %source, "body read failed; request dropped");
                Err(HookError::BodyRead { id, source })
            }
            ReadFailurePolicy::Passthrough => {
                warn!(request_id = %id, error = %source, "body read failed; sending without hand-off");
                dispatch()?;
                Ok(Dispatch::Unrelayed(id))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct OpenState {
    id: CorrelationId,
    href: String,
    is_async: bool,
    gate: GateSnapshot,
    /// Context liveness when the gate was first evaluated.
    live: bool,
}

/// Gate outcome at the second call point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendGate {
    Consistent(bool),
    /// Bridge readiness or context shutdown changed since open.
    Lifecycle,
    /// Decision changed with the context in the same state.
    Mismatch,
}

/// Decorator over an HTTP request object. `open` tags the URL when the gate
/// allows; `send` relays the body before releasing the original send.
pub struct HookedHttpRequest<T> {
    ctx: Arc<RelayContext>,
    inner: T,
    state: Option<OpenState>,
}

impl<T: HttpTransport> HookedHttpRequest<T> {
    pub fn new(ctx: Arc<RelayContext>, inner: T) -> Self {
        Self {
            ctx,
            inner,
            state: None,
        }
    }

    pub fn open(&mut self, method: &str, url: &str, is_async: bool) -> Result<(), HookError> {
        let id = self.ctx.next_id();
        let gate = GateSnapshot::evaluate(url, method, self.ctx.is_enabled());
        let target = if gate.intercept {
            self.ctx.tag_url(url, &id)
        } else {
            url.to_string()
        };
        debug!(request_id = %id, method, url, intercept = gate.intercept, "open");
        self.inner.open(method, &target, is_async)?;
        self.state = Some(OpenState {
            id,
            href: self.ctx.location(),
            is_async,
            gate,
            live: self.ctx.is_live(),
        });
        Ok(())
    }

    fn recheck(&self, state: &OpenState) -> SendGate {
        match state.gate.recheck(self.ctx.is_enabled()) {
            Ok(decision) => SendGate::Consistent(decision),
            Err(_) if state.live != self.ctx.is_live() => SendGate::Lifecycle,
            Err(_) => SendGate::Mismatch,
        }
    }

    pub async fn send(&mut self, body: RequestBody) -> Result<Dispatch, HookError> {
        let Some(state) = self.state.clone() else {
            self.inner.send(body)?;
            return Ok(Dispatch::Passthrough);
        };
        let intercept = match self.recheck(&state) {
            SendGate::Consistent(decision) => decision,
            SendGate::Lifecycle => {
                warn!(
                    request_id = %state.id,
                    at_open = state.gate.intercept,
                    "bridge or context changed state between open and send; passing through"
                );
                false
            }
            SendGate::Mismatch => {
                error!(
                    request_id = %state.id,
                    at_open = state.gate.intercept,
                    "gate decision changed between open and send; passing through"
                );
                false
            }
        };
        if !intercept || !body.is_relayable() {
            self.inner.send(body)?;
            return Ok(Dispatch::Passthrough);
        }

        let normalized = body::normalize(&body).await;
        let envelope = match normalized {
            Ok(env) => env,
            Err(e) => {
                let inner = &mut self.inner;
                return self.ctx.read_failed(state.id, e, move || inner.send(body));
            }
        };
        let descriptor = RequestDescriptor {
            id: state.id.clone(),
            origin_href: state.href,
            request_url: state.gate.url,
            http_method: state.gate.method,
            body: envelope,
            form_enctype: None,
        };
        self.ctx
            .relay(descriptor, self.ctx.blocking_for(state.is_async))
            .await?;
        self.inner.send(body)?;
        debug!(request_id = %state.id, "dispatched");
        Ok(Dispatch::HandedOff(state.id))
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Decorator over a form. The action is tagged just before the original submit.
pub struct HookedForm<F> {
    ctx: Arc<RelayContext>,
    inner: F,
}

impl<F: FormTransport> HookedForm<F> {
    pub fn new(ctx: Arc<RelayContext>, inner: F) -> Self {
        Self { ctx, inner }
    }

    pub async fn submit(&mut self) -> Result<Dispatch, HookError> {
        let action = self.inner.action();
        let method = self.inner.method();
        if action.is_empty() || !gate::should_intercept(&action, &method, self.ctx.is_enabled()) {
            self.inner.submit()?;
            return Ok(Dispatch::Passthrough);
        }

        let id = self.ctx.next_id();
        let href = self.ctx.location();
        let form = self.inner.form_data();
        let records = match body::normalize_form(&form).await {
            Ok(r) => r,
            Err(e) => {
                let inner = &mut self.inner;
                return self.ctx.read_failed(id, e, move || inner.submit());
            }
        };
        let enctype = self.inner.enctype();
        let descriptor = RequestDescriptor {
            id: id.clone(),
            origin_href: href,
            request_url: action.clone(),
            http_method: method,
            body: BodyEnvelope::FormDataRecords(records),
            form_enctype: (!enctype.is_empty()).then_some(enctype),
        };
        self.ctx.relay(descriptor, self.ctx.blocking_for(true)).await?;
        let tagged = self.ctx.tag_url(&action, &id);
        debug!(request_id = %id, action = %tagged, "submitting form");
        self.inner.set_action(tagged);
        self.inner.submit()?;
        Ok(Dispatch::HandedOff(id))
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

/// Result of a hooked beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconOutcome {
    pub dispatch: Dispatch,
    /// The original primitive's return value.
    pub queued: bool,
}

/// Decorator over the beacon primitive. Beacons are always POST.
pub struct HookedBeacon<B> {
    ctx: Arc<RelayContext>,
    inner: B,
}

impl<B: BeaconTransport> HookedBeacon<B> {
    pub fn new(ctx: Arc<RelayContext>, inner: B) -> Self {
        Self { ctx, inner }
    }

    pub async fn send_beacon(
        &mut self,
        url: &str,
        body: RequestBody,
    ) -> Result<BeaconOutcome, HookError> {
        if !body.is_relayable() || !gate::should_intercept(url, "POST", self.ctx.is_enabled()) {
            let queued = self.inner.send_beacon(url, body)?;
            return Ok(BeaconOutcome {
                dispatch: Dispatch::Passthrough,
                queued,
            });
        }

        let id = self.ctx.next_id();
        let href = self.ctx.location();
        let normalized = body::normalize(&body).await;
        let envelope = match normalized {
            Ok(env) => env,
            Err(e) => {
                let mut queued = false;
                let inner = &mut self.inner;
                let dispatch = self.ctx.read_failed(id, e, || {
                    queued = inner.send_beacon(url, body)?;
                    Ok(())
                })?;
                return Ok(BeaconOutcome { dispatch, queued });
            }
        };
        let descriptor = RequestDescriptor {
            id: id.clone(),
            origin_href: href,
            request_url: url.to_string(),
            http_method: "POST".to_string(),
            body: envelope,
            form_enctype: None,
        };
        self.ctx.relay(descriptor, self.ctx.blocking_for(true)).await?;
        let tagged = self.ctx.tag_url(url, &id);
        let queued = self.inner.send_beacon(&tagged, body)?;
        Ok(BeaconOutcome {
            dispatch: Dispatch::HandedOff(id),
            queued,
        })
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}
