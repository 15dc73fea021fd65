//! Request body hand-off: relay a page's request body to the native host over the
//! bridge, keyed by a correlation id carried in the request URL, before the request fires.
//! Host-driven: the host supplies the bridge and transports; no I/O here.

pub mod body;
pub mod bridge;
pub mod config;
pub mod gate;
pub mod id;
pub mod pending;
pub mod protocol;
pub mod url;
pub mod wire;

pub use body::{Blob, BodyEnvelope, FormData, FormFile, NormalizeError, RequestBody, UrlSearchParams};
pub use bridge::{AckMode, Bridge, BridgeError, LoopbackBridge};
pub use config::{HookConfig, ReadFailurePolicy, RelayMode};
pub use gate::should_intercept;
pub use id::{CorrelationId, IdGenerator};
pub use pending::PendingTable;
pub use protocol::{Ack, RelayPayload, RequestDescriptor, PROTOCOL_VERSION};
pub use hook::{
    BeaconOutcome, BeaconTransport, Dispatch, FormTransport, HookError, HookedBeacon, HookedForm,
    HookedHttpRequest, HttpTransport, RelayContext, TransportError,
};

// Orchestration over the modules above.
pub mod hook;

pub mod ffi;
