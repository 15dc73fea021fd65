//! Relay wire shapes: the request descriptor, the payload handed to the bridge,
//! and the acknowledgment the native host sends back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::body::{BinarySource, BodyEnvelope, FormRecordValue};
use crate::id::CorrelationId;

/// Relay payload shape version. Bumped on incompatible field changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default bridge module serving the body cache.
pub const DEFAULT_BRIDGE_MODULE: &str = "ajax";

/// Default bridge method that caches one request body.
pub const DEFAULT_BRIDGE_METHOD: &str = "cacheAJAXBody";

/// Default query marker name.
pub const DEFAULT_MARKER_NAME: &str = "BodyRelay-RequestId";

pub const ENCTYPE_MULTIPART: &str = "multipart/form-data";
pub const ENCTYPE_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Everything the native host needs to match a body to its wire request.
/// Built at send time and consumed by the relay.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: CorrelationId,
    /// Document location at send time.
    pub origin_href: String,
    /// URL as given by the page, before tagging.
    pub request_url: String,
    pub http_method: String,
    pub body: BodyEnvelope,
    pub form_enctype: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    String,
    ArrayBuffer,
    Blob,
    FormData,
}

/// Relay payload. Field names are the bridge's JSON keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub request_id: CorrelationId,
    pub request_href: String,
    pub request_url: String,
    pub body_type: BodyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_enctype: Option<String>,
    pub value: Value,
}

impl From<RequestDescriptor> for RelayPayload {
    fn from(d: RequestDescriptor) -> Self {
        let (body_type, implied_enctype, value) = match d.body {
            BodyEnvelope::None => (BodyType::String, None, Value::Null),
            BodyEnvelope::Text(s) => (BodyType::String, None, Value::String(s)),
            BodyEnvelope::UrlEncoded(s) => {
                (BodyType::String, Some(ENCTYPE_URLENCODED), Value::String(s))
            }
            BodyEnvelope::Base64Binary { data, source } => {
                let t = match source {
                    BinarySource::ArrayBuffer => BodyType::ArrayBuffer,
                    BinarySource::Blob => BodyType::Blob,
                };
                (t, None, Value::String(data))
            }
            ref env @ BodyEnvelope::FormDataRecords(ref records) => {
                let file_keys = env.file_keys();
                let form_data: Vec<Value> = records
                    .iter()
                    .map(|r| match &r.value {
                        FormRecordValue::Text(s) => json!([r.key, s]),
                        FormRecordValue::File(f) => json!([r.key, f]),
                    })
                    .collect();
                (
                    BodyType::FormData,
                    Some(ENCTYPE_MULTIPART),
                    json!({ "fileKeys": file_keys, "formData": form_data }),
                )
            }
        };
        RelayPayload {
            request_id: d.id,
            request_href: d.origin_href,
            request_url: d.request_url,
            body_type,
            form_enctype: d.form_enctype.or_else(|| implied_enctype.map(str::to_string)),
            value,
        }
    }
}

/// Native acknowledgment: the body for `request_id` is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub request_id: CorrelationId,
}
