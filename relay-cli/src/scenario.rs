//! Replay scenarios: a JSON list of transport calls with their bodies.

use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use relay_core::body::FormFile;
use relay_core::{Blob, FormData, RequestBody, UrlSearchParams};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Overrides the configured document location.
    #[serde(default)]
    pub document_href: Option<String>,
    pub requests: Vec<Step>,
}

/// One page-side transport call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Step {
    Xhr {
        method: String,
        url: String,
        #[serde(default = "default_true", rename = "async")]
        is_async: bool,
        #[serde(default)]
        body: BodySpec,
    },
    Form {
        action: String,
        #[serde(default = "default_form_method")]
        method: String,
        #[serde(default = "default_form_enctype")]
        enctype: String,
        #[serde(default)]
        fields: Vec<FieldSpec>,
    },
    Beacon {
        url: String,
        #[serde(default)]
        body: BodySpec,
    },
}

fn default_true() -> bool {
    true
}
fn default_form_method() -> String {
    "post".to_string()
}
fn default_form_enctype() -> String {
    "application/x-www-form-urlencoded".to_string()
}

impl Step {
    pub fn transport(&self) -> &'static str {
        match self {
            Step::Xhr { .. } => "xhr",
            Step::Form { .. } => "form",
            Step::Beacon { .. } => "beacon",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodySpec {
    #[default]
    None,
    Text {
        value: String,
    },
    /// Raw buffer, base64 in the scenario file.
    Binary {
        base64: String,
    },
    Blob {
        base64: String,
        #[serde(default)]
        mime: String,
    },
    Form {
        fields: Vec<FieldSpec>,
    },
    Params {
        pairs: Vec<(String, String)>,
    },
    Document {
        markup: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSpec {
    Text {
        key: String,
        value: String,
    },
    File {
        key: String,
        base64: String,
        #[serde(default)]
        mime: String,
        /// The file's own name; absent for a plain blob.
        #[serde(default)]
        name: Option<String>,
        /// Filename passed when appending; wins over `name`.
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        last_modified: i64,
    },
}

pub fn load(path: &Path) -> Result<Scenario> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("invalid scenario: {}", path.display()))
}

fn decode(b64: &str) -> Result<Vec<u8>> {
    STANDARD.decode(b64).context("invalid base64 in scenario")
}

impl BodySpec {
    pub fn into_body(self) -> Result<RequestBody> {
        Ok(match self {
            BodySpec::None => RequestBody::Absent,
            BodySpec::Text { value } => RequestBody::Text(value),
            BodySpec::Binary { base64 } => RequestBody::Binary(decode(&base64)?),
            BodySpec::Blob { base64, mime } => Blob::from_bytes(decode(&base64)?, mime).into(),
            BodySpec::Form { fields } => form_data(fields)?.into(),
            BodySpec::Params { pairs } => {
                let mut params = UrlSearchParams::new();
                for (k, v) in pairs {
                    params.append(k, v);
                }
                params.into()
            }
            BodySpec::Document { markup } => RequestBody::Document(markup),
        })
    }
}

pub fn form_data(fields: Vec<FieldSpec>) -> Result<FormData> {
    let mut form = FormData::new();
    for field in fields {
        match field {
            FieldSpec::Text { key, value } => form.append_text(key, value),
            FieldSpec::File {
                key,
                base64,
                mime,
                name,
                filename,
                last_modified,
            } => {
                let blob = Blob::from_bytes(decode(&base64)?, mime);
                let mut file = match name {
                    Some(n) => FormFile::from_file(blob, n, last_modified),
                    None => FormFile::from_blob(blob),
                };
                if let Some(f) = filename {
                    file = file.with_filename(f);
                }
                form.append_file(key, file);
            }
        }
    }
    Ok(form)
}

pub const EXAMPLE_SCENARIO: &str = r#"{
  "document_href": "https://app.example.com/checkout",
  "requests": [
    {
      "transport": "xhr",
      "method": "POST",
      "url": "https://api.example.com/submit?x=1",
      "body": { "kind": "text", "value": "hello" }
    },
    {
      "transport": "xhr",
      "method": "GET",
      "url": "https://api.example.com/items"
    },
    {
      "transport": "xhr",
      "method": "PUT",
      "url": "/api/avatar",
      "body": { "kind": "blob", "base64": "iVBORw0KGgo=", "mime": "image/png" }
    },
    {
      "transport": "form",
      "action": "https://forms.example.com/upload",
      "enctype": "multipart/form-data",
      "fields": [
        { "type": "file", "key": "doc", "base64": "aGVsbG8=", "mime": "text/plain", "name": "hello.txt", "last_modified": 1700000000000 },
        { "type": "text", "key": "note", "value": "first draft" }
      ]
    },
    {
      "transport": "beacon",
      "url": "https://stats.example.com/collect",
      "body": { "kind": "params", "pairs": [["event", "checkout"], ["step", "2"]] }
    }
  ]
}"#;
