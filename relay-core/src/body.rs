//! Request bodies and the normalizer that turns them into transfer-safe envelopes.
//!
//! The bridge channel is text-only, so binary and file content is always base64.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::try_join_all;
use serde::Serialize;

/// Mime type reported for blobs without one, matching data-URL readers.
pub const DEFAULT_BLOB_MIME: &str = "application/octet-stream";

/// Failure reading blob or file content.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BlobReadError(pub String);

/// Anything blob-like whose bytes are read asynchronously.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Declared size in bytes.
    fn size(&self) -> u64;
    /// Declared mime type; empty when unknown.
    fn mime_type(&self) -> &str;
    async fn read(&self) -> Result<Vec<u8>, BlobReadError>;
}

/// Shared handle to a blob source.
#[derive(Clone)]
pub struct Blob(Arc<dyn BlobSource>);

impl Blob {
    pub fn new(source: impl BlobSource + 'static) -> Self {
        Blob(Arc::new(source))
    }

    /// In-memory blob.
    pub fn from_bytes(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Blob::new(MemoryBlob {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    pub fn size(&self) -> u64 {
        self.0.size()
    }

    pub fn mime_type(&self) -> &str {
        self.0.mime_type()
    }

    pub async fn read(&self) -> Result<Vec<u8>, BlobReadError> {
        self.0.read().await
    }

    /// Read the whole blob as `data:<mime>;base64,<payload>`.
    pub async fn read_data_url(&self) -> Result<String, BlobReadError> {
        let bytes = self.read().await?;
        let mime = match self.mime_type() {
            "" => DEFAULT_BLOB_MIME,
            m => m,
        };
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("size", &self.size())
            .field("mime_type", &self.mime_type())
            .finish()
    }
}

struct MemoryBlob {
    data: Vec<u8>,
    mime_type: String,
}

#[async_trait]
impl BlobSource for MemoryBlob {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read(&self) -> Result<Vec<u8>, BlobReadError> {
        Ok(self.data.clone())
    }
}

/// File-like form field: a blob plus optional file metadata.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub blob: Blob,
    /// The file's own name; `None` for a plain blob.
    pub name: Option<String>,
    /// The file's last-modified time; `None` for a plain blob.
    pub last_modified_ms: Option<i64>,
    /// Filename given when the field was appended; wins over `name`.
    pub filename: Option<String>,
}

impl FormFile {
    pub fn from_blob(blob: Blob) -> Self {
        Self {
            blob,
            name: None,
            last_modified_ms: None,
            filename: None,
        }
    }

    pub fn from_file(blob: Blob, name: impl Into<String>, last_modified_ms: i64) -> Self {
        Self {
            blob,
            name: Some(name.into()),
            last_modified_ms: Some(last_modified_ms),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    fn display_name(&self) -> String {
        self.filename
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum FormValue {
    Text(String),
    File(FormFile),
}

/// Ordered multipart form fields.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), FormValue::Text(value.into())));
    }

    pub fn append_file(&mut self, key: impl Into<String>, file: FormFile) {
        self.entries.push((key.into(), FormValue::File(file)));
    }

    pub fn entries(&self) -> &[(String, FormValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered url-encoded parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSearchParams {
    pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }
}

impl fmt::Display for UrlSearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish();
        f.write_str(&encoded)
    }
}

/// A request body as handed to a transport's send step.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Absent,
    Text(String),
    /// Raw binary buffer.
    Binary(Vec<u8>),
    Blob(Blob),
    Form(FormData),
    Params(UrlSearchParams),
    /// Serialized document. Sent as-is, never relayed.
    Document(String),
    /// Any other value, already converted to its string form.
    Other(String),
}

impl RequestBody {
    /// Bodies the hand-off applies to. Absent and document bodies go straight through.
    pub fn is_relayable(&self) -> bool {
        !matches!(self, RequestBody::Absent | RequestBody::Document(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Absent => "absent",
            RequestBody::Text(_) => "text",
            RequestBody::Binary(_) => "binary",
            RequestBody::Blob(_) => "blob",
            RequestBody::Form(_) => "form",
            RequestBody::Params(_) => "params",
            RequestBody::Document(_) => "document",
            RequestBody::Other(_) => "other",
        }
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Text(s.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Text(s)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(b: Vec<u8>) -> Self {
        RequestBody::Binary(b)
    }
}

impl From<Blob> for RequestBody {
    fn from(b: Blob) -> Self {
        RequestBody::Blob(b)
    }
}

impl From<FormData> for RequestBody {
    fn from(f: FormData) -> Self {
        RequestBody::Form(f)
    }
}

impl From<UrlSearchParams> for RequestBody {
    fn from(p: UrlSearchParams) -> Self {
        RequestBody::Params(p)
    }
}

/// Where a base64 payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    ArrayBuffer,
    Blob,
}

/// File field content ready for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub last_modified: i64,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>`.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormRecordValue {
    Text(String),
    File(FileDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRecord {
    pub key: String,
    pub value: FormRecordValue,
}

/// Normalized, transfer-safe body. Exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEnvelope {
    None,
    Text(String),
    Base64Binary { data: String, source: BinarySource },
    FormDataRecords(Vec<FormRecord>),
    UrlEncoded(String),
}

impl BodyEnvelope {
    /// Keys of form records holding a file, in field order.
    pub fn file_keys(&self) -> Vec<&str> {
        match self {
            BodyEnvelope::FormDataRecords(records) => records
                .iter()
                .filter(|r| matches!(r.value, FormRecordValue::File(_)))
                .map(|r| r.key.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to read blob body: {0}")]
    Blob(#[source] BlobReadError),
    #[error("failed to read file for form field {key:?}: {source}")]
    FormFile {
        key: String,
        #[source]
        source: BlobReadError,
    },
}

/// Classify and encode a body. First match wins: absent, binary buffer, blob,
/// form, url-encoded params, then everything else as text.
///
/// Absent, binary, params and text bodies complete without suspending. Form
/// file reads run concurrently; records keep field order, not completion order.
pub async fn normalize(body: &RequestBody) -> Result<BodyEnvelope, NormalizeError> {
    match body {
        RequestBody::Absent => Ok(BodyEnvelope::None),
        RequestBody::Binary(bytes) => Ok(BodyEnvelope::Base64Binary {
            data: STANDARD.encode(bytes),
            source: BinarySource::ArrayBuffer,
        }),
        RequestBody::Blob(blob) => {
            let data = blob.read_data_url().await.map_err(NormalizeError::Blob)?;
            Ok(BodyEnvelope::Base64Binary {
                data,
                source: BinarySource::Blob,
            })
        }
        RequestBody::Form(form) => normalize_form(form)
            .await
            .map(BodyEnvelope::FormDataRecords),
        RequestBody::Params(params) => Ok(BodyEnvelope::UrlEncoded(params.to_string())),
        RequestBody::Text(s) | RequestBody::Document(s) | RequestBody::Other(s) => {
            Ok(BodyEnvelope::Text(s.clone()))
        }
    }
}

/// Encode every form field; file fields are read concurrently.
pub async fn normalize_form(form: &FormData) -> Result<Vec<FormRecord>, NormalizeError> {
    try_join_all(form.entries().iter().map(|(key, value)| async move {
        let value = match value {
            FormValue::Text(s) => FormRecordValue::Text(s.clone()),
            FormValue::File(file) => {
                FormRecordValue::File(describe_file(file).await.map_err(|source| {
                    NormalizeError::FormFile {
                        key: key.clone(),
                        source,
                    }
                })?)
            }
        };
        Ok::<_, NormalizeError>(FormRecord {
            key: key.clone(),
            value,
        })
    }))
    .await
}

async fn describe_file(file: &FormFile) -> Result<FileDescriptor, BlobReadError> {
    let data = file.blob.read_data_url().await?;
    Ok(FileDescriptor {
        name: file.display_name(),
        last_modified: file.last_modified_ms.unwrap_or(0),
        size: file.blob.size(),
        mime_type: file.blob.mime_type().to_string(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    /// Blob that yields `turns` times before answering, to reorder completions.
    struct SlowBlob {
        data: Vec<u8>,
        turns: usize,
    }

    #[async_trait]
    impl BlobSource for SlowBlob {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
        fn mime_type(&self) -> &str {
            "text/plain"
        }
        async fn read(&self) -> Result<Vec<u8>, BlobReadError> {
            for _ in 0..self.turns {
                tokio::task::yield_now().await;
            }
            Ok(self.data.clone())
        }
    }

    struct BrokenBlob;

    #[async_trait]
    impl BlobSource for BrokenBlob {
        fn size(&self) -> u64 {
            10
        }
        fn mime_type(&self) -> &str {
            ""
        }
        async fn read(&self) -> Result<Vec<u8>, BlobReadError> {
            Err(BlobReadError("permission denied".into()))
        }
    }

    #[test]
    fn absent_resolves_without_suspending() {
        let out = normalize(&RequestBody::Absent).now_or_never();
        assert!(matches!(out, Some(Ok(BodyEnvelope::None))));
    }

    #[test]
    fn text_passes_through() {
        let out = normalize(&"hello".into()).now_or_never().unwrap().unwrap();
        assert_eq!(out, BodyEnvelope::Text("hello".into()));
    }

    #[test]
    fn binary_is_plain_base64() {
        let out = normalize(&RequestBody::Binary(vec![0, 1, 2, 255]))
            .now_or_never()
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            BodyEnvelope::Base64Binary {
                data: "AAEC/w==".into(),
                source: BinarySource::ArrayBuffer
            }
        );
    }

    #[test]
    fn params_serialize_url_encoded() {
        let mut p = UrlSearchParams::new();
        p.append("q", "a b");
        p.append("lang", "en&fr");
        let out = normalize(&p.into()).now_or_never().unwrap().unwrap();
        assert_eq!(out, BodyEnvelope::UrlEncoded("q=a+b&lang=en%26fr".into()));
    }

    #[tokio::test]
    async fn blob_becomes_data_url() {
        let blob = Blob::from_bytes(b"hi".to_vec(), "text/plain");
        let out = normalize(&blob.into()).await.unwrap();
        assert_eq!(
            out,
            BodyEnvelope::Base64Binary {
                data: "data:text/plain;base64,aGk=".into(),
                source: BinarySource::Blob
            }
        );
    }

    #[tokio::test]
    async fn untyped_blob_uses_default_mime() {
        let blob = Blob::from_bytes(vec![1u8], "");
        assert_eq!(
            blob.read_data_url().await.unwrap(),
            "data:application/octet-stream;base64,AQ=="
        );
    }

    #[tokio::test]
    async fn form_text_fields_keep_order() {
        let mut form = FormData::new();
        form.append_text("b", "2");
        form.append_text("a", "1");
        let out = normalize(&form.into()).await.unwrap();
        assert!(out.file_keys().is_empty());
        match out {
            BodyEnvelope::FormDataRecords(records) => {
                let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
                assert_eq!(keys, ["b", "a"]);
            }
            other => panic!("expected form records, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn form_file_then_text() {
        let mut form = FormData::new();
        let blob = Blob::from_bytes(b"abc".to_vec(), "text/plain");
        form.append_file("f", FormFile::from_file(blob, "a.txt", 1_600_000_000_000));
        form.append_text("t", "x");
        let out = normalize(&form.into()).await.unwrap();
        assert_eq!(out.file_keys(), ["f"]);
        let BodyEnvelope::FormDataRecords(records) = out else {
            panic!("expected form records");
        };
        assert_eq!(records[0].key, "f");
        assert_eq!(
            records[0].value,
            FormRecordValue::File(FileDescriptor {
                name: "a.txt".into(),
                last_modified: 1_600_000_000_000,
                size: 3,
                mime_type: "text/plain".into(),
                data: "data:text/plain;base64,YWJj".into(),
            })
        );
        assert_eq!(records[1].value, FormRecordValue::Text("x".into()));
    }

    #[tokio::test]
    async fn slow_reads_do_not_reorder_fields() {
        let mut form = FormData::new();
        form.append_file(
            "slow",
            FormFile::from_blob(Blob::new(SlowBlob {
                data: b"1".to_vec(),
                turns: 5,
            })),
        );
        form.append_file(
            "fast",
            FormFile::from_blob(Blob::new(SlowBlob {
                data: b"2".to_vec(),
                turns: 0,
            })),
        );
        let out = normalize(&form.into()).await.unwrap();
        assert_eq!(out.file_keys(), ["slow", "fast"]);
    }

    #[tokio::test]
    async fn filename_wins_over_blob_defaults() {
        let mut form = FormData::new();
        let blob = Blob::from_bytes(vec![0u8; 4], "image/png");
        form.append_file("pic", FormFile::from_blob(blob).with_filename("p.png"));
        let records = normalize_form(&form).await.unwrap();
        let FormRecordValue::File(desc) = &records[0].value else {
            panic!("expected file");
        };
        assert_eq!(desc.name, "p.png");
        assert_eq!(desc.last_modified, 0);
        assert_eq!(desc.size, 4);
    }

    #[tokio::test]
    async fn failed_file_read_rejects() {
        let mut form = FormData::new();
        form.append_text("t", "x");
        form.append_file("f", FormFile::from_blob(Blob::new(BrokenBlob)));
        let err = normalize(&form.into()).await.unwrap_err();
        assert!(matches!(err, NormalizeError::FormFile { ref key, .. } if key == "f"));
    }

    #[tokio::test]
    async fn failed_blob_read_rejects() {
        let err = normalize(&Blob::new(BrokenBlob).into()).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Blob(_)));
    }

    #[test]
    fn document_and_absent_not_relayable() {
        assert!(!RequestBody::Absent.is_relayable());
        assert!(!RequestBody::Document("<x/>".into()).is_relayable());
        assert!(RequestBody::Other("[object]".into()).is_relayable());
    }
}
