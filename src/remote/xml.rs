//! Provider listing and error XML parsing
//!
//! S3 and GCS speak `ListBucketResult`; Azure speaks `EnumerationResults`.
//! Both are small documents, so serde deserialization via quick-xml is
//! enough. Timestamps that fail to parse fall back to "now" rather than
//! failing the listing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// One object row extracted from a listing page, digest already normalized
/// to lowercase hex (empty when the provider did not supply a usable MD5).
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub md5: String,
}

/// One page of an S3/GCS `ListBucketResult`.
#[derive(Debug)]
pub struct S3ListPage {
    pub objects: Vec<RemoteObject>,
    pub truncated: bool,
    /// S3 v2 pagination.
    pub next_continuation_token: Option<String>,
    /// GCS XML-API pagination (v1 style).
    pub next_marker: Option<String>,
}

/// One page of an Azure `EnumerationResults`.
#[derive(Debug)]
pub struct AzureListPage {
    pub objects: Vec<RemoteObject>,
    pub next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListContents>,
    #[serde(default)]
    is_truncated: Option<bool>,
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListContents {
    key: String,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default, rename = "ETag")]
    etag: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(default, rename = "Blobs")]
    blobs: Option<AzureBlobs>,
    #[serde(default, rename = "NextMarker")]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AzureBlobs {
    #[serde(default, rename = "Blob")]
    blob: Vec<AzureBlob>,
}

#[derive(Debug, Deserialize)]
struct AzureBlob {
    #[serde(rename = "Name")]
    name: String,
    #[serde(default, rename = "Properties")]
    properties: Option<AzureBlobProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct AzureBlobProperties {
    #[serde(default, rename = "Last-Modified")]
    last_modified: Option<String>,
    #[serde(default, rename = "Content-Length")]
    content_length: Option<u64>,
    #[serde(default, rename = "Content-MD5")]
    content_md5: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse an S3/GCS `ListBucketResult` page.
pub fn parse_s3_list(xml: &str) -> Result<S3ListPage, String> {
    let parsed: ListBucketResult =
        quick_xml::de::from_str(xml).map_err(|e| format!("malformed ListBucketResult: {}", e))?;
    let objects = parsed
        .contents
        .into_iter()
        .map(|c| RemoteObject {
            md5: c.etag.as_deref().map(md5_from_etag).unwrap_or_default(),
            last_modified: parse_iso8601(c.last_modified.as_deref(), &c.key),
            size: c.size.unwrap_or(0),
            key: c.key,
        })
        .collect();
    Ok(S3ListPage {
        objects,
        truncated: parsed.is_truncated.unwrap_or(false),
        next_continuation_token: none_if_empty(parsed.next_continuation_token),
        next_marker: none_if_empty(parsed.next_marker),
    })
}

/// Parse an Azure `EnumerationResults` page.
pub fn parse_azure_list(xml: &str) -> Result<AzureListPage, String> {
    let parsed: EnumerationResults =
        quick_xml::de::from_str(xml).map_err(|e| format!("malformed EnumerationResults: {}", e))?;
    let objects = parsed
        .blobs
        .unwrap_or_default()
        .blob
        .into_iter()
        .map(|b| {
            let props = b.properties.unwrap_or_default();
            RemoteObject {
                md5: props
                    .content_md5
                    .as_deref()
                    .map(md5_from_base64)
                    .unwrap_or_default(),
                last_modified: parse_rfc1123(props.last_modified.as_deref(), &b.name),
                size: props.content_length.unwrap_or(0),
                key: b.name,
            }
        })
        .collect();
    Ok(AzureListPage {
        objects,
        next_marker: none_if_empty(parsed.next_marker),
    })
}

/// Extract `<Code>`/`<Message>` from a provider error body, if present.
pub fn parse_error_body(xml: &str) -> Option<(String, String)> {
    let parsed: ErrorBody = quick_xml::de::from_str(xml).ok()?;
    match (parsed.code, parsed.message) {
        (None, None) => None,
        (code, message) => Some((code.unwrap_or_default(), message.unwrap_or_default())),
    }
}

/// Normalize an S3/GCS ETag into a hex MD5: strip quotes; multipart ETags
/// (`{hex}-{parts}`) and anything else that is not 32 hex chars count as
/// unknown.
pub fn md5_from_etag(etag: &str) -> String {
    let trimmed = etag.trim_matches('"');
    if trimmed.len() == 32 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        trimmed.to_ascii_lowercase()
    } else {
        String::new()
    }
}

/// Decode Azure's base64 `Content-MD5` into lowercase hex.
pub fn md5_from_base64(b64: &str) -> String {
    match BASE64.decode(b64.trim()) {
        Ok(bytes) if bytes.len() == 16 => hex::encode(bytes),
        _ => String::new(),
    }
}

fn parse_iso8601(value: Option<&str>, key: &str) -> DateTime<Utc> {
    if let Some(v) = value {
        if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
            return dt.with_timezone(&Utc);
        }
        debug!("unparseable LastModified {:?} for {}, using now", v, key);
    }
    Utc::now()
}

fn parse_rfc1123(value: Option<&str>, key: &str) -> DateTime<Utc> {
    if let Some(v) = value {
        if let Ok(dt) = DateTime::parse_from_rfc2822(v) {
            return dt.with_timezone(&Utc);
        }
        debug!("unparseable Last-Modified {:?} for {}, using now", v, key);
    }
    Utc::now()
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
