//! S3 client: SigV4-signed list/get/put/delete over plain HTTPS
//!
//! Listing walks `list-type=2` pages via `NextContinuationToken` until the
//! response is no longer truncated. A wrong-region bucket answers 301/307;
//! the region is recovered from the `x-amz-bucket-region` header or the
//! `<Endpoint>` element of the body, and the request is re-signed and
//! retried once.

use super::sigv4::{self, Credentials, SigningParams, EMPTY_PAYLOAD_SHA256};
use super::{
    classify_status, http_client, remote_key_for, with_retries, xml, ObjectStore, RemoteError,
};
use crate::config::AwsSettings;
use crate::paths::PathCodec;
use crate::types::{FileEntry, Provider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Fallback when neither header nor redirect body names a region.
const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Store {
    http: reqwest::Client,
    creds: Credentials,
    bucket: String,
    /// Discovered lazily on redirect; starts from the configured value.
    region: RwLock<String>,
    codec: PathCodec,
}

impl S3Store {
    pub fn new(settings: &AwsSettings, vault_name: &str) -> Result<Self, RemoteError> {
        if settings.access_key.trim().is_empty() || settings.secret_key.trim().is_empty() {
            return Err(RemoteError::Configuration(
                "S3 credentials are not set".to_string(),
            ));
        }
        if settings.bucket.trim().is_empty() {
            return Err(RemoteError::Configuration("S3 bucket is not set".to_string()));
        }
        let region = if settings.region.trim().is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            settings.region.trim().to_string()
        };
        Ok(Self {
            http: http_client()?,
            creds: Credentials {
                access_key: settings.access_key.clone(),
                secret_key: settings.secret_key.clone(),
            },
            bucket: settings.bucket.clone(),
            region: RwLock::new(region),
            codec: PathCodec::new(Provider::Aws, vault_name),
        })
    }

    fn host(region: &str) -> String {
        format!("s3.{}.amazonaws.com", region)
    }

    fn list_prefix(&self) -> String {
        format!("{}/", self.codec.prefix())
    }

    /// Send one signed request, following a single region redirect.
    async fn send(
        &self,
        method: &str,
        key: Option<&str>,
        query: &[(String, String)],
        body: Option<&Bytes>,
        content_type: &str,
        context: &str,
    ) -> Result<Bytes, RemoteError> {
        let mut redirected = false;
        loop {
            let region = self.region.read().clone();
            let host = Self::host(&region);
            let path = match key {
                Some(k) => format!("/{}/{}", self.bucket, k),
                None => format!("/{}", self.bucket),
            };
            let payload_hash = match body {
                Some(b) => sigv4::payload_hash(b),
                None => EMPTY_PAYLOAD_SHA256.to_string(),
            };
            let signed = sigv4::sign(
                &self.creds,
                &SigningParams {
                    method,
                    host: &host,
                    path: &path,
                    query,
                    region: &region,
                    service: "s3",
                    content_type,
                    payload_hash: &payload_hash,
                    timestamp: Utc::now(),
                },
            );

            let mut url = format!("https://{}{}", host, path);
            let query_string = sigv4::canonical_query_string(query);
            if !query_string.is_empty() {
                url.push('?');
                url.push_str(&query_string);
            }

            let mut request = match method {
                "GET" => self.http.get(&url),
                "PUT" => self.http.put(&url),
                "DELETE" => self.http.delete(&url),
                other => {
                    return Err(RemoteError::Wire(format!("unsupported method {}", other)))
                }
            };
            request = request
                .header("authorization", &signed.authorization)
                .header("x-amz-date", &signed.amz_date)
                .header("x-amz-content-sha256", &signed.content_sha256)
                .header("content-type", &signed.content_type);
            if let Some(b) = body {
                request = request.body(b.clone());
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                return Ok(response.bytes().await?);
            }

            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();

            if (status == 301 || status == 307) && !redirected {
                let discovered = headers
                    .get("x-amz-bucket-region")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .or_else(|| region_from_endpoint(&text))
                    .unwrap_or_else(|| DEFAULT_REGION.to_string());
                if discovered != region {
                    info!(
                        "s3: bucket {} lives in {}, re-signing (was {})",
                        self.bucket, discovered, region
                    );
                    *self.region.write() = discovered;
                    redirected = true;
                    continue;
                }
            }

            return Err(classify_status(status, &text, context));
        }
    }

    async fn list_page(
        &self,
        token: Option<&str>,
    ) -> Result<xml::S3ListPage, RemoteError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), self.list_prefix()),
        ];
        if let Some(t) = token {
            query.push(("continuation-token".to_string(), t.to_string()));
        }
        let body = self.send("GET", None, &query, None, "application/xml", "list").await?;
        let text = String::from_utf8_lossy(&body);
        xml::parse_s3_list(&text).map_err(RemoteError::Wire)
    }
}

/// Extract the region from a 301 body's `<Endpoint>` element.
fn region_from_endpoint(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"s3[.-]([^.]+)\.amazonaws\.com").expect("static regex")
    });
    re.captures(body).map(|c| c[1].to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn authenticate(&self) -> Result<(), RemoteError> {
        with_retries("s3 authenticate", || async {
            let query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1".to_string()),
                ("prefix".to_string(), self.list_prefix()),
            ];
            self.send("GET", None, &query, None, "application/xml", "authenticate")
                .await?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<FileEntry>, RemoteError> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retries("s3 list", || self.list_page(token.as_deref())).await?;
            for obj in page.objects {
                if obj.key.ends_with('/') {
                    continue; // directory marker
                }
                let Some(name) = self.codec.remote_to_local(&obj.key) else {
                    debug!("s3: skipping foreign key {}", obj.key);
                    continue;
                };
                let remote_name = self.codec.local_to_remote(&name);
                entries.push(FileEntry::remote(
                    name,
                    remote_name,
                    obj.last_modified,
                    obj.size,
                    obj.md5,
                ));
            }
            if page.truncated {
                match page.next_continuation_token.or(page.next_marker) {
                    Some(next) => token = Some(next),
                    None => break,
                }
            } else {
                break;
            }
        }
        debug!("s3: listed {} objects under {}", entries.len(), self.list_prefix());
        Ok(entries)
    }

    async fn read(&self, entry: &FileEntry) -> Result<Bytes, RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        with_retries("s3 read", || async {
            self.send("GET", Some(&key), &[], None, "application/octet-stream", &entry.name)
                .await
        })
        .await
    }

    async fn write(&self, entry: &FileEntry, body: Bytes) -> Result<(), RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        with_retries("s3 write", || {
            let body = body.clone();
            let key = key.clone();
            async move {
                self.send("PUT", Some(&key), &[], Some(&body), &entry.mime, &entry.name)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        let result = with_retries("s3 delete", || async {
            self.send("DELETE", Some(&key), &[], None, "application/octet-stream", &entry.name)
                .await?;
            Ok(())
        })
        .await;
        match result {
            Err(RemoteError::NotFound(_)) => {
                debug!("s3: delete of absent key {} treated as success", key);
                Ok(())
            }
            other => other,
        }
    }
}
