//! Google Cloud Storage client: service-account OAuth, S3-compatible XML API
//!
//! Auth is a two-step flow: an RS256 JWT assertion built from the service
//! account's email and private key is exchanged at the token endpoint for
//! a bearer token, which is cached until shortly before expiry and
//! refreshed once on 401. Object traffic uses the XML API on
//! `{bucket}.storage.googleapis.com`, whose listing body matches the S3
//! `ListBucketResult` shape.

use super::{
    classify_status, http_client, remote_key_for, with_retries, xml, ObjectStore, RemoteError,
};
use crate::config::GcpSettings;
use crate::paths::PathCodec;
use crate::types::{FileEntry, Provider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

/// Refresh when the cached token has less than this much life left.
fn token_slack() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct BearerToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct GcsStore {
    http: reqwest::Client,
    client_email: String,
    signing_key: EncodingKey,
    bucket: String,
    codec: PathCodec,
    token: Mutex<Option<BearerToken>>,
}

impl GcsStore {
    pub fn new(settings: &GcpSettings, vault_name: &str) -> Result<Self, RemoteError> {
        if settings.client_email.trim().is_empty() || settings.bucket.trim().is_empty() {
            return Err(RemoteError::Configuration(
                "GCS client email and bucket must be set".to_string(),
            ));
        }
        // The portal exports keys with literal "\n" escapes inside JSON;
        // accept both forms.
        let pem = settings.private_key.replace("\\n", "\n");
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            RemoteError::Configuration(format!("GCS private key is not a valid RSA PEM: {}", e))
        })?;
        Ok(Self {
            http: http_client()?,
            client_email: settings.client_email.trim().to_string(),
            signing_key,
            bucket: settings.bucket.trim().to_string(),
            codec: PathCodec::new(Provider::Gcp, vault_name),
            token: Mutex::new(None),
        })
    }

    fn list_prefix(&self) -> String {
        format!("{}/", self.codec.prefix())
    }

    /// Build the signed assertion and exchange it for a bearer token.
    async fn fetch_token(&self) -> Result<BearerToken, RemoteError> {
        let now = Utc::now();
        let claims = JwtClaims {
            iss: &self.client_email,
            scope: SCOPE,
            aud: TOKEN_URI,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.signing_key,
        )
        .map_err(|e| RemoteError::Configuration(format!("cannot sign GCS assertion: {}", e)))?;

        let form = format!(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion={}",
            assertion
        );
        let response = self
            .http
            .post(TOKEN_URI)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(RemoteError::Auth(format!(
                "token exchange failed with HTTP {}: {}",
                status,
                text.trim()
            )));
        }
        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteError::Wire(format!("malformed token response: {}", e)))?;
        let lifetime = Duration::seconds(parsed.expires_in.unwrap_or(3600));
        debug!("gcs: obtained bearer token, lifetime {}s", lifetime.num_seconds());
        Ok(BearerToken {
            value: parsed.access_token,
            expires_at: now + lifetime,
        })
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at - token_slack() > Utc::now() {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn drop_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send one request, refreshing the bearer token once on 401.
    async fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<&Bytes>,
        content_type: Option<&str>,
        context: &str,
    ) -> Result<Bytes, RemoteError> {
        let mut refreshed = false;
        loop {
            let token = self.bearer().await?;
            let mut url = format!("https://{}.storage.googleapis.com{}", self.bucket, path);
            if !query.is_empty() {
                let qs = super::sigv4::canonical_query_string(query);
                url.push('?');
                url.push_str(&qs);
            }
            let mut request = match method {
                "GET" => self.http.get(&url),
                "PUT" => self.http.put(&url),
                "DELETE" => self.http.delete(&url),
                other => {
                    return Err(RemoteError::Wire(format!("unsupported method {}", other)))
                }
            };
            request = request.header("authorization", format!("Bearer {}", token));
            if let Some(ct) = content_type {
                request = request.header("content-type", ct);
            }
            if let Some(b) = body {
                request = request.body(b.clone());
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                return Ok(response.bytes().await?);
            }
            let text = response.text().await.unwrap_or_default();

            if status == 401 && !refreshed {
                debug!("gcs: 401 with cached token, refreshing once");
                self.drop_token().await;
                refreshed = true;
                continue;
            }

            return Err(classify_status(status, &text, context));
        }
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<xml::S3ListPage, RemoteError> {
        let mut query = vec![("prefix".to_string(), self.list_prefix())];
        if let Some(m) = marker {
            query.push(("marker".to_string(), m.to_string()));
        }
        let body = self.send("GET", "/", &query, None, None, "list").await?;
        let text = String::from_utf8_lossy(&body);
        xml::parse_s3_list(&text).map_err(RemoteError::Wire)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn authenticate(&self) -> Result<(), RemoteError> {
        with_retries("gcs authenticate", || async {
            self.bearer().await?;
            self.list_page(None).await?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<FileEntry>, RemoteError> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = with_retries("gcs list", || self.list_page(marker.as_deref())).await?;
            for obj in page.objects {
                if obj.key.ends_with('/') {
                    continue;
                }
                let Some(name) = self.codec.remote_to_local(&obj.key) else {
                    debug!("gcs: skipping foreign key {}", obj.key);
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
                match page.next_marker.or(page.next_continuation_token) {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            } else {
                break;
            }
        }
        debug!("gcs: listed {} objects under {}", entries.len(), self.list_prefix());
        Ok(entries)
    }

    async fn read(&self, entry: &FileEntry) -> Result<Bytes, RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        let path = format!("/{}", key);
        with_retries("gcs read", || async {
            self.send("GET", &path, &[], None, None, &entry.name).await
        })
        .await
    }

    async fn write(&self, entry: &FileEntry, body: Bytes) -> Result<(), RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        let path = format!("/{}", key);
        with_retries("gcs write", || {
            let body = body.clone();
            let path = path.clone();
            async move {
                self.send("PUT", &path, &[], Some(&body), Some(&entry.mime), &entry.name)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), RemoteError> {
        let key = remote_key_for(&self.codec, entry);
        let path = format!("/{}", key);
        let result = with_retries("gcs delete", || async {
            self.send("DELETE", &path, &[], None, None, &entry.name).await?;
            Ok(())
        })
        .await;
        match result {
            Err(RemoteError::NotFound(_)) => {
                debug!("gcs: delete of absent object {} treated as success", key);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_pem() {
        let settings = GcpSettings {
            enabled: true,
            client_email: "svc@project.iam.gserviceaccount.com".to_string(),
            private_key: "not a pem".to_string(),
            bucket: "b".to_string(),
        };
        assert!(matches!(
            GcsStore::new(&settings, "notes"),
            Err(RemoteError::Configuration(_))
        ));
    }

    #[test]
    fn test_new_rejects_missing_fields() {
        let settings = GcpSettings {
            enabled: true,
            client_email: String::new(),
            private_key: String::new(),
            bucket: "b".to_string(),
        };
        assert!(matches!(
            GcsStore::new(&settings, "notes"),
            Err(RemoteError::Configuration(_))
        ));
    }
}
