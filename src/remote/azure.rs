//! Azure Blob client: account-SAS auth, container lifecycle, blob ops
//!
//! Auth is an account-level Shared Access Signature minted locally from
//! the storage account key (HMAC-SHA256 over the fixed nine-field
//! string-to-sign of signed-version 2018-03-28), cached for the process
//! lifetime and re-minted once on 403. Blob names are stored unencoded;
//! only the HTTP layer percent-encodes them on the wire.

use super::sigv4::{hmac_sha256, uri_encode};
use super::{classify_status, http_client, remote_key_for, with_retries, xml, ObjectStore, RemoteError};
use crate::config::AzureSettings;
use crate::paths::{azure_container_name, PathCodec};
use crate::types::{FileEntry, Provider};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Signed version whose account-SAS string-to-sign is the nine-field form.
const SAS_VERSION: &str = "2018-03-28";

/// SAS permissions: read, write, delete, list, create, add.
const SAS_PERMISSIONS: &str = "rwdlac";

/// SAS validity window.
fn sas_validity() -> Duration {
    Duration::hours(1)
}

/// Re-mint when the cached token has less than this much life left.
fn sas_slack() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone)]
struct SasToken {
    query: String,
    expires_at: DateTime<Utc>,
}

pub struct AzureStore {
    http: reqwest::Client,
    account: String,
    /// Storage account key, base64-decoded at construction.
    key: Vec<u8>,
    container: String,
    codec: PathCodec,
    sas: Mutex<Option<SasToken>>,
}

impl AzureStore {
    pub fn new(settings: &AzureSettings, vault_name: &str) -> Result<Self, RemoteError> {
        if settings.account.trim().is_empty() {
            return Err(RemoteError::Configuration(
                "Azure account is not set".to_string(),
            ));
        }
        let key = BASE64.decode(settings.access_key.trim()).map_err(|e| {
            RemoteError::Configuration(format!("Azure access key is not valid base64: {}", e))
        })?;
        Ok(Self {
            http: http_client()?,
            account: settings.account.trim().to_string(),
            key,
            container: azure_container_name(vault_name),
            codec: PathCodec::new(Provider::Azure, vault_name),
            sas: Mutex::new(None),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Mint an account SAS: services blob, resource types service +
    /// container + object, HTTPS only.
    fn mint_sas(&self, now: DateTime<Utc>) -> SasToken {
        let expiry = now + sas_validity();
        let expiry_str = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let string_to_sign = format!(
            "{}\n{}\nb\nsco\n\n{}\n\nhttps\n{}\n",
            self.account, SAS_PERMISSIONS, expiry_str, SAS_VERSION
        );
        let signature = BASE64.encode(hmac_sha256(&self.key, string_to_sign.as_bytes()));
        let query = format!(
            "sv={}&ss=b&srt=sco&sp={}&se={}&spr=https&sig={}",
            SAS_VERSION,
            SAS_PERMISSIONS,
            uri_encode(&expiry_str, true),
            uri_encode(&signature, true)
        );
        SasToken {
            query,
            expires_at: expiry,
        }
    }

    fn sas_query(&self) -> String {
        let mut guard = self.sas.lock();
        let now = Utc::now();
        let fresh = match guard.as_ref() {
            Some(token) if token.expires_at - sas_slack() > now => token.clone(),
            _ => {
                let token = self.mint_sas(now);
                debug!("azure: minted account SAS valid until {}", token.expires_at);
                *guard = Some(token.clone());
                token
            }
        };
        fresh.query
    }

    fn drop_sas(&self) {
        *self.sas.lock() = None;
    }

    fn blob_url_path(&self, blob: &str) -> String {
        // Wire-level encoding only; the stored name stays unencoded.
        format!("/{}/{}", self.container, uri_encode(blob, false))
    }

    /// Send one request, re-minting the SAS once on 403.
    async fn send(
        &self,
        method: &str,
        path: &str,
        extra_query: &[(String, String)],
        body: Option<&Bytes>,
        content_type: Option<&str>,
        block_blob: bool,
        context: &str,
    ) -> Result<Bytes, RemoteError> {
        let mut reminted = false;
        loop {
            let mut url = format!(
                "https://{}.blob.core.windows.net{}?{}",
                self.account,
                path,
                self.sas_query()
            );
            for (k, v) in extra_query {
                url.push('&');
                url.push_str(k);
                url.push('=');
                url.push_str(&uri_encode(v, true));
            }

            let mut request = match method {
                "GET" => self.http.get(&url),
                "PUT" => self.http.put(&url),
                "DELETE" => self.http.delete(&url),
                other => {
                    return Err(RemoteError::Wire(format!("unsupported method {}", other)))
                }
            };
            if block_blob {
                request = request.header("x-ms-blob-type", "BlockBlob");
            }
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

            if status == 403 && !reminted {
                debug!("azure: 403 with cached SAS, re-minting once");
                self.drop_sas();
                reminted = true;
                continue;
            }

            return Err(match classify_status(status, &text, context) {
                RemoteError::Auth(message) => RemoteError::Auth(format!(
                    "{} (if credentials are correct, check the storage account CORS rules)",
                    message
                )),
                other => other,
            });
        }
    }

    async fn create_container(&self) -> Result<(), RemoteError> {
        let path = format!("/{}", self.container);
        let query = [("restype".to_string(), "container".to_string())];
        match self
            .send("PUT", &path, &query, None, None, false, "create container")
            .await
        {
            Ok(_) => {
                info!("azure: created container {}", self.container);
                Ok(())
            }
            // Already created by a concurrent run.
            Err(RemoteError::Status { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<xml::AzureListPage, RemoteError> {
        let path = format!("/{}", self.container);
        let mut query = vec![
            ("restype".to_string(), "container".to_string()),
            ("comp".to_string(), "list".to_string()),
        ];
        if let Some(m) = marker {
            query.push(("marker".to_string(), m.to_string()));
        }
        let body = self
            .send("GET", &path, &query, None, None, false, "list")
            .await?;
        let text = String::from_utf8_lossy(&body);
        xml::parse_azure_list(&text).map_err(RemoteError::Wire)
    }
}

#[async_trait]
impl ObjectStore for AzureStore {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    async fn authenticate(&self) -> Result<(), RemoteError> {
        with_retries("azure authenticate", || async {
            match self.list_page(None).await {
                Ok(_) => Ok(()),
                // A missing container is the fresh-remote signal, not an
                // auth failure; it will be created on first use.
                Err(RemoteError::NotFound(_)) => {
                    info!("azure: container {} will be created", self.container);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn list(&self) -> Result<Vec<FileEntry>, RemoteError> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = match with_retries("azure list", || self.list_page(marker.as_deref())).await
            {
                Ok(page) => page,
                Err(RemoteError::NotFound(_)) => {
                    info!("azure: container {} is absent, creating it", self.container);
                    self.create_container().await?;
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };
            for obj in page.objects {
                if obj.key.ends_with('/') {
                    continue;
                }
                let Some(name) = self.codec.remote_to_local(&obj.key) else {
                    continue;
                };
                entries.push(FileEntry::remote(
                    name,
                    obj.key,
                    obj.last_modified,
                    obj.size,
                    obj.md5,
                ));
            }
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        debug!(
            "azure: listed {} blobs in container {}",
            entries.len(),
            self.container
        );
        Ok(entries)
    }

    async fn read(&self, entry: &FileEntry) -> Result<Bytes, RemoteError> {
        let blob = remote_key_for(&self.codec, entry);
        let path = self.blob_url_path(&blob);
        with_retries("azure read", || async {
            self.send("GET", &path, &[], None, None, false, &entry.name)
                .await
        })
        .await
    }

    async fn write(&self, entry: &FileEntry, body: Bytes) -> Result<(), RemoteError> {
        let blob = remote_key_for(&self.codec, entry);
        let path = self.blob_url_path(&blob);
        let mut container_created = false;
        loop {
            let result = with_retries("azure write", || {
                let body = body.clone();
                let path = path.clone();
                async move {
                    self.send(
                        "PUT",
                        &path,
                        &[],
                        Some(&body),
                        Some(&entry.mime),
                        true,
                        &entry.name,
                    )
                    .await?;
                    Ok(())
                }
            })
            .await;
            match result {
                Err(RemoteError::NotFound(_)) if !container_created => {
                    self.create_container().await?;
                    container_created = true;
                }
                other => return other,
            }
        }
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), RemoteError> {
        let blob = remote_key_for(&self.codec, entry);
        let path = self.blob_url_path(&blob);
        let result = with_retries("azure delete", || async {
            self.send("DELETE", &path, &[], None, None, false, &entry.name)
                .await?;
            Ok(())
        })
        .await;
        match result {
            Err(RemoteError::NotFound(_)) => {
                debug!("azure: delete of absent blob {} treated as success", blob);
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> AzureSettings {
        AzureSettings {
            enabled: true,
            account: "acct".to_string(),
            // base64 of "0123456789abcdef"
            access_key: "MDEyMzQ1Njc4OWFiY2RlZg==".to_string(),
        }
    }

    #[test]
    fn test_new_rejects_bad_key() {
        let mut s = settings();
        s.access_key = "!!not-base64!!".to_string();
        assert!(matches!(
            AzureStore::new(&s, "notes"),
            Err(RemoteError::Configuration(_))
        ));
    }

    #[test]
    fn test_container_derived_from_vault() {
        let store = AzureStore::new(&settings(), "My Notes").unwrap();
        assert_eq!(store.container(), "my-notes");
    }

    #[test]
    fn test_mint_sas_shape() {
        let store = AzureStore::new(&settings(), "notes").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let token = store.mint_sas(now);
        assert_eq!(token.expires_at, now + sas_validity());
        assert!(token.query.contains("sv=2018-03-28"));
        assert!(token.query.contains("ss=b"));
        assert!(token.query.contains("srt=sco"));
        assert!(token.query.contains("sp=rwdlac"));
        assert!(token.query.contains("spr=https"));
        assert!(token.query.contains("se=2024-01-01T13%3A00%3A00Z"));
        assert!(token.query.contains("sig="));
    }

    #[test]
    fn test_mint_sas_deterministic() {
        let store = AzureStore::new(&settings(), "notes").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(store.mint_sas(now).query, store.mint_sas(now).query);
    }

    #[test]
    fn test_blob_url_path_encodes_on_wire() {
        let store = AzureStore::new(&settings(), "notes").unwrap();
        assert_eq!(
            store.blob_url_path("daily/my note.md"),
            "/notes/daily/my%20note.md"
        );
    }
}
