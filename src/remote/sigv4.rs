//! AWS Signature Version 4 request signing
//!
//! Builds the canonical request, derives the signing key through the
//! four-step HMAC chain, and produces the `Authorization` header plus the
//! `x-amz-*` headers every signed S3 request must carry. Signing is pure
//! over its inputs and never retries; credential problems surface before
//! any request leaves the process.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of the empty body — the well-known SigV4 constant.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Static S3 credentials for one run.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// Everything that identifies one HTTP request for signing purposes.
///
/// `path` is the canonical URI: percent-encoded per the key codec, leading
/// slash guaranteed. `query` holds decoded pairs; canonicalization encodes
/// and sorts them here.
pub struct SigningParams<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub region: &'a str,
    pub service: &'a str,
    pub content_type: &'a str,
    pub payload_hash: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// The headers a signed request must carry.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub content_type: String,
}

/// Hex SHA-256 of a request body.
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Sign one request, producing the `Authorization` header and companions.
pub fn sign(creds: &Credentials, params: &SigningParams<'_>) -> SignedHeaders {
    let amz_date = params.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let datestamp = params.timestamp.format("%Y%m%d").to_string();

    // Canonical headers: lowercased names, sorted, `name:value\n` each.
    // The fixed set is host, content-type, x-amz-content-sha256, x-amz-date —
    // already in sorted order below.
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        params.content_type.trim(),
        params.host,
        params.payload_hash,
        amz_date
    );
    let signed_headers = "content-type;host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        params.method,
        params.path,
        canonical_query_string(params.query),
        canonical_headers,
        signed_headers,
        params.payload_hash
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        datestamp, params.region, params.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(
        &creds.secret_key,
        &datestamp,
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key, scope, signed_headers, signature
    );

    SignedHeaders {
        authorization,
        amz_date,
        content_sha256: params.payload_hash.to_string(),
        content_type: params.content_type.to_string(),
    }
}

/// Build the sorted canonical query string from decoded pairs.
pub fn canonical_query_string(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// URI-encode a string per the SigV4 flavor of RFC 3986.
/// Unreserved characters: A-Z a-z 0-9 - _ . ~
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => {
                encoded.push('/');
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

/// Derive the SigV4 signing key: four chained HMAC-SHA256 steps.
pub fn derive_signing_key(
    secret_key: &str,
    datestamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{}", secret_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), datestamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
