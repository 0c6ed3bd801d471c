//! Per-provider path codec and vault-prefix arithmetic
//!
//! Three coordinate systems meet here: the local filesystem path, the
//! canonical vault-relative `name`, and the provider-specific remote key.
//! S3 and GCS keys are percent-encoded per segment; Azure blob names pass
//! through unencoded (the HTTP layer encodes on the wire). The round-trip
//! `remote_to_local(local_to_remote(n)) == n` must hold for every
//! normalized name — the reconciler's name join is its only consumer, and
//! it breaks silently if this drifts.

use crate::types::Provider;

/// Codec for one provider's key space, fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct PathCodec {
    provider: Provider,
    /// Key prefix for S3/GCS (`{prefix}/{key}`); empty for Azure, where the
    /// container itself carries the vault identity.
    prefix: String,
}

impl PathCodec {
    pub fn new(provider: Provider, vault_name: &str) -> Self {
        let prefix = match provider {
            Provider::Aws | Provider::Gcp => vault_prefix_token(vault_name),
            Provider::Azure => String::new(),
        };
        Self { provider, prefix }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// The vault prefix joined onto S3/GCS keys. Empty for Azure.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Translate a canonical name into the provider's remote key.
    pub fn local_to_remote(&self, name: &str) -> String {
        match self.provider {
            Provider::Aws | Provider::Gcp => {
                format!("{}/{}", self.prefix, encode_key(name))
            }
            Provider::Azure => name.to_string(),
        }
    }

    /// Translate a remote key back into a canonical name.
    ///
    /// Returns `None` for keys outside the vault prefix (foreign objects in
    /// a shared bucket) and for keys that decode to an empty name.
    pub fn remote_to_local(&self, remote_name: &str) -> Option<String> {
        let decoded = match self.provider {
            Provider::Aws | Provider::Gcp => {
                percent_decode(&decode_xml_entities(remote_name))
            }
            // Azure blob names are stored verbatim; only listing-level XML
            // entities need undoing.
            Provider::Azure => decode_xml_entities(remote_name),
        };
        let unified = decoded.replace('\\', "/");
        let name = if self.prefix.is_empty() {
            unified
        } else {
            unified.strip_prefix(&format!("{}/", self.prefix))?.to_string()
        };
        if name.is_empty() {
            return None;
        }
        Some(name)
    }
}

/// Percent-encode one key per RFC 3986, segment-aware.
///
/// Unreserved characters (`A-Z a-z 0-9 - _ . ~`) and the `/` between
/// segments pass through; space becomes `%20` (never the query-style `+`);
/// a valid pre-encoded `%XX` triple is preserved verbatim so keys that
/// already round-tripped once are not double-encoded.
pub fn encode_key(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut encoded = String::with_capacity(bytes.len() * 3);
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(b as char);
            }
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                encoded.push('%');
                encoded.push(bytes[i + 1] as char);
                encoded.push(bytes[i + 2] as char);
                i += 3;
                continue;
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", b));
            }
        }
        i += 1;
    }
    encoded
}

/// Percent-decode a remote key. `+` is a literal plus, not a space.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode XML numeric character references (`&#xNN;`, `&#NN;`) and the
/// predefined entities. Provider listings return these forms for keys
/// containing XML-significant characters.
pub fn decode_xml_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let replacement = decode_entity(entity);
        match replacement {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(num) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        return u32::from_str_radix(num, 16).ok().and_then(char::from_u32);
    }
    if let Some(num) = entity.strip_prefix('#') {
        return num.parse::<u32>().ok().and_then(char::from_u32);
    }
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    }
}

/// URL-safe lowercase tokenization of a vault folder name, used as the
/// S3/GCS key prefix: runs of anything outside `[a-z0-9-]` collapse to a
/// single dash.
pub fn vault_prefix_token(vault_name: &str) -> String {
    let mut token = String::with_capacity(vault_name.len());
    let mut pending_dash = false;
    for c in vault_name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            if pending_dash && !token.is_empty() {
                token.push('-');
            }
            pending_dash = false;
            token.push(c);
        } else {
            pending_dash = true;
        }
    }
    let trimmed = token.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "vault".to_string()
    } else {
        trimmed
    }
}

/// Derive an Azure container name from the vault folder name.
///
/// Container constraints: `[a-z0-9-]{3,63}`, no consecutive dashes, must
/// start and end alphanumeric. Short names are padded with `x`; long names
/// are truncated and re-stripped of any trailing dash.
pub fn azure_container_name(vault_name: &str) -> String {
    let mut name = String::with_capacity(vault_name.len());
    let mut last_dash = false;
    for c in vault_name.to_lowercase().chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            Some(c)
        } else {
            Some('-')
        };
        if let Some(m) = mapped {
            if m == '-' {
                if last_dash || name.is_empty() {
                    continue;
                }
                last_dash = true;
            } else {
                last_dash = false;
            }
            name.push(m);
        }
    }
    let mut name = name.trim_matches('-').to_string();
    while name.len() < 3 {
        name.push('x');
    }
    if name.len() > 63 {
        name.truncate(63);
        name = name.trim_end_matches('-').to_string();
    }
    name
}
