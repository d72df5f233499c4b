//! Deterministic derivation of Kubernetes object names from arbitrary keys
//!
//! ACLDNSEntry, TsuruAppAddress and NetworkPolicy objects are keyed by
//! user-controlled strings (hostnames, app names, CIDRs) that are not always
//! valid DNS-1123 subdomains. `valid_resource_name` maps any key onto a valid
//! object name, appending a short content hash whenever sanitization or
//! truncation could make two distinct inputs collide.

use sha2::{Digest, Sha256};

/// Maximum length of a Kubernetes object name (DNS-1123 subdomain)
const MAX_NAME_LEN: usize = 253;

/// Number of hex characters of the content hash kept as a suffix
const HASH_SUFFIX_LEN: usize = 10;

/// Derive a valid, length-bounded object name from an arbitrary key.
///
/// Keys that are already valid DNS-1123 subdomains pass through unchanged, so
/// well-behaved hostnames and app names stay recognizable. Anything else is
/// sanitized (leading wildcard/dot labels stripped, `/` mapped to `-`,
/// uppercase folded) and suffixed with the first 10 hex characters of the
/// key's SHA-256, guaranteeing distinct inputs produce distinct names.
pub fn valid_resource_name(key: &str) -> String {
    if is_valid_subdomain(key) && key.len() <= MAX_NAME_LEN {
        return key.to_string();
    }

    let mut sanitized: String = key
        .to_ascii_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            _ => '-',
        })
        .collect();

    // Leading '.' or '*.' labels are common in wildcard DNS rules; drop the
    // empty leading labels they produce rather than keeping a dash.
    while sanitized.starts_with(['.', '-']) {
        sanitized.remove(0);
    }

    let max_base = MAX_NAME_LEN - HASH_SUFFIX_LEN - 1;
    if sanitized.len() > max_base {
        sanitized.truncate(max_base);
    }

    let digest = Sha256::digest(key.as_bytes());
    let hash = hex_prefix(&digest, HASH_SUFFIX_LEN);

    format!("{sanitized}-{hash}")
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

/// Check the DNS-1123 subdomain rules: lowercase alphanumerics, `-` and `.`,
/// each dot-separated label starting and ending with an alphanumeric.
fn is_valid_subdomain(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}
