//! Identifier normalization.
//!
//! The canonical identifier is the 48-character lowercase hex encoding of a
//! truncated (24 byte) SHA-512 digest. Clients may also send a 32-hex MD5
//! digest, the GA4GH url-safe base64 form (optionally prefixed `SQ.`), or
//! any of these behind a `trunc512:` / `md5:` / `ga4gh:` namespace. The
//! 24 GA4GH bytes ARE the trunc512 digest, so base64 decoding yields the
//! record key directly; only MD5 needs an alias hop through the store.

use crate::store::IndexStore;

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// MD5 keys alias the trunc512 digest of the same sequence.
fn md5_lookup(store: &IndexStore, md5: &str) -> Option<String> {
    let value = store.lookup(md5.as_bytes())?;
    String::from_utf8(value.to_vec()).ok()
}

/// Decode a GA4GH digest (optional `SQ.` prefix) into trunc512 hex.
/// Returns `None` when the base64 payload does not decode; the caller
/// reports an unknown identifier, not a bad request.
pub fn ga4gh_to_trunc512(qid: &str) -> Option<String> {
    let body = qid.strip_prefix("SQ.").unwrap_or(qid);
    let bin = base64::decode_config(body, base64::URL_SAFE_NO_PAD).ok()?;
    Some(hex::encode(bin))
}

/// Encode a trunc512 hex digest as the GA4GH form, `SQ.` prefix included.
/// 24 bytes encode to exactly 32 base64 characters, no padding.
pub fn trunc512_to_ga4gh(digest: &str) -> Option<String> {
    let bin = hex::decode(digest).ok()?;
    Some(format!(
        "SQ.{}",
        base64::encode_config(bin, base64::URL_SAFE_NO_PAD)
    ))
}

/// Map a client-supplied identifier to the canonical 48-hex trunc512 form.
///
/// `None` means the identifier cannot be resolved and the caller reports
/// 404. A `Some` result is not a guarantee that a record exists: a bare
/// 48-hex or GA4GH identifier is taken at face value and the record lookup
/// may still come back empty.
pub fn normalize(store: &IndexStore, qid: &str) -> Option<String> {
    if qid.len() == 48 && is_hex(qid) {
        return Some(qid.to_ascii_lowercase());
    }
    if qid.len() == 32 && is_hex(qid) {
        return md5_lookup(store, &qid.to_ascii_lowercase());
    }

    let (namespace, rest) = match qid.split_once(':') {
        Some((ns, rest)) => (ns.to_ascii_lowercase(), rest),
        None => ("ga4gh".to_string(), qid),
    };

    match namespace.as_str() {
        "trunc512" if rest.len() == 48 && is_hex(rest) => Some(rest.to_ascii_lowercase()),
        "md5" if rest.len() == 32 && is_hex(rest) => {
            md5_lookup(store, &rest.to_ascii_lowercase())
        }
        "ga4gh" if rest.len() == 32 || rest.len() == 35 => ga4gh_to_trunc512(rest),
        _ => None,
    }
}
