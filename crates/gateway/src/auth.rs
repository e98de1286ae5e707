use {
    axum::http::{HeaderMap, header},
    base64::{Engine as _, engine::general_purpose::STANDARD},
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Outcome of checking a request against the status endpoint credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicAuth {
    /// Credentials matched.
    Granted,
    /// No `Authorization` header; the client should be challenged.
    Missing,
    /// The header is not a decodable `Basic` credential.
    Malformed,
    /// Well-formed credentials that do not match.
    Denied,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison.
fn safe_equal(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Decode `Basic <base64(user:pass)>` into its two halves.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Check the request's Basic credentials against the expected pair.
pub fn check_basic(headers: &HeaderMap, username: &str, password: &str) -> BasicAuth {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return BasicAuth::Missing;
    };
    let Some((user, pass)) = value.to_str().ok().and_then(decode_basic) else {
        return BasicAuth::Malformed;
    };
    // Evaluate both halves so timing does not reveal which one was wrong.
    let user_ok = safe_equal(&user, username);
    let pass_ok = safe_equal(&pass, password);
    if user_ok & pass_ok {
        BasicAuth::Granted
    } else {
        BasicAuth::Denied
    }
}
