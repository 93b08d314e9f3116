//! AWS Signature Version 4 for Query API requests.

use chrono::{DateTime, Utc};
use ring::{digest, hmac};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
}

/// The parts of an HTTP request covered by the signature.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// Intermediate signing artifacts, kept apart so they can be checked
/// against published vectors.
struct Prepared {
    amz_date: String,
    scope: String,
    signed_headers: String,
    canonical_request: String,
    string_to_sign: String,
}

fn prepare(
    request: &SignableRequest<'_>,
    session_token: Option<&str>,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Prepared {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d");

    let mut headers = vec![
        ("content-type", request.content_type),
        ("host", request.host),
        ("x-amz-date", amz_date.as_str()),
    ];
    if let Some(token) = session_token {
        headers.push(("x-amz-security-token", token));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        sha256_hex(request.body)
    );

    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    Prepared {
        amz_date,
        scope,
        signed_headers,
        canonical_request,
        string_to_sign,
    }
}

/// Headers to attach to the request: `x-amz-date`, the session token when
/// present, and `authorization`.
pub fn sign(
    request: &SignableRequest<'_>,
    credentials: &Credentials<'_>,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    let prepared = prepare(request, credentials.session_token, region, service, now);
    let date = now.format("%Y%m%d").to_string();

    let key = signing_key(credentials.secret_access_key, &date, region, service);
    let signature = hex::encode(hmac::sign(&key, prepared.string_to_sign.as_bytes()).as_ref());

    let authorization = format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={signature}",
        credentials.access_key_id, prepared.scope, prepared.signed_headers
    );

    let mut out = vec![("x-amz-date", prepared.amz_date)];
    if let Some(token) = credentials.session_token {
        out.push(("x-amz-security-token", token.to_string()));
    }
    out.push(("authorization", authorization));
    out
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> hmac::Key {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    hmac::Key::new(hmac::HMAC_SHA256, &k_signing)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}
