//! OAuth2 access tokens for the Compute API.
//!
//! A token is either supplied as-is or minted from a service-account key
//! through the JWT bearer grant. Minted tokens are cached until shortly
//! before they expire.

use std::time::{Duration, Instant};

use fleetrun_core::ProviderTag;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::features::gcp::ServiceAccountKey;
use crate::{ProviderError, Result};

const SCOPE: &str = "https://www.googleapis.com/auth/compute.readonly";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub enum TokenSource {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        signer: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn service_account(key: ServiceAccountKey) -> Result<Self> {
        let signer = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| auth_error(format!("rejected service account key: {e}")))?;
        Ok(TokenSource::ServiceAccount {
            key,
            signer,
            cached: Mutex::new(None),
        })
    }

    pub async fn token(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount {
                key,
                signer,
                cached,
            } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if token.expires_at > Instant::now() + REFRESH_MARGIN {
                        return Ok(token.value.clone());
                    }
                }

                let assertion = signed_assertion(key, signer, chrono::Utc::now().timestamp())?;
                let token = exchange(client, &key.token_uri, &assertion).await?;
                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
                debug!(client_email = %key.client_email, "Obtained GCP access token");

                *cached = Some(CachedToken {
                    value: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                Ok(token.access_token)
            }
        }
    }
}

fn auth_error(message: impl Into<String>) -> ProviderError {
    ProviderError::Auth {
        provider: ProviderTag::Gcp,
        message: message.into(),
    }
}

fn claims(key: &ServiceAccountKey, issued_at: i64) -> Claims<'_> {
    Claims {
        iss: &key.client_email,
        scope: SCOPE,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    }
}

/// RS256 JWT asserting the service account identity to `token_uri`.
pub(crate) fn signed_assertion(
    key: &ServiceAccountKey,
    signer: &EncodingKey,
    issued_at: i64,
) -> Result<String> {
    encode(&Header::new(Algorithm::RS256), &claims(key, issued_at), signer)
        .map_err(|e| auth_error(format!("failed to sign token assertion: {e}")))
}

async fn exchange(client: &reqwest::Client, token_uri: &str, assertion: &str) -> Result<TokenResponse> {
    let response = client
        .post(token_uri)
        .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion)])
        .send()
        .await
        .map_err(|e| auth_error(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(auth_error(format!("token endpoint returned {status}: {body}")));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| auth_error(format!("invalid token response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn key(private_key: &str) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "inventory@example-project.iam.gserviceaccount.com".to_string(),
            private_key: private_key.to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    const PRIVATE_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/service-account-key.pem"
    ));
    const PUBLIC_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/service-account-pub.pem"
    ));

    #[test]
    fn test_assertion_verifies_with_public_key() {
        let key = key(PRIVATE_KEY);
        let TokenSource::ServiceAccount { signer, .. } =
            TokenSource::service_account(key.clone()).unwrap()
        else {
            panic!("expected a service account source");
        };
        let assertion = signed_assertion(&key, &signer, 1_700_000_000).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        validation.validate_exp = false;
        let decoded = decode::<serde_json::Value>(
            &assertion,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.header.alg, Algorithm::RS256);
        let claims = decoded.claims;
        assert_eq!(claims["iss"], "inventory@example-project.iam.gserviceaccount.com");
        assert_eq!(claims["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(claims["scope"], SCOPE);
        assert_eq!(claims["iat"], 1_700_000_000i64);
        assert_eq!(claims["exp"], 1_700_003_600i64);
    }

    #[test]
    fn test_assertion_fails_verification_after_tampering() {
        let key = key(PRIVATE_KEY);
        let signer = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        let assertion = signed_assertion(&key, &signer, 1_700_000_000).unwrap();

        let other = ServiceAccountKey {
            client_email: "intruder@example-project.iam.gserviceaccount.com".to_string(),
            ..key.clone()
        };
        let forged_claims = signed_assertion(&other, &signer, 1_700_000_000).unwrap();
        let mut parts: Vec<&str> = assertion.split('.').collect();
        parts[1] = forged_claims.split('.').nth(1).unwrap();
        let tampered = parts.join(".");

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        validation.validate_exp = false;
        let result = decode::<serde_json::Value>(
            &tampered,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_non_pem_key_is_rejected() {
        let result = TokenSource::service_account(key("definitely not a key"));
        assert!(matches!(result, Err(ProviderError::Auth { .. })));
    }

    #[test]
    fn test_certificate_pem_is_not_a_key() {
        let pem = "-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n";
        let result = TokenSource::service_account(key(pem));
        assert!(matches!(result, Err(ProviderError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_static_token_is_returned_verbatim() {
        let source = TokenSource::Static("ya29.token".to_string());
        let client = reqwest::Client::new();
        assert_eq!(source.token(&client).await.unwrap(), "ya29.token");
    }
}
