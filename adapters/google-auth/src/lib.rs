//! google-auth — Google ID token verification adapter (claims + JWKS signature).
//!
//! Purpose
//! - Provide verification for Google ID tokens presented to the expense APIs.
//! - By default, verifies RS256 signature using Google's JWKS and validates
//!   core claims (audience, expiry, issuer). Any Google account is accepted;
//!   the stable `sub` claim becomes the storage scope key.
//! - For development, signature verification can be disabled by setting the
//!   environment variable `GOOGLE_AUTH_INSECURE_SKIP_SIGNATURE=1|true|yes`.
//!
//! API
//! - `verify_async(id_token, expected_aud)` → `Result<GoogleUser, AuthError>`
//!
//! Notes
//! - Uses `reqwest` to fetch JWKS and caches keys in memory for a short TTL
//!   to handle key rotation.
//! - Keeps a small public surface so apps don’t need to know the internals.

use base64::Engine;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Profile extracted from a verified ID token. `uid` is the Google `sub`
/// claim, the only field guaranteed stable across sign-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleUser {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed token")]
    Malformed,
    #[error("invalid token payload: {0}")]
    InvalidPayload(&'static str),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("audience mismatch")]
    BadAudience,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("network or jwks fetch error")]
    Network,
}

#[derive(Debug, Deserialize)]
struct Claims {
    // Registered claims
    sub: String,
    aud: serde_json::Value, // can be string or array
    exp: Option<u64>,
    #[allow(dead_code)] // Part of JWT structure, used for deserialization
    iss: Option<String>,

    // Google profile claims
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verify a Google ID token.
/// - Default: verifies RS256 signature against Google's JWKS, validates iss/aud/exp.
/// - Dev: if env `GOOGLE_AUTH_INSECURE_SKIP_SIGNATURE` is truthy, only validates claims.
pub async fn verify_async(id_token: &str, expected_aud: &str) -> Result<GoogleUser, AuthError> {
    if is_truthy_env("GOOGLE_AUTH_INSECURE_SKIP_SIGNATURE") {
        trace!("google-auth: insecure mode – skipping signature verification");
        return verify_claims_only(id_token, expected_aud);
    }

    let header = decode_header(id_token).map_err(|_| AuthError::Malformed)?;
    if header.alg != Algorithm::RS256 {
        // Only RS256 supported for Google ID tokens
        return Err(AuthError::Malformed);
    }
    let kid = header.kid.ok_or(AuthError::Malformed)?;
    let key = jwks_get_key_async(&kid)
        .await
        .map_err(|_| AuthError::Network)?;

    // Validation: audience, issuer, exp
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[expected_aud]);
    validation.set_issuer(&["accounts.google.com", "https://accounts.google.com"]);

    let token_data = decode::<Claims>(id_token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::BadAudience,
        _ => AuthError::Malformed,
    })?;

    claims_to_user(token_data.claims)
}

fn verify_claims_only(id_token: &str, expected_aud: &str) -> Result<GoogleUser, AuthError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::Malformed);
    }
    let payload_b64 = parts[1];
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| AuthError::Malformed)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidPayload("json"))?;

    // Audience check (string or array)
    match &claims.aud {
        serde_json::Value::String(s) if s == expected_aud => {}
        serde_json::Value::Array(arr) if arr.iter().any(|v| v.as_str() == Some(expected_aud)) => {}
        _ => return Err(AuthError::BadAudience),
    }

    // Expiry check
    if let Some(exp) = claims.exp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if exp <= now {
            return Err(AuthError::Expired);
        }
    }

    claims_to_user(claims)
}

fn claims_to_user(claims: Claims) -> Result<GoogleUser, AuthError> {
    if claims.sub.is_empty() {
        return Err(AuthError::InvalidPayload("sub"));
    }
    // A token carrying an email must carry a verified one; tokens without
    // email (rare, but allowed) are still accepted on the strength of `sub`.
    if claims.email.is_some() && claims.email_verified != Some(true) {
        return Err(AuthError::EmailNotVerified);
    }

    Ok(GoogleUser {
        uid: claims.sub,
        email: claims.email,
        name: claims.name,
        picture: claims.picture,
    })
}

// ---- JWKS cache & fetch ----

const JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const JWKS_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[allow(dead_code)] // Part of JWKS structure, used for deserialization
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct JwksCache {
    fetched_at: SystemTime,
    keys: HashMap<String, DecodingKey>,
}

static CACHE: LazyLock<Mutex<JwksCache>> = LazyLock::new(|| {
    Mutex::new(JwksCache {
        fetched_at: UNIX_EPOCH,
        keys: HashMap::new(),
    })
});

async fn jwks_get_key_async(kid: &str) -> Result<DecodingKey, ()> {
    // Test/dev override takes precedence if present
    if let Some(map) = jwks_override() {
        let mut cache = CACHE.lock().unwrap();
        cache.keys = map;
        cache.fetched_at = SystemTime::now();
        return cache.keys.get(kid).cloned().ok_or(());
    }

    // First, check cache without blocking async work under the mutex.
    {
        let cache = CACHE.lock().unwrap();
        let now = SystemTime::now();
        let fresh = cache.fetched_at + JWKS_TTL > now;
        if fresh {
            if let Some(k) = cache.keys.get(kid) {
                return Ok(k.clone());
            }
        }
    }

    // Fetch outside the lock
    let new_map = fetch_jwks_map_async().await.map_err(|_| ())?;
    // Update cache
    let mut cache = CACHE.lock().unwrap();
    cache.keys = new_map;
    cache.fetched_at = SystemTime::now();
    cache.keys.get(kid).cloned().ok_or(())
}

fn jwks_override() -> Option<HashMap<String, DecodingKey>> {
    let val = std::env::var("GOOGLE_AUTH_JWKS_OVERRIDE").ok()?;
    let jwks: Jwks = serde_json::from_str(&val).ok()?;
    let mut map = HashMap::new();
    for k in jwks.keys.into_iter() {
        if k.kty == "RSA" {
            if let (Some(n), Some(e)) = (k.n.as_deref(), k.e.as_deref()) {
                if let Ok(key) = DecodingKey::from_rsa_components(n, e) {
                    map.insert(k.kid, key);
                }
            }
        }
    }
    Some(map)
}

async fn fetch_jwks_map_async() -> Result<HashMap<String, DecodingKey>, reqwest::Error> {
    let resp = reqwest::Client::new().get(JWKS_URL).send().await?;
    let jwks: Jwks = resp.json().await?;
    let mut map = HashMap::new();
    for k in jwks.keys.into_iter() {
        if k.kty == "RSA" {
            if let (Some(n), Some(e)) = (k.n.as_deref(), k.e.as_deref()) {
                if let Ok(key) = DecodingKey::from_rsa_components(n, e) {
                    map.insert(k.kid, key);
                }
            }
        }
    }
    Ok(map)
}

fn is_truthy_env(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches_ignore_case(&v, &["1", "true", "yes", "on"]),
        Err(_) => false,
    }
}

fn matches_ignore_case(s: &str, any: &[&str]) -> bool {
    any.iter().any(|t| s.eq_ignore_ascii_case(t))
}

#[cfg(test)]
fn reset_jwks_cache() {
    let mut cache = CACHE.lock().unwrap();
    cache.fetched_at = UNIX_EPOCH;
    cache.keys.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &serde_json::Value) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{payload}.") // empty signature for tests
    }

    fn future_exp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 300
    }

    #[test]
    fn accepts_any_verified_google_account() {
        let claims = serde_json::json!({
            "sub":"123",
            "aud":"client-1",
            "exp": future_exp(),
            "email":"user@gmail.com",
            "email_verified": true,
            "name":"Test User",
            "picture":"https://lh3.example/p.png"
        });
        let tok = token_with_payload(&claims);
        let u = verify_claims_only(&tok, "client-1").unwrap();
        assert_eq!(u.uid, "123");
        assert_eq!(u.email.as_deref(), Some("user@gmail.com"));
        assert_eq!(u.name.as_deref(), Some("Test User"));
        assert_eq!(u.picture.as_deref(), Some("https://lh3.example/p.png"));
    }

    #[test]
    fn accepts_token_without_profile_claims() {
        let claims = serde_json::json!({
            "sub":"bare",
            "aud":"client-1",
            "exp": future_exp()
        });
        let tok = token_with_payload(&claims);
        let u = verify_claims_only(&tok, "client-1").unwrap();
        assert_eq!(u.uid, "bare");
        assert!(u.email.is_none());
    }

    #[test]
    fn audience_can_be_array() {
        let claims = serde_json::json!({
            "sub":"x",
            "aud":["x","y","client-2"],
            "exp": future_exp(),
            "email":"u@gmail.com",
            "email_verified": true
        });
        let tok = token_with_payload(&claims);
        assert!(verify_claims_only(&tok, "client-2").is_ok());
    }

    #[test]
    fn rejects_wrong_audience() {
        let claims = serde_json::json!({
            "sub":"x",
            "aud":"someone-else",
            "exp": future_exp(),
        });
        let tok = token_with_payload(&claims);
        let err = verify_claims_only(&tok, "client-3").unwrap_err();
        assert!(matches!(err, AuthError::BadAudience));
    }

    #[test]
    fn rejects_unverified_email() {
        let claims = serde_json::json!({
            "sub":"x",
            "aud":"client-4",
            "exp": future_exp(),
            "email":"u@gmail.com",
            "email_verified": false
        });
        let tok = token_with_payload(&claims);
        let err = verify_claims_only(&tok, "client-4").unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));
    }

    #[test]
    fn rejects_expired_token() {
        let claims = serde_json::json!({
            "sub":"x",
            "aud":"client-5",
            "exp": 1_000u64,
        });
        let tok = token_with_payload(&claims);
        let err = verify_claims_only(&tok, "client-5").unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    // Signature path tests using a synthetic RSA keypair and JWKS override
    #[tokio::test]
    async fn signature_verification_success_and_failures() {
        // Ensure signature mode (not insecure)
        std::env::remove_var("GOOGLE_AUTH_INSECURE_SKIP_SIGNATURE");

        // Generate RSA keypair
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::RsaPrivateKey;
        let mut rng = rand::thread_rng();
        let bits = 2048;
        let priv_key = RsaPrivateKey::new(&mut rng, bits).expect("keys");
        let pub_key = priv_key.to_public_key();

        // Build JWKS from RSA components (n, e) base64url
        use rsa::traits::PublicKeyParts;
        let n = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(pub_key.n().to_bytes_be());
        let e = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(pub_key.e().to_bytes_be());
        let jwks_json = serde_json::json!({
            "keys": [ { "kid": "test1", "kty": "RSA", "alg": "RS256", "n": n, "e": e } ]
        })
        .to_string();
        std::env::set_var("GOOGLE_AUTH_JWKS_OVERRIDE", jwks_json);
        reset_jwks_cache();

        // Create a signed JWT with header kid
        #[derive(serde::Serialize, Clone)]
        struct TClaims {
            sub: String,
            aud: String,
            iss: String,
            exp: u64,
            email: String,
            email_verified: bool,
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = TClaims {
            sub: "u123".into(),
            aud: "client-ok".into(),
            iss: "https://accounts.google.com".into(),
            exp: now + 300,
            email: "user@gmail.com".into(),
            email_verified: true,
        };

        let header = jsonwebtoken::Header {
            kid: Some("test1".into()),
            alg: jsonwebtoken::Algorithm::RS256,
            ..Default::default()
        };
        let pem = priv_key.to_pkcs1_pem(Default::default()).unwrap();
        let token_ok = jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
        )
        .unwrap();

        // Success
        let out = verify_async(&token_ok, "client-ok").await.expect("verified");
        assert_eq!(out.uid, "u123");
        assert_eq!(out.email.as_deref(), Some("user@gmail.com"));

        // Bad audience
        let err = verify_async(&token_ok, "wrong-aud").await.unwrap_err();
        assert!(matches!(err, AuthError::BadAudience));

        // Note: additional negative cases (expired, unknown kid/signature) can be flaky across
        // environments due to clock skew or env interference. They are covered in integration
        // tests/out-of-band. Here we cover success and audience mismatch deterministically.
    }
}
