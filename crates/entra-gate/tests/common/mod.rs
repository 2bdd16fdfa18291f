//! Common test utilities for integration tests
//!
//! A wiremock server stands in for the identity provider: it serves the
//! tenant's discovery document and JWK set at the same paths Entra ID uses.
//! Tokens are signed with the RSA fixtures under `tests/fixtures`.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use entra_gate::{GateConfig, KeyCacheConfig, TokenGate};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "contoso";
pub const CLIENT_ID: &str = "api://orders";

pub const PRIMARY_KID: &str = "primary-2025";
pub const ROTATED_KID: &str = "rotated-2026";

const PRIMARY_PEM: &str = include_str!("../fixtures/primary.pem");
const ROTATED_PEM: &str = include_str!("../fixtures/rotated.pem");

const PRIMARY_MODULUS: &str = "uLwVCQHddYxGxAvj-Ynrs6QEzFL-D6KgtY0MVX30ESYkD0GTVwfoHxi67dCAfOQW8YGgU5_YkTHJ71csl4dq-8oe-KdV1wM6eQVHHdt8v8zjeh6OGpn5uLAH0yKG1-hJWJamuhd6_a5BiGVloz2tZCY8MEnkyV9OlxVzunt7MkTTIJb9Y5Sgl_Iwld97qxM0Be8jKpGA8lrFdgqBxpgzerdHiO1TVOJuHpFN388H67iBhaTRGbWL4LjvVwVbqvxj6ob6RZxr3J7a3e-ozj5BQ4jm6Ud0eM1wcGHqgsX0mrBs66wkxm152L0l7HXAtQn9B1s-YYcYXJCjjX1-MCefIQ";
const ROTATED_MODULUS: &str = "omdHGluEo7V6kDu7EasumNd3DS1HiUQMmXWF7S2Y3ptcaLnloYkMP0OAfJJ-H18HkFRQEkpilvp4C9kztUdZ3ENcUcLm8ClaicmMvpXMBU15DuvJZPaxcjjaGsXBljb77CdOeHYP2I6Iry278mZ_oOgcgbMxGr8Kq2htsnpZXU9z0tkmluSSrycVhAvoR5_RUwSvNmWw180P16_yKlV1fqjDvywTBdkUnDlHUcGb9btJz2X6Q37vhawC_moAv1oXkwcC4PqEvSDjsLosY4wuyr98qPJKmdw6P_tI6fQVtHZJbZP-Mvq2txKixf4u4zAA-HH6gACh-Yir5B4inbYC1Q";

/// Signing keys available to tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    Primary,
    Rotated,
}

impl SigningKey {
    pub fn kid(self) -> &'static str {
        match self {
            Self::Primary => PRIMARY_KID,
            Self::Rotated => ROTATED_KID,
        }
    }

    /// Public half as a JWK set entry
    pub fn jwk(self) -> Value {
        let modulus = match self {
            Self::Primary => PRIMARY_MODULUS,
            Self::Rotated => ROTATED_MODULUS,
        };
        json!({
            "kty": "RSA",
            "use": "sig",
            "kid": self.kid(),
            "n": modulus,
            "e": "AQAB",
            "alg": "RS256"
        })
    }

    fn encoding_key(self) -> EncodingKey {
        let pem = match self {
            Self::Primary => PRIMARY_PEM,
            Self::Rotated => ROTATED_PEM,
        };
        EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key is valid PEM")
    }
}

/// Identity provider mock for one tenant
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer the provider advertises for `TENANT`
    pub fn issuer(&self) -> String {
        format!("{}/{TENANT}/v2.0", self.server.uri())
    }

    pub fn discovery_path() -> String {
        format!("/{TENANT}/v2.0/.well-known/openid-configuration")
    }

    pub fn jwks_path() -> String {
        format!("/{TENANT}/discovery/v2.0/keys")
    }

    /// Serve the discovery document, expecting exactly `expected` fetches
    pub async fn mount_discovery(&self, expected: u64) {
        self.mount_discovery_with_issuer(&self.issuer(), expected).await;
    }

    pub async fn mount_discovery_with_issuer(&self, issuer: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path(Self::discovery_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_endpoint": format!("{}/{TENANT}/oauth2/v2.0/token", self.server.uri()),
                "jwks_uri": format!("{}{}", self.server.uri(), Self::jwks_path()),
                "issuer": issuer,
                "id_token_signing_alg_values_supported": ["RS256"],
                "tenant_region_scope": "EU"
            })))
            .expect(expected)
            .named("discovery")
            .mount(&self.server)
            .await;
    }

    /// Serve a key set, expecting exactly `expected` fetches
    pub async fn mount_keys_expecting(&self, keys: &[SigningKey], expected: u64) {
        Mock::given(method("GET"))
            .and(path(Self::jwks_path()))
            .respond_with(keys_response(keys))
            .expect(expected)
            .named("jwks")
            .mount(&self.server)
            .await;
    }

    /// Serve a key set for every request
    pub async fn mount_keys(&self, keys: &[SigningKey]) {
        self.mount_keys_response(keys_response(keys), None).await;
    }

    /// Serve a key set for the next `times` requests only
    pub async fn mount_keys_times(&self, keys: &[SigningKey], times: u64) {
        self.mount_keys_response(keys_response(keys), Some(times))
            .await;
    }

    /// Serve an arbitrary key set response
    pub async fn mount_keys_response(&self, response: ResponseTemplate, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(Self::jwks_path()))
            .respond_with(response)
            .named("jwks");
        let mock = match times {
            Some(times) => mock.up_to_n_times(times),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Number of requests the provider has seen on `path`
    pub async fn hits(&self, path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == path)
            .count()
    }

    pub async fn jwks_hits(&self) -> usize {
        self.hits(&Self::jwks_path()).await
    }

    pub async fn discovery_hits(&self) -> usize {
        self.hits(&Self::discovery_path()).await
    }

    /// Wait until the key endpoint has been hit `count` times
    pub async fn wait_for_jwks_hits(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.jwks_hits().await < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("key endpoint was not hit in time");
    }

    /// Gate configuration pointing at this provider
    pub fn config(&self) -> GateConfig {
        GateConfig::new(TENANT, CLIENT_ID)
            .expect("valid config")
            .with_authority_host(self.server.uri())
    }

    pub fn config_with_cache(&self, key_cache: KeyCacheConfig) -> GateConfig {
        self.config().with_key_cache(key_cache)
    }

    pub fn gate(&self) -> TokenGate {
        TokenGate::new(self.config()).expect("valid gate")
    }

    /// Standard claims from this provider, valid for the next hour
    pub fn claims(&self) -> Value {
        let now = now_secs();
        json!({
            "aud": CLIENT_ID,
            "iss": self.issuer(),
            "iat": now - 60,
            "nbf": now - 60,
            "exp": now + 3600,
            "oid": "6a1b6c8e-0000-4000-8000-000000000001",
            "roles": ["Orders.Read"],
            "sub": "AAAAAAAAAAAAAAAAAAAAAIkzqFVrSaSaFHy782bbtaQ",
            "tid": TENANT,
            "ver": "2.0"
        })
    }
}

pub fn keys_response(keys: &[SigningKey]) -> ResponseTemplate {
    let keys: Vec<Value> = keys.iter().map(|key| key.jwk()).collect();
    ResponseTemplate::new(200).set_body_json(json!({ "keys": keys }))
}

/// Sign `claims` with `key`, naming `kid` in the header
pub fn mint_with_kid(key: SigningKey, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &key.encoding_key()).expect("token signs")
}

pub fn mint(key: SigningKey, claims: &Value) -> String {
    mint_with_kid(key, key.kid(), claims)
}

/// Unsigned `alg: none` token naming a published key
pub fn mint_unsigned(claims: &Value) -> String {
    let header = json!({ "alg": "none", "typ": "JWT", "kid": PRIMARY_KID });
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// HMAC token naming a published key, keyed with that key's public modulus
pub fn mint_hs256(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(PRIMARY_KID.to_string());
    let secret = EncodingKey::from_secret(PRIMARY_MODULUS.as_bytes());
    jsonwebtoken::encode(&header, claims, &secret).expect("token signs")
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs() as i64
}

pub fn at_secs(seconds: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds as u64)
}

/// Small intervals so cache transitions happen within a test
pub fn fast_cache() -> KeyCacheConfig {
    KeyCacheConfig {
        ttl: Duration::from_millis(300),
        min_refresh_interval: Duration::from_millis(100),
        failure_backoff: Duration::from_secs(2),
    }
}
