//! JWT validation against the tenant's signing keys
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. Structure: three dot-separated segments, JSON header and payload
//! 2. Algorithm: on the allow-list (never `none`, never symmetric)
//! 3. Key: resolved by `kid` through the [`KeySetCache`]
//! 4. Signature: verified with the resolved key, whose family must match the header
//! 5. Issuer: exact string equality
//! 6. Audience: exact membership
//! 7. Expiry: `now < exp`
//! 8. Not-before: `nbf <= now`
//!
//! Every time check uses the single `now` handed in by the caller.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::Claims;
use super::jwks::{KeySetCache, VerificationKey};
use crate::config::GateConfig;
use crate::error::{RejectionReason, VerifyError};

/// Token verifier for one tenant
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew: Duration,
}

/// JOSE header fields the verifier reads
#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// A token that passed the structural checks
#[derive(Debug)]
struct ParsedToken<'a> {
    raw: &'a str,
    algorithm: Algorithm,
    kid: String,
    claims: Claims,
}

impl TokenVerifier {
    /// Create a verifier using the algorithm allow-list and clock skew of `config`
    pub fn new(config: &GateConfig, keys: Arc<KeySetCache>) -> Self {
        Self {
            keys,
            allowed_algorithms: config.allowed_algorithms.clone(),
            clock_skew: config.clock_skew,
        }
    }

    /// Verify `raw` and return its claims
    ///
    /// # Errors
    ///
    /// - [`VerifyError::Rejected`] when the token is unacceptable
    /// - [`VerifyError::KeyFetch`] / [`VerifyError::Discovery`] when the signing
    ///   keys could not be obtained
    pub async fn verify(
        &self,
        raw: &str,
        expected_issuer: &str,
        expected_audience: &str,
        now: SystemTime,
    ) -> Result<Claims, VerifyError> {
        let token = self.parse(raw)?;
        let key = self.keys.get_key(&token.kid).await?;
        Ok(self.check(token, &key, expected_issuer, expected_audience, now)?)
    }

    /// Steps 1 and 2: structure and algorithm
    fn parse<'a>(&self, raw: &'a str) -> Result<ParsedToken<'a>, RejectionReason> {
        let mut segments = raw.split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(RejectionReason::Malformed);
        };

        let header: Header = decode_segment(header)?;
        let claims: Claims = decode_segment(payload)?;

        let algorithm = Algorithm::from_str(&header.alg)
            .ok()
            .filter(|alg| self.allowed_algorithms.contains(alg))
            .ok_or(RejectionReason::UnsupportedAlgorithm)?;

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(RejectionReason::Malformed)?;

        Ok(ParsedToken {
            raw,
            algorithm,
            kid,
            claims,
        })
    }

    /// Steps 4 through 8, pure and synchronous
    fn check(
        &self,
        token: ParsedToken<'_>,
        key: &VerificationKey,
        expected_issuer: &str,
        expected_audience: &str,
        now: SystemTime,
    ) -> Result<Claims, RejectionReason> {
        if !key.accepts(token.algorithm) {
            debug!(key_id = %token.kid, alg = ?token.algorithm, "header algorithm foreign to key");
            return Err(RejectionReason::UnsupportedAlgorithm);
        }

        verify_signature(token.raw, token.algorithm, key)?;

        let claims = token.claims;
        if claims.iss != expected_issuer {
            return Err(RejectionReason::IssuerMismatch);
        }
        if !claims.aud.contains(expected_audience) {
            return Err(RejectionReason::AudienceMismatch);
        }

        let now = unix_seconds(now);
        let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);
        if now >= claims.exp.seconds().saturating_add(skew) {
            return Err(RejectionReason::Expired);
        }
        if claims
            .nbf
            .as_ref()
            .is_some_and(|nbf| nbf.seconds().saturating_sub(skew) > now)
        {
            return Err(RejectionReason::NotYetValid);
        }

        Ok(claims)
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, RejectionReason> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RejectionReason::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| RejectionReason::Malformed)
}

/// Signature only; claim checks are done by the caller against its own clock
fn verify_signature(
    raw: &str,
    algorithm: Algorithm,
    key: &VerificationKey,
) -> Result<(), RejectionReason> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<serde_json::Value>(raw, key.decoding_key(), &validation)
        .map(|_| ())
        .map_err(|e| {
            debug!(key_id = %key.kid(), error = %e, "signature verification failed");
            RejectionReason::BadSignature
        })
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryClient;
    use crate::jwt::jwks::parse_key;
    use jsonwebtoken::{EncodingKey, Header as JwtHeader};
    use serde_json::json;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/primary.pem");
    const MODULUS: &str = "uLwVCQHddYxGxAvj-Ynrs6QEzFL-D6KgtY0MVX30ESYkD0GTVwfoHxi67dCAfOQW8YGgU5_YkTHJ71csl4dq-8oe-KdV1wM6eQVHHdt8v8zjeh6OGpn5uLAH0yKG1-hJWJamuhd6_a5BiGVloz2tZCY8MEnkyV9OlxVzunt7MkTTIJb9Y5Sgl_Iwld97qxM0Be8jKpGA8lrFdgqBxpgzerdHiO1TVOJuHpFN388H67iBhaTRGbWL4LjvVwVbqvxj6ob6RZxr3J7a3e-ozj5BQ4jm6Ud0eM1wcGHqgsX0mrBs66wkxm152L0l7HXAtQn9B1s-YYcYXJCjjX1-MCefIQ";
    const ISSUER: &str = "https://login.microsoftonline.com/contoso/v2.0";
    const AUDIENCE: &str = "api://orders";
    const NOW: u64 = 1_700_000_000;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(NOW)
    }

    fn verifier(config: &GateConfig) -> TokenVerifier {
        let discovery = Arc::new(DiscoveryClient::new(config).unwrap());
        let keys = Arc::new(KeySetCache::new(config, discovery).unwrap());
        TokenVerifier::new(config, keys)
    }

    fn config() -> GateConfig {
        GateConfig::new("contoso", AUDIENCE).unwrap()
    }

    fn key() -> VerificationKey {
        parse_key(json!({
            "kty": "RSA",
            "use": "sig",
            "kid": "primary",
            "n": MODULUS,
            "e": "AQAB"
        }))
        .unwrap()
    }

    fn mint(alg: Algorithm, kid: Option<&str>, claims: &serde_json::Value) -> String {
        let mut header = JwtHeader::new(alg);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }

    fn claims() -> serde_json::Value {
        json!({
            "iss": ISSUER,
            "aud": AUDIENCE,
            "sub": "user",
            "nbf": NOW - 60,
            "exp": NOW + 3600,
            "roles": ["Orders.Read"]
        })
    }

    fn check(verifier: &TokenVerifier, raw: &str, now: SystemTime) -> Result<Claims, RejectionReason> {
        let token = verifier.parse(raw)?;
        verifier.check(token, &key(), ISSUER, AUDIENCE, now)
    }

    #[test]
    fn test_valid_token() {
        let verifier = verifier(&config());
        let token = mint(Algorithm::RS256, Some("primary"), &claims());

        let claims = check(&verifier, &token, now()).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user"));
        assert_eq!(claims.get("roles"), Some(&json!(["Orders.Read"])));
    }

    #[test]
    fn test_structure() {
        let verifier = verifier(&config());
        for raw in ["", "abc", "a.b", "a.b.c.d", "!!.e30.sig", "e30.!!.sig"] {
            assert_eq!(
                check(&verifier, raw, now()).unwrap_err(),
                RejectionReason::Malformed,
                "{raw}"
            );
        }

        let no_kid = mint(Algorithm::RS256, None, &claims());
        assert_eq!(
            check(&verifier, &no_kid, now()).unwrap_err(),
            RejectionReason::Malformed
        );
    }

    #[test]
    fn test_algorithm_allow_list() {
        let verifier = verifier(&config());

        let ps256 = mint(Algorithm::PS256, Some("primary"), &claims());
        assert_eq!(
            check(&verifier, &ps256, now()).unwrap_err(),
            RejectionReason::UnsupportedAlgorithm
        );

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"primary"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims().to_string());
        let unsigned = format!("{header}.{payload}.");
        assert_eq!(
            check(&verifier, &unsigned, now()).unwrap_err(),
            RejectionReason::UnsupportedAlgorithm
        );

        let mut header = JwtHeader::new(Algorithm::HS256);
        header.kid = Some("primary".into());
        let hmac = jsonwebtoken::encode(
            &header,
            &claims(),
            &EncodingKey::from_secret(MODULUS.as_bytes()),
        )
        .unwrap();
        assert_eq!(
            check(&verifier, &hmac, now()).unwrap_err(),
            RejectionReason::UnsupportedAlgorithm
        );
    }

    #[test]
    fn test_key_family_must_match_header() {
        let verifier = verifier(&config().with_algorithms(vec![Algorithm::RS256, Algorithm::ES256]));
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","kid":"primary"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims().to_string());
        let forged = format!("{header}.{payload}.c2ln");
        assert_eq!(
            check(&verifier, &forged, now()).unwrap_err(),
            RejectionReason::UnsupportedAlgorithm
        );
    }

    #[test]
    fn test_signature_tampering() {
        let verifier = verifier(&config());
        let token = mint(Algorithm::RS256, Some("primary"), &claims());
        let signature_start = token.rfind('.').unwrap() + 1;

        for index in signature_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                check(&verifier, &tampered, now()).unwrap_err(),
                RejectionReason::BadSignature,
                "byte {index}"
            );
        }
    }

    #[test]
    fn test_payload_tampering() {
        let verifier = verifier(&config());
        let token = mint(Algorithm::RS256, Some("primary"), &claims());
        let mut parts: Vec<&str> = token.split('.').collect();

        let mut elevated = claims();
        elevated["roles"] = json!(["Orders.Admin"]);
        let payload = URL_SAFE_NO_PAD.encode(elevated.to_string());
        parts[1] = &payload;

        assert_eq!(
            check(&verifier, &parts.join("."), now()).unwrap_err(),
            RejectionReason::BadSignature
        );
    }

    #[test]
    fn test_issuer_and_audience() {
        let verifier = verifier(&config());

        for issuer in [
            "https://login.microsoftonline.com/contoso/v2.0/",
            "https://login.microsoftonline.com/contoso",
            "https://login.microsoftonline.com/contoso/v2.0.evil.example",
        ] {
            let mut payload = claims();
            payload["iss"] = json!(issuer);
            let token = mint(Algorithm::RS256, Some("primary"), &payload);
            assert_eq!(
                check(&verifier, &token, now()).unwrap_err(),
                RejectionReason::IssuerMismatch
            );
        }

        for audience in [json!("api://other"), json!(["api://other", "api://orders/"]), json!([])] {
            let mut payload = claims();
            payload["aud"] = audience;
            let token = mint(Algorithm::RS256, Some("primary"), &payload);
            assert_eq!(
                check(&verifier, &token, now()).unwrap_err(),
                RejectionReason::AudienceMismatch
            );
        }

        let mut payload = claims();
        payload["aud"] = json!(["api://other", AUDIENCE]);
        let token = mint(Algorithm::RS256, Some("primary"), &payload);
        assert!(check(&verifier, &token, now()).is_ok());
    }

    #[test]
    fn test_time_boundaries() {
        let verifier = verifier(&config());
        let mut payload = claims();
        payload["nbf"] = json!(NOW);
        payload["exp"] = json!(NOW + 10);
        let token = mint(Algorithm::RS256, Some("primary"), &payload);

        let at = |offset: i64| UNIX_EPOCH + Duration::from_secs(NOW.saturating_add_signed(offset));

        assert_eq!(
            check(&verifier, &token, at(-1)).unwrap_err(),
            RejectionReason::NotYetValid
        );
        assert!(check(&verifier, &token, at(0)).is_ok());
        assert!(check(&verifier, &token, at(9)).is_ok());
        assert_eq!(
            check(&verifier, &token, at(10)).unwrap_err(),
            RejectionReason::Expired
        );
        assert_eq!(
            check(&verifier, &token, at(11)).unwrap_err(),
            RejectionReason::Expired
        );
    }

    #[test]
    fn test_clock_skew() {
        let verifier = verifier(&config().with_clock_skew(Duration::from_secs(30)));
        let mut payload = claims();
        payload["nbf"] = json!(NOW + 20);
        payload["exp"] = json!(NOW - 20);
        let token = mint(Algorithm::RS256, Some("primary"), &payload);
        assert!(check(&verifier, &token, now()).is_ok());
    }

    #[test]
    fn test_oversized_clock_skew_saturates() {
        // Built without validation, as an embedding host could
        let mut config = config();
        config.clock_skew = Duration::from_secs(u64::MAX);
        let verifier = verifier(&config);

        let mut payload = claims();
        payload["exp"] = json!(NOW - 20);
        let token = mint(Algorithm::RS256, Some("primary"), &payload);
        assert!(check(&verifier, &token, now()).is_ok());
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        let verifier = verifier(&config());
        let mut payload = claims();
        payload["iss"] = json!("https://evil.example/v2.0");
        payload["aud"] = json!("api://other");
        payload["exp"] = json!(NOW - 10);
        let token = mint(Algorithm::RS256, Some("primary"), &payload);
        assert_eq!(
            check(&verifier, &token, now()).unwrap_err(),
            RejectionReason::IssuerMismatch
        );
    }
}
