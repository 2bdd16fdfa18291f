//! JWT infrastructure: signing key cache and token verification
//!
//! ```text
//!   TokenVerifier ──kid──▶ KeySetCache ──jwks_uri──▶ DiscoveryClient
//!        │                      │                          │
//!   signature + claims     snapshot + single-flight   per-tenant metadata
//! ```
//!
//! # Modules
//!
//! - `jwks` - key set fetching, snapshotting and refresh coalescing
//! - `validator` - compact JWS parsing, signature and claim checks

pub mod jwks;
pub mod validator;

pub use jwks::{KeyFamily, KeySet, KeySetCache, VerificationKey};
pub use validator::TokenVerifier;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Validated token claims
///
/// The registered claims the gate checks are explicit fields; everything else
/// the provider put in the payload (`oid`, `tid`, `roles`, `scp`, ...) lands in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    pub iss: String,

    /// Audience, a single value or a list
    pub aud: Audience,

    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiration time
    pub exp: NumericDate,

    /// Not-before time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<NumericDate>,

    /// Issued-at time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<NumericDate>,

    /// Provider-specific claims
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Look up a provider-specific claim by name
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }

    /// Object id of the principal (`oid`), if present
    pub fn object_id(&self) -> Option<&str> {
        self.get("oid").and_then(serde_json::Value::as_str)
    }

    /// Tenant id the token was issued in (`tid`), if present
    pub fn tenant_id(&self) -> Option<&str> {
        self.get("tid").and_then(serde_json::Value::as_str)
    }
}

/// The `aud` claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "api://app"`
    Single(String),
    /// `"aud": ["api://app", "other"]`
    Multiple(Vec<String>),
}

impl Audience {
    /// Exact-match membership test
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(aud) => aud == audience,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// RFC 7519 NumericDate
///
/// Integer or fractional seconds since the epoch. Comparisons use whole
/// seconds, truncated toward zero; serialization writes back the number as it
/// appeared in the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericDate {
    seconds: i64,
    raw: serde_json::Number,
}

impl NumericDate {
    /// Whole seconds since the epoch
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// The number exactly as the token carried it
    pub fn as_number(&self) -> &serde_json::Number {
        &self.raw
    }
}

impl From<i64> for NumericDate {
    fn from(seconds: i64) -> Self {
        Self {
            seconds,
            raw: seconds.into(),
        }
    }
}

impl PartialEq<i64> for NumericDate {
    fn eq(&self, other: &i64) -> bool {
        self.seconds == *other
    }
}

impl Serialize for NumericDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NumericDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Number::deserialize(deserializer)?;
        let seconds = number_to_seconds(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("numeric date out of range: {raw}"))
        })?;
        Ok(Self { seconds, raw })
    }
}

fn number_to_seconds(number: &serde_json::Number) -> Option<i64> {
    if let Some(seconds) = number.as_i64() {
        return Some(seconds);
    }
    let seconds = number.as_f64()?;
    (seconds.is_finite() && seconds.abs() < i64::MAX as f64).then(|| seconds.trunc() as i64)
}
