//! Error taxonomy for the gate
//!
//! Errors fall into two classes that must never be conflated:
//!
//! - **Credential** failures ([`RejectionReason`]) mean the presented token is not
//!   acceptable. They surface to the caller as `401 Unauthorized` with no detail.
//! - **Infrastructure** failures ([`DiscoveryError`], [`KeyFetchError`]) mean the
//!   identity provider could not be reached or answered garbage. They surface as
//!   `500 Internal Server Error`.
//!
//! Errors that travel through a coalesced refresh are `Clone` so a single fetch
//! result can be handed to every caller that joined it.

use http::StatusCode;
use thiserror::Error;

/// Configuration errors, raised once at startup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is empty
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    /// A field is present but unusable
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The HTTP client could not be built from the configuration
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Provider metadata discovery failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The tenant identifier cannot form a discovery URL
    #[error("invalid tenant identifier: {0}")]
    InvalidTenant(String),

    /// Network-level failure (connect, TLS, timeout, body read)
    #[error("discovery request failed: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("discovery endpoint returned HTTP {0}")]
    Status(u16),

    /// Body exceeded the configured limit
    #[error("discovery document exceeds size limit")]
    ResponseTooLarge,

    /// Body was not a usable metadata document
    #[error("malformed discovery document: {0}")]
    InvalidDocument(String),

    /// The document describes a different issuer than the one requested
    #[error("issuer in document ({document}) does not match expected issuer ({expected})")]
    IssuerMismatch {
        /// Issuer found in the document
        document: String,
        /// Authority the document was fetched for
        expected: String,
    },
}

/// Signing key set retrieval failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFetchError {
    /// Network-level failure (connect, TLS, timeout, body read)
    #[error("key set request failed: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("key set endpoint returned HTTP {0}")]
    Status(u16),

    /// Body exceeded the configured limit
    #[error("key set document exceeds size limit")]
    ResponseTooLarge,

    /// Body was not a JWK set
    #[error("malformed key set document: {0}")]
    InvalidDocument(String),
}

/// Key lookup against the key set cache failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyLookupError {
    /// The key identifier is absent even after a fresh fetch
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    /// The key set could not be fetched
    #[error(transparent)]
    FetchFailed(#[from] KeyFetchError),

    /// The key set endpoint could not be discovered
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Why a credential was rejected
///
/// Every variant maps to the same `401` response; the distinction only exists
/// for logs and for callers embedding the verifier directly.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// No `Authorization` header, or not of the form `Bearer <token>`
    #[error("missing or malformed authorization header")]
    MissingOrMalformedHeader,
    /// The token is not a well-formed compact JWS
    #[error("malformed token")]
    Malformed,
    /// The header names an algorithm outside the allow-list or foreign to the key
    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,
    /// No signing key with the header's key identifier exists
    #[error("unknown signing key")]
    UnknownKey,
    /// The signature does not verify under the resolved key
    #[error("bad signature")]
    BadSignature,
    /// `iss` differs from the expected issuer
    #[error("issuer mismatch")]
    IssuerMismatch,
    /// `aud` does not contain the expected audience
    #[error("audience mismatch")]
    AudienceMismatch,
    /// `exp` is at or before the verification instant
    #[error("token expired")]
    Expired,
    /// `nbf` is after the verification instant
    #[error("token not yet valid")]
    NotYetValid,
}

impl RejectionReason {
    /// Stable identifier for structured logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingOrMalformedHeader => "missing_or_malformed_header",
            Self::Malformed => "malformed",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::UnknownKey => "unknown_key",
            Self::BadSignature => "bad_signature",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
        }
    }
}

/// Outcome of a failed verification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The credential itself is unacceptable
    #[error("credential rejected: {0}")]
    Rejected(#[from] RejectionReason),

    /// Provider metadata was unavailable
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The signing key set was unavailable
    #[error(transparent)]
    KeyFetch(#[from] KeyFetchError),
}

impl VerifyError {
    /// `true` for credential-class failures
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The rejection reason, if this is a credential failure
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// HTTP status the middleware answers with
    pub fn status_code(&self) -> StatusCode {
        if self.is_credential_failure() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<KeyLookupError> for VerifyError {
    fn from(err: KeyLookupError) -> Self {
        match err {
            KeyLookupError::UnknownKey(_) => Self::Rejected(RejectionReason::UnknownKey),
            KeyLookupError::FetchFailed(e) => Self::KeyFetch(e),
            KeyLookupError::Discovery(e) => Self::Discovery(e),
        }
    }
}
