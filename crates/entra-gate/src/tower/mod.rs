//! # Tower Middleware Integration
//!
//! - [`GateLayer`] - a Tower Layer that puts a [`TokenGate`](crate::TokenGate)
//!   in front of an inner service
//! - [`GateService`] - the Tower Service that extracts the bearer token,
//!   verifies it and either forwards the request or answers itself
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use entra_gate::{GateConfig, TokenGate};
//! use entra_gate::tower::GateLayer;
//!
//! let gate = TokenGate::new(GateConfig::new(tenant_id, client_id)?)?;
//!
//! let service = ServiceBuilder::new()
//!     .layer(GateLayer::new(gate))
//!     .service(my_inner_service);
//! ```
//!
//! ## Responses
//!
//! | Outcome | Response |
//! |---------|----------|
//! | Token valid | inner service response |
//! | Credential rejected | `401 Unauthorized`, `WWW-Authenticate: Bearer` |
//! | Provider unavailable | `500 Internal Server Error` |
//!
//! Rejection details are logged, never sent to the caller.
//!
//! ## Request Extensions
//!
//! When `expose_claims` is set, the validated [`Claims`](crate::Claims) are
//! inserted into the request's extensions:
//!
//! ```rust,ignore
//! if let Some(claims) = req.extensions().get::<Claims>() {
//!     println!("Authenticated subject: {:?}", claims.sub);
//! }
//! ```

mod layer;
mod service;

pub use layer::GateLayer;
pub use service::{GateService, GateServiceFuture};
