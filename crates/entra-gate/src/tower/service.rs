//! Tower Service implementation for the gate
//!
//! Per request:
//!
//! 1. Read `Authorization`; anything but `Bearer <token>` is rejected at once
//! 2. Verify the token through the shared [`TokenGate`]
//! 3. Forward to the inner service, with the claims in the request extensions,
//!    or answer `401`/`500` without touching the inner service

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, Request, Response, StatusCode};
use tower_service::Service;

use crate::error::VerifyError;
use crate::gate::TokenGate;

/// Tower Service that authenticates requests before forwarding them
#[derive(Debug, Clone)]
pub struct GateService<S> {
    inner: S,
    gate: TokenGate,
}

impl<S> GateService<S> {
    /// Wrap `inner` with `gate`
    pub fn new(inner: S, gate: TokenGate) -> Self {
        Self { inner, gate }
    }

    /// The gate in front of the inner service
    pub fn gate(&self) -> &TokenGate {
        &self.gate
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Future returned by [`GateService`]
pub type GateServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<Request<B>> for GateService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<&'static str> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = GateServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let gate = self.gate.clone();
        // The clone may not be ready; keep the one poll_ready was called on
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);
        let authorization = req.headers().get(AUTHORIZATION).cloned();

        Box::pin(async move {
            match gate.authenticate(authorization.as_ref()).await {
                Ok(claims) => {
                    if gate.config().expose_claims {
                        req.extensions_mut().insert(claims);
                    }
                    inner.call(req).await
                }
                Err(e) => Ok(error_response(&e)),
            }
        })
    }
}

/// Build the response for a failed verification; no detail is disclosed
fn error_response<ResBody: From<&'static str>>(err: &VerifyError) -> Response<ResBody> {
    let status = err.status_code();
    let body = if status == StatusCode::UNAUTHORIZED {
        "Unauthorized"
    } else {
        "Internal Server Error"
    };

    let mut response = Response::new(ResBody::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}
