//! Tower Layer implementation for the gate

use tower_layer::Layer;

use super::service::GateService;
use crate::gate::TokenGate;

/// Tower Layer that puts the gate in front of services
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use entra_gate::tower::GateLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(GateLayer::new(gate))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct GateLayer {
    gate: TokenGate,
}

impl GateLayer {
    /// Create a layer sharing `gate`'s caches with every service it wraps
    pub fn new(gate: TokenGate) -> Self {
        Self { gate }
    }

    /// The gate this layer applies
    pub fn gate(&self) -> &TokenGate {
        &self.gate
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService::new(inner, self.gate.clone())
    }
}
