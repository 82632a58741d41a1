//! hudsucker hook bindings.
//!
//! hudsucker clones the handler for every request, so the request facts
//! needed by the response hooks live on the clone.

use std::sync::Arc;

use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};

use crate::controller::{FlowController, FlowInfo, HandshakeAction};

/// Binds a [`FlowController`] to hudsucker's hooks.
#[derive(Clone, Debug)]
pub struct ProxyHandler {
    controller: Arc<FlowController>,
    flow: Option<FlowInfo>,
}

impl ProxyHandler {
    pub fn new(controller: Arc<FlowController>) -> Self {
        Self {
            controller,
            flow: None,
        }
    }
}

impl HttpHandler for ProxyHandler {
    async fn handle_request(&mut self, ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.flow = Some(FlowInfo::from_request(&req, Some(ctx.client_addr)));
        self.controller.on_request(req, Some(ctx.client_addr)).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        let Some(flow) = self.flow.take() else {
            return res;
        };
        let res = self.controller.on_response_headers(&flow, res);
        self.controller.on_response(&flow, res).await
    }

    async fn should_intercept(&mut self, ctx: &HttpContext, req: &Request<Body>) -> bool {
        let sni = req.uri().host().unwrap_or_default();
        self.controller.on_handshake(sni, Some(ctx.client_addr)).await == HandshakeAction::Intercept
    }
}
