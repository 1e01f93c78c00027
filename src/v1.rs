#![forbid(unsafe_code)]

use std::sync::Arc;

use poem::{Endpoint, EndpointExt, Route};
use poem_openapi::OpenApiService;

use crate::utils::config::RuntimeCtx;
use crate::utils::trace_middleware::OtelTracing;
use crate::v1::hello::HelloApi;

pub mod hello;

// From cargo.toml.
const HELLO_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// build_app:
// ---------------------------------------------------------------------------
/** Assemble the route tree.  Every request, routed or not, runs inside a 
 * server span.
 */
pub fn build_app(ctx: Arc<RuntimeCtx>) -> impl Endpoint {
    let api_service = OpenApiService::new(HelloApi::new(ctx.clone()), 
                                          ctx.parms.config.title.clone(), 
                                          HELLO_VERSION);
    Route::new()
        .nest("/", api_service)
        .with(OtelTracing::new(ctx.tracer.clone()))
}
