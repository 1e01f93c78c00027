#![forbid(unsafe_code)]

use std::sync::Arc;

use poem::http::HeaderMap;
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, Result};

use opentelemetry::propagation::{Extractor, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::trace::{HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, URL_PATH};

use crate::utils::telemetry::build_propagator;

// ***************************************************************************
//                                Middleware
// ***************************************************************************
/** Starts a server span around every request.  A trace context carried in 
 * the request headers becomes the span's parent, and the span is the current
 * context while the wrapped endpoint runs so handlers can start children.
 * 
 * The span is named by the HTTP method alone.  Handlers that know their route
 * template rename it with `set_server_route`.
 */
pub struct OtelTracing {
    tracer: Tracer,
    propagator: Arc<TextMapCompositePropagator>,
}

impl OtelTracing {
    pub fn new(tracer: Tracer) -> Self {
        OtelTracing { tracer, propagator: Arc::new(build_propagator()) }
    }
}

impl<E: Endpoint> Middleware<E> for OtelTracing {
    type Output = OtelTracingEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        OtelTracingEndpoint {
            inner: ep,
            tracer: self.tracer.clone(),
            propagator: self.propagator.clone(),
        }
    }
}

pub struct OtelTracingEndpoint<E> {
    inner: E,
    tracer: Tracer,
    propagator: Arc<TextMapCompositePropagator>,
}

impl<E: Endpoint> Endpoint for OtelTracingEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        let parent_cx = self.propagator.extract(&HeaderExtractor(req.headers()));
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let span = self.tracer
            .span_builder(method.clone())
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new(HTTP_REQUEST_METHOD, method),
                KeyValue::new(URL_PATH, path),
            ])
            .start_with_context(&self.tracer, &parent_cx);
        let cx = parent_cx.with_span(span);

        let result = self.inner.call(req).with_context(cx.clone()).await;

        let span = cx.span();
        let result = match result {
            Ok(resp) => {
                let resp = resp.into_response();
                let status = resp.status();
                span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status.as_u16() as i64));
                if status.is_server_error() {
                    span.set_status(Status::error(status.to_string()));
                }
                Ok(resp)
            },
            Err(err) => {
                let status = err.status();
                span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status.as_u16() as i64));
                if status.is_server_error() {
                    span.set_status(Status::error(err.to_string()));
                }
                Err(err)
            },
        };
        span.end();
        result
    }
}

// ---------------------------------------------------------------------------
// set_server_route:
// ---------------------------------------------------------------------------
/** Name the current server span after the matched route template, which keeps
 * span names independent of path parameter values.
 */
pub fn set_server_route(method: &str, route: &'static str) {
    let cx = Context::current();
    let span = cx.span();
    span.update_name(format!("{} {}", method, route));
    span.set_attribute(KeyValue::new(HTTP_ROUTE, route));
}

// ***************************************************************************
//                             HeaderExtractor
// ***************************************************************************
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}
