#![forbid(unsafe_code)]

use std::sync::Arc;

use poem::Request;
use poem_openapi::{ OpenApi, payload::Json, Object, param::Path, ApiResponse };
use anyhow::Result;
use log::{info, warn, error};

use opentelemetry::{Context, KeyValue};
use opentelemetry::trace::{FutureExt, Status, TraceContextExt, Tracer as _};

use crate::utils::config::RuntimeCtx;
use crate::utils::db::get_and_increment;
use crate::utils::errors::HttpResult;
use crate::utils::hello_utils::{self, RequestDebug, validate_name};
use crate::utils::trace_middleware::set_server_route;

// Name of the child span wrapped around the counter update.
const UPDATE_SPAN_NAME: &str = "updateRequestCount";

// Route template reported on the server span; matches the oai path below.
const HELLO_ROUTE: &str = "/hello/:name";

// ***************************************************************************
//                          Request/Response Definitions
// ***************************************************************************
pub struct HelloApi {
    ctx: Arc<RuntimeCtx>,
}

impl HelloApi {
    pub fn new(ctx: Arc<RuntimeCtx>) -> Self {
        HelloApi { ctx }
    }
}

struct ReqHello
{
    name: String,
}

#[derive(Object, Debug)]
pub struct RespHello
{
    #[oai(rename = "Message")]
    message: String,
}

// Implement the debug record trait for logging.
impl RequestDebug for ReqHello {
    type Req = ReqHello;
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64);
        s.push_str("  Request path:");
        s.push_str("\n    name: ");
        s.push_str(&self.name);
        s
    }
}

// ------------------- HTTP Status Codes -------------------
#[derive(Debug, ApiResponse)]
enum HelloResponse {
    #[oai(status = 200)]
    Http200(Json<RespHello>),
    #[oai(status = 400)]
    Http400(Json<HttpResult>),
    #[oai(status = 500)]
    Http500(Json<HttpResult>),
}

fn make_http_200(resp: RespHello) -> HelloResponse {
    HelloResponse::Http200(Json(resp))
}
fn make_http_400(msg: String) -> HelloResponse {
    HelloResponse::Http400(Json(HttpResult::new(400.to_string(), msg)))
}
fn make_http_500(msg: String) -> HelloResponse {
    HelloResponse::Http500(Json(HttpResult::new(500.to_string(), msg)))    
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl HelloApi {
    #[oai(path = "/hello/:name", method = "get")]
    async fn hello_api(&self, http_req: &Request, name: Path<String>) -> HelloResponse {
        set_server_route(http_req.method().as_str(), HELLO_ROUTE);

        // Package the request parameters.
        let req = ReqHello {name: name.0};
        info!("handling hello request: name={}", req.name);
        hello_utils::debug_request(http_req, &req);

        // -------------------- Validate -----------------------------
        if let Err(e) = validate_name(&req.name) {
            let msg = "ERROR: ".to_owned() + e.to_string().as_str();
            warn!("{}", msg);
            return make_http_400(msg);
        }

        // -------------------- Process Request ----------------------
        match RespHello::process(&self.ctx, &req).await {
            Ok(r) => make_http_200(r),
            Err(e) => {
                let msg = "ERROR: ".to_owned() + e.to_string().as_str();
                error!("{}", msg);
                make_http_500(msg)
            }
        }
    }
}

// ***************************************************************************
//                          Request/Response Methods
// ***************************************************************************
impl RespHello {
    /// Create a new response.
    fn new(count: i64) -> Self {
        Self {message: format!("Hello World {}", count)}
    }

    /// Bump the name's counter inside a child of the request span.
    async fn process(ctx: &RuntimeCtx, req: &ReqHello) -> Result<RespHello> {
        let span = ctx.tracer.start_with_context(UPDATE_SPAN_NAME, &Context::current());
        let cx = Context::current_with_span(span);
        let span = cx.span();
        span.set_attribute(KeyValue::new("db.system", "sqlite"));
        span.set_attribute(KeyValue::new("stats.name", req.name.clone()));

        let result = get_and_increment(&ctx.db, &req.name)
            .with_context(cx.clone())
            .await;

        let resp = match result {
            Ok(count) => {
                span.set_attribute(KeyValue::new("stats.count", count));
                Ok(Self::new(count))
            },
            Err(e) => {
                span.set_status(Status::error(e.to_string()));
                Err(e)
            },
        };
        span.end();
        resp
    }
}
