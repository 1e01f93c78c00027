#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error};
use std::time::Duration;

use opentelemetry::{global, KeyValue};
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{self as sdktrace, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::ClientTlsConfig;

use crate::utils::config::ExporterConfig;
use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Resource attributes attached to every exported span.
pub const TRACE_SERVICE_NAME    : &str = "hello-app";
pub const TRACE_SERVICE_VERSION : &str = "v1.0.0";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

// ***************************************************************************
//                            Public Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_tracer:
// ---------------------------------------------------------------------------
/** Build the OTLP pipeline and install it process wide.  Every trace is 
 * sampled and finished spans are exported in batches on the tokio runtime.
 * The composite baggage/trace-context propagator is installed alongside.
 */
pub fn init_tracer(cfg: &ExporterConfig) -> Result<TracerProvider> {
    let exporter = build_exporter(cfg)?;

    #[allow(deprecated)]
    let provider = TracerProvider::builder()
        .with_config(sdktrace::Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(build_resource()))
        .with_batch_exporter(exporter, runtime::Tokio)
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(build_propagator());

    info!("Tracer provider installed, exporting to {} with {} header(s)", 
          cfg.endpoint, cfg.headers.len());
    Ok(provider)
}

// ---------------------------------------------------------------------------
// shutdown_tracer:
// ---------------------------------------------------------------------------
/** Flush buffered spans and stop the exporter. */
pub fn shutdown_tracer(provider: &TracerProvider) {
    match provider.shutdown() {
        Ok(_) => info!("Tracer provider shut down"),
        Err(e) => error!("{}", Errors::TelemetryInit(format!("tracer shutdown failed: {}", e))),
    }
}

// ---------------------------------------------------------------------------
// build_resource:
// ---------------------------------------------------------------------------
pub fn build_resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(SERVICE_NAME, TRACE_SERVICE_NAME),
        KeyValue::new(SERVICE_VERSION, TRACE_SERVICE_VERSION),
    ])
}

// ---------------------------------------------------------------------------
// build_propagator:
// ---------------------------------------------------------------------------
/** W3C baggage and trace context, in that order. */
pub fn build_propagator() -> TextMapCompositePropagator {
    let propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
        Box::new(BaggagePropagator::new()),
        Box::new(TraceContextPropagator::new()),
    ];
    TextMapCompositePropagator::new(propagators)
}

// ---------------------------------------------------------------------------
// build_exporter:
// ---------------------------------------------------------------------------
/** OTLP over gRPC.  The configured headers travel as gRPC metadata and https
 * endpoints are reached with TLS using the platform's root certificates.
 */
pub fn build_exporter(cfg: &ExporterConfig) -> Result<SpanExporter> {
    let mut builder = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(cfg.endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .with_metadata(build_metadata(&cfg.headers)?);

    if cfg.endpoint.starts_with("https://") {
        builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
    }

    match builder.build() {
        Ok(e) => Ok(e),
        Err(e) => {
            let msg = Errors::TelemetryInit(format!("failed to create exporter for {}: {}", cfg.endpoint, e));
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ***************************************************************************
//                            Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// build_metadata:
// ---------------------------------------------------------------------------
fn build_metadata(headers: &[(String, String)]) -> Result<MetadataMap> {
    let mut map = MetadataMap::with_capacity(headers.len());
    for (k, v) in headers {
        let key = match MetadataKey::<Ascii>::from_bytes(k.as_bytes()) {
            Ok(key) => key,
            Err(_) => {
                return Err(anyhow!(Errors::TelemetryInit(format!("invalid exporter header name: {:?}", k))));
            }
        };
        let value: MetadataValue<Ascii> = match MetadataValue::try_from(v.as_str()) {
            Ok(value) => value,
            Err(_) => {
                return Err(anyhow!(Errors::TelemetryInit(format!("invalid value for exporter header {:?}", k))));
            }
        };
        map.insert(key, value);
    }
    Ok(map)
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pairs(v: &[(&str, &str)]) -> Vec<(String, String)> {
        v.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn resource_names_the_service() {
        let resource = build_resource();
        assert!(resource.iter().any(|(k, v)| k.as_str() == SERVICE_NAME && v.as_str() == "hello-app"));
        assert!(resource.iter().any(|(k, v)| k.as_str() == SERVICE_VERSION && v.as_str() == "v1.0.0"));
    }

    #[test]
    fn propagator_covers_baggage_and_trace_context() {
        let propagator = build_propagator();
        let fields: Vec<&str> = propagator.fields().collect();
        assert!(fields.contains(&"baggage"));
        assert!(fields.contains(&"traceparent"));
        assert!(fields.contains(&"tracestate"));
    }

    #[test]
    fn propagator_extracts_traceparent() {
        use opentelemetry::trace::TraceContextExt;

        let mut carrier = HashMap::new();
        carrier.insert("traceparent".to_string(), 
                       "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string());
        let cx = build_propagator().extract(&carrier);
        let span = cx.span();
        let sc = span.span_context();
        assert!(sc.is_remote());
        assert_eq!(sc.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[test]
    fn headers_become_metadata() {
        let map = build_metadata(&pairs(&[("api-key", "abc"), ("x-tenant", "t1")])).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("api-key").unwrap().to_str().unwrap(), "abc");
    }

    #[test]
    fn invalid_metadata_is_rejected() {
        assert!(build_metadata(&pairs(&[("bad key", "v")])).is_err());
        assert!(build_metadata(&pairs(&[("k", "line\nbreak")])).is_err());
    }

    #[tokio::test]
    async fn plaintext_exporter_builds() {
        let cfg = ExporterConfig::from_values(Some("http://localhost:4317".to_string()), 
                                              Some("api-key=abc".to_string())).unwrap();
        assert!(build_exporter(&cfg).is_ok());
    }
}
