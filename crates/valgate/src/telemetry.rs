use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;

use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::EnvFilter;

/// Install the log subscriber. `RUST_LOG` controls the filter; defaults to
/// `info` for the gateway crates.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Create the OTLP gRPC tracer provider, register it globally together with
/// the W3C TraceContext + Baggage propagator, and hand it back so the caller
/// can flush it on shutdown.
///
/// When no collector endpoint is configured the propagator is still
/// installed: trace headers keep flowing through the broker even if nothing
/// exports spans.
pub fn init_tracer_provider(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> anyhow::Result<Option<TracerProvider>> {
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    let Some(endpoint) = otlp_endpoint else {
        tracing::info!("no OTLP endpoint configured, span export disabled");
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();

    global::set_tracer_provider(provider.clone());
    tracing::info!(endpoint, "OpenTelemetry initialized, exporting over OTLP gRPC");

    Ok(Some(provider))
}

pub fn shutdown_tracer_provider(provider: Option<TracerProvider>) {
    if let Some(provider) = provider {
        if let Err(err) = provider.shutdown() {
            tracing::warn!(%err, "tracer provider shutdown failed");
        }
    }
}

/// Run `work` inside a span that is a child of `parent`. The span status
/// follows the result and the span always ends when the work does.
///
/// All spans in the gateway are created through here; call sites never look
/// up tracers themselves.
pub async fn with_span<F, Fut, T>(
    scope: &'static str,
    name: impl Into<Cow<'static, str>>,
    parent: &Context,
    work: F,
) -> Result<T, crate::GatewayError>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, crate::GatewayError>>,
{
    let tracer = global::tracer(scope);
    let span = tracer.start_with_context(name, parent);
    let cx = parent.with_span(span);

    let result = work(cx.clone()).await;

    match &result {
        Ok(_) => cx.span().set_status(Status::Ok),
        Err(err) => cx.span().set_status(Status::error(err.to_string())),
    }
    cx.span().end();

    result
}

/// Render the `traceparent` header for a context, if it carries a sampled
/// span. Used to stamp events so the relay can resume the trace on the far
/// side of the database commit.
pub fn traceparent(cx: &Context) -> Option<String> {
    let mut carrier = HashMap::new();
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, &mut carrier));
    carrier.remove("traceparent")
}

/// Rebuild a remote context from a stored `traceparent` value.
pub fn context_from_traceparent(traceparent: Option<&str>) -> Context {
    let Some(traceparent) = traceparent else {
        return Context::new();
    };

    let mut carrier = HashMap::new();
    carrier.insert("traceparent".to_string(), traceparent.to_string());
    global::get_text_map_propagator(|propagator| propagator.extract(&carrier))
}
