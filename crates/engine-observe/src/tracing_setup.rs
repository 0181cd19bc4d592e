//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! `init_tracing` maps CLI verbosity to an `EnvFilter` directive, following
//! the ladder documented in `SPEC_FULL.md` §2:
//!
//! - `-q` / quiet  -> `error`
//! - default       -> `warn`
//! - `-v`          -> `info,engine=debug`
//! - `-vv` and up  -> `trace`
//!
//! `RUST_LOG` always overrides the verbosity-derived directive when set.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Verbosity-to-directive mapping used when `RUST_LOG` is unset.
fn directive_for(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-1 => "error",
        0 => "warn",
        1 => "info,engine=debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber.
///
/// `verbosity` is the CLI's `-v` repeat count, or a negative number for
/// `-q`/quiet. Always installs a structured `fmt` layer; emits JSON when
/// `json` is true (production/container deployments), human-readable text
/// otherwise. When `enable_otel` is true, additionally bridges spans to
/// OpenTelemetry via a stdout exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set or if the
/// OTel pipeline fails to initialize.
pub fn init_tracing(verbosity: i8, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing_with_otel(verbosity, json, false)
}

/// Same as [`init_tracing`], additionally bridging spans to OpenTelemetry.
pub fn init_tracing_with_otel(
    verbosity: i8,
    json: bool,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for(verbosity)));

    let registry = tracing_subscriber::registry().with(env_filter);

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("engine");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        if json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_target(false))
                .with(otel_layer)
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .with(otel_layer)
                .init();
        }
    } else if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
