//! HTTP client - middleware setup.

use std::time::Instant;

use http::Extensions;
use hyper::body::Body;
use recloser::AsyncRecloser;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Error, Middleware, Next, Result};
use reqwest_tracing::{
    default_on_request_end, reqwest_otel_span, ReqwestOtelSpanBackend, TracingMiddleware,
};
use tracing::{field::Empty, Span};

/// Custom delegate to create tracing spans for outgoing HTTP calls.
struct ReqwestSpanBackend;

impl ReqwestOtelSpanBackend for ReqwestSpanBackend {
    #[allow(unexpected_cfgs)]
    fn on_request_start(req: &Request, ext: &mut Extensions) -> Span {
        ext.insert(Instant::now());
        let name = format!("{} {}", req.method(), req.url().path());
        reqwest_otel_span!(name = name, req, elapsed = Empty)
    }

    fn on_request_end(span: &Span, outcome: &Result<Response>, ext: &mut Extensions) {
        default_on_request_end(span, outcome);
        if let Some(inst) = ext.get::<Instant>() {
            span.record("elapsed", inst.elapsed().as_secs_f64());
        }
    }
}

/// Circuit breaker middleware.
struct CircuitBreakerMiddleware(AsyncRecloser);

/// Circuit breaker rejection error.
#[derive(Clone, Debug, thiserror::Error)]
#[error("Request rejected, circuit breaker is open")]
struct CircuitBreakerRejection;

#[async_trait::async_trait]
impl Middleware for CircuitBreakerMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        match self.0.call(next.run(req, extensions)).await {
            Ok(resp) => Ok(resp),
            Err(recloser::Error::Rejected) => Err(Error::middleware(CircuitBreakerRejection)),
            Err(recloser::Error::Inner(err)) => Err(err),
        }
    }
}

/// HTTP client metrics middleware, recorded through the `metrics` facade.
struct MetricsMiddleware {
    /// Short name identifying which downstream this client talks to (`keycloak`, ...).
    client_name: &'static str,
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().to_string();
        let start = Instant::now();
        let resp = next.run(req, extensions).await;
        let duration = start.elapsed().as_secs_f64();
        let status = match &resp {
            Ok(r) => r.status().as_u16().to_string(),
            Err(_) => "error".to_string(),
        };
        let rejected = matches!(&resp, Err(Error::Middleware(err)) if err.is::<CircuitBreakerRejection>());
        metrics::counter!(
            "sync_http_client_requests_total",
            "client" => self.client_name,
            "method" => method.clone(),
            "status" => status,
        )
        .increment(1);
        if rejected {
            metrics::counter!(
                "sync_http_client_requests_rejected_total",
                "client" => self.client_name,
            )
            .increment(1);
        }
        metrics::histogram!(
            "sync_http_client_request_duration_seconds",
            "client" => self.client_name,
            "method" => method,
        )
        .record(duration);
        resp
    }
}

/// Wrap [`reqwest::Client`] with our custom middleware stack.
pub(crate) fn wrap_client(
    client: Client,
    client_name: &'static str,
    cb: Option<AsyncRecloser>,
) -> ClientWithMiddleware {
    let mut builder =
        ClientBuilder::new(client).with(TracingMiddleware::<ReqwestSpanBackend>::new());
    builder = builder.with(MetricsMiddleware { client_name });
    if let Some(cb) = cb {
        builder = builder.with(CircuitBreakerMiddleware(cb));
    }
    builder.build()
}
