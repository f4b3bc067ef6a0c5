use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Prometheus collectors for HTTP traffic and generations, on a private
/// registry rendered by `GET /metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_request_duration: HistogramVec,
    generations_in_flight: IntGauge,
    generations: IntCounterVec,
    generation_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "handler", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Time until response headers were sent",
            ),
            &["method", "handler"],
        )?;
        let generations_in_flight = IntGauge::new(
            "llm_generations_in_flight",
            "Generation processes currently running",
        )?;
        let generations = IntCounterVec::new(
            Opts::new("llm_generations_total", "Finished generations by outcome"),
            &["outcome"],
        )?;
        let generation_duration = HistogramVec::new(
            HistogramOpts::new(
                "llm_generation_duration_seconds",
                "Wall-clock time of one generation",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["outcome"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(generations_in_flight.clone()))?;
        registry.register(Box::new(generations.clone()))?;
        registry.register(Box::new(generation_duration.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            http_request_duration,
            generations_in_flight,
            generations,
            generation_duration,
        })
    }

    pub fn observe_request(&self, method: &str, handler: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, handler, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, handler])
            .observe(elapsed.as_secs_f64());
    }

    /// Counts a generation as running until the returned guard is dropped.
    pub fn generation_started(&self) -> InFlight {
        self.generations_in_flight.inc();
        InFlight {
            gauge: self.generations_in_flight.clone(),
        }
    }

    pub fn observe_generation(&self, outcome: &str, elapsed: Duration) {
        self.generations.with_label_values(&[outcome]).inc();
        self.generation_duration
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub struct InFlight {
    gauge: IntGauge,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Records count and latency per matched route
pub async fn track_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    state
        .metrics
        .observe_request(&method, &handler, response.status().as_u16(), started.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_request("POST", "/chat", 200, Duration::from_millis(5));
        metrics.observe_generation("succeeded", Duration::from_secs(1));

        let text = metrics.render().unwrap();

        assert!(has_sample(
            &text,
            "http_requests_total{",
            &[r#"handler="/chat""#, r#"method="POST""#, r#"status="200""#],
            "1"
        ));
        assert!(has_sample(&text, "llm_generations_total{", &[r#"outcome="succeeded""#], "1"));
    }

    fn has_sample(text: &str, prefix: &str, labels: &[&str], value: &str) -> bool {
        text.lines().any(|line| {
            line.starts_with(prefix)
                && labels.iter().all(|label| line.contains(label))
                && line.ends_with(&format!(" {}", value))
        })
    }

    #[test]
    fn test_in_flight_guard_decrements_on_drop() {
        let metrics = Metrics::new().unwrap();

        let first = metrics.generation_started();
        let second = metrics.generation_started();
        assert!(metrics.render().unwrap().contains("llm_generations_in_flight 2"));

        drop(first);
        drop(second);
        assert!(metrics.render().unwrap().contains("llm_generations_in_flight 0"));
    }
}
