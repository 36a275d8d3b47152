//! Prometheus metrics HTTP endpoint
//!
//! Exposes controller metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, site_id, &summary);
    write_decision_metrics(&mut output, site_id, &summary);
    write_ledger_metrics(&mut output, site_id, &summary);
    write_gate_metrics(&mut output, site_id, &summary);

    output
}

fn write_frame_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "plate_gate_frames_total",
        "Total frames processed",
        MetricType::Counter,
        site,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP plate_gate_frames_per_sec Frames processed per second");
    let _ = writeln!(output, "# TYPE plate_gate_frames_per_sec gauge");
    let _ = writeln!(
        output,
        "plate_gate_frames_per_sec{{site=\"{site}\"}} {:.2}",
        summary.frames_per_sec
    );
    write_histogram(
        output,
        "plate_gate_frame_latency_us",
        "Frame processing latency in microseconds",
        site,
        &summary.frame_lat_buckets,
        summary.avg_frame_latency_us,
    );
    write_metric(
        output,
        "plate_gate_frames_dropped_total",
        "Frames dropped on a full engine channel",
        MetricType::Counter,
        site,
        summary.frames_dropped,
    );
    write_metric(
        output,
        "plate_gate_frames_malformed_total",
        "Frame messages that failed to parse",
        MetricType::Counter,
        site,
        summary.frames_malformed,
    );
    write_metric(
        output,
        "plate_gate_readings_total",
        "OCR readings seen",
        MetricType::Counter,
        site,
        summary.readings_total,
    );
    write_metric(
        output,
        "plate_gate_readings_discarded_total",
        "Readings discarded as empty or malformed",
        MetricType::Counter,
        site,
        summary.readings_discarded,
    );
    write_metric(
        output,
        "plate_gate_active_regions",
        "Regions with a live stabilizer",
        MetricType::Gauge,
        site,
        summary.active_regions,
    );
}

fn write_decision_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "plate_gate_confirmations_total",
        "Plates confirmed by the stabilizer",
        MetricType::Counter,
        site,
        summary.confirmations_total,
    );
    write_metric(
        output,
        "plate_gate_confirmations_throttled_total",
        "Confirmations ignored during cooldown",
        MetricType::Counter,
        site,
        summary.confirmations_throttled,
    );

    let name = "plate_gate_decisions_total";
    let _ = writeln!(output, "# HELP {name} Access decisions by outcome");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (outcome, val) in [
        ("authorize", summary.decisions_authorize),
        ("authorize_later", summary.decisions_authorize_later),
        ("deny", summary.decisions_deny),
    ] {
        let _ = writeln!(output, "{name}{{site=\"{site}\",decision=\"{outcome}\"}} {val}");
    }
}

fn write_ledger_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "plate_gate_ledger_latency_us",
        "Booking ledger query latency in microseconds",
        site,
        &summary.ledger_lat_buckets,
        summary.ledger_lat_avg_us,
    );
    write_metric(
        output,
        "plate_gate_ledger_latency_max_us",
        "Maximum ledger query latency since last scrape",
        MetricType::Gauge,
        site,
        summary.ledger_lat_max_us,
    );
    write_metric(
        output,
        "plate_gate_ledger_errors_total",
        "Failed ledger queries",
        MetricType::Counter,
        site,
        summary.ledger_errors_total,
    );
}

fn write_gate_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "plate_gate_actuations_total",
        "Open commands delivered",
        MetricType::Counter,
        site,
        summary.actuations_sent,
    );
    write_metric(
        output,
        "plate_gate_actuations_failed_total",
        "Open commands that failed",
        MetricType::Counter,
        site,
        summary.actuations_failed,
    );
    write_metric(
        output,
        "plate_gate_signals_dropped_total",
        "Open signals dropped on a full worker queue",
        MetricType::Counter,
        site,
        summary.signals_dropped,
    );
    write_metric(
        output,
        "plate_gate_state",
        "Gate state (0=idle, 1=cooldown, 2=open)",
        MetricType::Gauge,
        site,
        summary.gate_state,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut response = text_response(StatusCode::OK, body);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
