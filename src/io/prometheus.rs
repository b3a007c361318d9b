//! Prometheus metrics HTTP endpoint
//!
//! Exposes kiosk metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
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
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
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

    write_tick_metrics(&mut output, site_id, &summary);
    write_capture_metrics(&mut output, site_id, &summary);
    write_result_metrics(&mut output, site_id, &summary);
    write_display_metrics(&mut output, site_id, &summary);

    output
}

fn write_tick_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_ticks_total",
        "Detection ticks processed",
        MetricType::Counter,
        site,
        summary.ticks_total,
    );
    write_metric(
        output,
        "kiosk_ticks_skipped_total",
        "Ticks skipped while a capture was in flight",
        MetricType::Counter,
        site,
        summary.ticks_skipped_total,
    );
    write_metric(
        output,
        "kiosk_detector_errors_total",
        "Detector calls that failed",
        MetricType::Counter,
        site,
        summary.detector_errors_total,
    );
    write_metric(
        output,
        "kiosk_faces_detected_total",
        "Faces above the confidence threshold, summed over ticks",
        MetricType::Counter,
        site,
        summary.faces_detected_total,
    );
    write_metric(
        output,
        "kiosk_tick_interval_ms",
        "Current tick interval",
        MetricType::Gauge,
        site,
        summary.tick_interval_ms,
    );
    let _ = writeln!(output, "# HELP kiosk_ticks_per_sec Ticks processed per second");
    let _ = writeln!(output, "# TYPE kiosk_ticks_per_sec gauge");
    let _ = writeln!(output, "kiosk_ticks_per_sec{{site=\"{site}\"}} {:.2}", summary.ticks_per_sec);
}

fn write_capture_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_captures_total",
        "Captures triggered",
        MetricType::Counter,
        site,
        summary.captures_triggered_total,
    );
    write_metric(
        output,
        "kiosk_capture_failures_total",
        "Frame captures that failed",
        MetricType::Counter,
        site,
        summary.capture_failures_total,
    );
    write_metric(
        output,
        "kiosk_analysis_ok_total",
        "Successful age estimations",
        MetricType::Counter,
        site,
        summary.analysis_ok_total,
    );
    write_metric(
        output,
        "kiosk_analysis_failed_total",
        "Failed age estimations",
        MetricType::Counter,
        site,
        summary.analysis_failed_total,
    );
    write_histogram(
        output,
        "kiosk_analysis_latency_ms",
        "Age estimation latency in milliseconds",
        site,
        &summary.analysis_latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.analysis_latency_avg_ms,
    );
    write_metric(
        output,
        "kiosk_averaging_started_total",
        "Averaging sessions started",
        MetricType::Counter,
        site,
        summary.averaging_started_total,
    );
    write_metric(
        output,
        "kiosk_averaging_completed_total",
        "Averaging sessions completed",
        MetricType::Counter,
        site,
        summary.averaging_completed_total,
    );
    write_metric(
        output,
        "kiosk_averaging_aborted_total",
        "Averaging sessions aborted",
        MetricType::Counter,
        site,
        summary.averaging_aborted_total,
    );
    write_metric(
        output,
        "kiosk_sample_retries_total",
        "Averaging samples retried after no face was found",
        MetricType::Counter,
        site,
        summary.sample_retries_total,
    );
}

fn write_result_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP kiosk_results_total Results stored by kind");
    let _ = writeln!(output, "# TYPE kiosk_results_total counter");
    for (kind, val) in [
        ("fresh", summary.results_fresh_total),
        ("cached", summary.results_cached_total),
        ("averaged", summary.results_averaged_total),
    ] {
        let _ = writeln!(output, "kiosk_results_total{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
    write_metric(
        output,
        "kiosk_results_evicted_total",
        "Results evicted from the cache",
        MetricType::Counter,
        site,
        summary.results_evicted_total,
    );
    write_metric(
        output,
        "kiosk_result_cache_size",
        "Results currently cached",
        MetricType::Gauge,
        site,
        summary.result_cache_size,
    );
    write_metric(
        output,
        "kiosk_recognition_hits_total",
        "Faces recognized without a new analysis",
        MetricType::Counter,
        site,
        summary.recognition_hits_total,
    );
    write_metric(
        output,
        "kiosk_scan_log_errors_total",
        "Scan log writes that failed",
        MetricType::Counter,
        site,
        summary.scan_log_errors_total,
    );
}

fn write_display_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "kiosk_view",
        "Current kiosk view (0=idle, 1=live)",
        MetricType::Gauge,
        site,
        summary.kiosk_view,
    );
    write_metric(
        output,
        "kiosk_view_transitions_total",
        "Kiosk view changes",
        MetricType::Counter,
        site,
        summary.kiosk_transitions_total,
    );
}

fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut resp = response(StatusCode::OK, body);
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(resp)
        }
        (&Method::GET, "/health") => Ok(response(StatusCode::OK, "ok")),
        _ => Ok(response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
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

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
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
