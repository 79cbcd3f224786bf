use crate::config::VictoriaMetricsConfig;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, TextEncoder};
use prometheus_reqwest_remote_write::WriteRequest;
use std::time::Duration;
use tracing::{error, info, warn};

const FAST_OPS_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
];
const SLOW_OPS_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

pub fn counter(name: &str, help: &str) -> Counter {
    let counter = Counter::with_opts(Opts::new(name, help)).expect("valid counter options");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn histogram(name: &str, help: &str, buckets: &[f64]) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets.to_vec()))
        .expect("valid histogram options");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("histogram registered once");
    histogram
}

pub fn histogram_fast_ops(name: &str, help: &str) -> Histogram {
    histogram(name, help, FAST_OPS_BUCKETS)
}

pub fn histogram_slow_ops(name: &str, help: &str) -> Histogram {
    histogram(name, help, SLOW_OPS_BUCKETS)
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::default_registry().gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub async fn start_metrics_pusher(
    config: VictoriaMetricsConfig,
    mut shutdown_receiver: tokio::sync::broadcast::Receiver<()>,
) {
    info!(
        "Initializing metrics pusher for {}",
        config.remote_write_url
    );
    let http_client = reqwest::Client::new();
    let user_agent = match hostname::get() {
        Ok(host) => format!("tally/{}", host.to_string_lossy()),
        Err(_) => "tally".to_string(),
    };
    let mut interval = tokio::time::interval(Duration::from_secs(config.push_interval_seconds));
    let registry = prometheus::default_registry();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                push_metrics(
                    &http_client,
                    &config.remote_write_url,
                    &user_agent,
                    registry,
                ).await;
            }
            _ = shutdown_receiver.recv() => {
                info!("Shutting down metrics pusher");
                break;
            }
        }
    }
}

pub async fn push_metrics(
    client: &reqwest::Client,
    remote_write_url: &str,
    user_agent: &str,
    registry: &prometheus::Registry,
) {
    let write_request = match WriteRequest::from_metric_families(registry.gather(), None) {
        Ok(request) => request,
        Err(e) => {
            error!("Could not format write request: {:?}", e);
            return;
        }
    };

    let http_request =
        match write_request.build_http_request(client.clone(), remote_write_url, user_agent) {
            Ok(request) => request,
            Err(e) => {
                error!("Could not build metrics request: {:?}", e);
                return;
            }
        };

    match client.execute(http_request).await {
        Ok(r) => {
            if !r.status().is_success() {
                warn!("Failed to send metrics: status {}", r.status());
            }
        }
        Err(e) => {
            error!("Failed to send metrics: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        crate::metrics::TRANSACTIONS_RECORDED_TOTAL.inc_by(0.0);
        let text = render().unwrap();
        assert!(text.contains("transactions_recorded_total"));
    }
}
