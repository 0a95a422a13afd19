use crate::config::MetricsConfig;
use crate::error::{Result, SyncError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reqwest::header::CONTENT_TYPE;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

pub const RECORDS_FETCHED: &str = "survey_sync_records_fetched_total";
pub const RECORDS_DROPPED: &str = "survey_sync_records_dropped_total";
pub const RECORDS_ALREADY_SYNCED: &str = "survey_sync_records_already_synced_total";
pub const RECORDS_WRITTEN: &str = "survey_sync_records_written_total";
pub const WAREHOUSE_FAILURES: &str = "survey_sync_warehouse_failures_total";
pub const RUN_DURATION: &str = "survey_sync_run_duration_seconds";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once and keeps its handle for
/// in-process rendering. A failed install is logged, never fatal.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Prometheus recorder installed");
        }
        Err(e) => warn!("Prometheus recorder install failed: {}", e),
    }
}

/// Current metrics in the Prometheus text format, if the recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

pub fn push_url(gateway: &str, job: &str, instance: &str) -> String {
    format!(
        "{}/metrics/job/{}/instance/{}",
        gateway.trim_end_matches('/'),
        job,
        instance
    )
}

/// Pushes the rendered metrics to the configured Pushgateway under `instance`.
pub async fn push_metrics(config: &MetricsConfig, instance: &str) -> Result<()> {
    let Some(body) = render() else {
        warn!("Metrics recorder not installed, nothing to push");
        return Ok(());
    };
    push_body(config, instance, body).await
}

pub async fn push_body(config: &MetricsConfig, instance: &str, body: String) -> Result<()> {
    let url = push_url(&config.pushgateway_url, &config.job, instance);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let response = client
        .post(&url)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(SyncError::sink(
            "pushgateway",
            format!("status {}: {}", status, text),
        ));
    }
    info!("Pushed metrics to {}", url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request, answers with `status_line` and returns the raw request.
    async fn one_shot_gateway(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&request).ends_with("survey_sync_test_total 1\n") {
                    break;
                }
            }
            let response = format!("{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn config(url: String) -> MetricsConfig {
        MetricsConfig {
            pushgateway_url: url,
            job: "survey_sync".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_push_url() {
        assert_eq!(
            push_url("http://gw:9091/", "survey_sync", "sync"),
            "http://gw:9091/metrics/job/survey_sync/instance/sync"
        );
    }

    #[tokio::test]
    async fn test_push_posts_text_format_to_job_and_instance() {
        let (url, gateway) = one_shot_gateway("HTTP/1.1 200 OK").await;
        push_body(&config(url), "sync", "survey_sync_test_total 1\n".to_string())
            .await
            .unwrap();

        let request = gateway.await.unwrap();
        assert!(request.starts_with("POST /metrics/job/survey_sync/instance/sync "));
        assert!(request.contains("text/plain; version=0.0.4"));
        assert!(request.ends_with("survey_sync_test_total 1\n"));
    }

    #[tokio::test]
    async fn test_gateway_error_status_is_an_error() {
        let (url, gateway) = one_shot_gateway("HTTP/1.1 500 Internal Server Error").await;
        let err = push_body(&config(url), "sync", "survey_sync_test_total 1\n".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Sink { ref sink, .. } if sink == "pushgateway"));
        gateway.await.unwrap();
    }
}
