//! HTTP measurer, geo lookups and a full pipeline run against a mock server

use proxy_speedtest::{
    catalog::MemoryCatalog,
    geo::{GeoResolver, HttpGeoResolver},
    logging::Logger,
    measure::{http::LANDING_IP_BUDGET, HttpMeasurer, LatencyRequest, Measurer, ThroughputRequest},
    models::{SpeedTestProfile, Target},
    pipeline::{Collaborators, SpeedTestPipeline},
    task::{TaskManager, TaskStatus, TaskTrigger},
    types::{SpeedRecordMode, SpeedStatus, TestMode},
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY_BYTES: usize = 256 * 1024;

async fn mock_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; BODY_BYTES]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.9\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geo/203.0.113.9"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"country":"nl"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

fn direct(id: u64) -> Target {
    Target::new(id, format!("direct-{}", id), "direct://")
}

fn latency_request(server: &MockServer, url_path: &str) -> LatencyRequest {
    LatencyRequest {
        target: direct(1),
        url: format!("{}{}", server.uri(), url_path),
        timeout: Duration::from_secs(5),
        include_handshake: true,
        landing_ip_url: None,
    }
}

fn throughput_request(server: &MockServer, max_bytes: u64) -> ThroughputRequest {
    ThroughputRequest {
        target: direct(1),
        url: format!("{}/down", server.uri()),
        timeout: Duration::from_secs(5),
        max_bytes,
        record_mode: SpeedRecordMode::Average,
        peak_sample_interval: Duration::from_millis(100),
        landing_ip_url: Some(format!("{}/ip", server.uri())),
    }
}

#[tokio::test]
async fn latency_probe_succeeds_on_no_content() {
    let server = mock_server().await;
    let measurer = HttpMeasurer::new();

    let probe = measurer.measure_latency(&latency_request(&server, "/generate_204")).await.unwrap();
    assert!(probe.latency_ms >= 1);
    assert!(probe.landing_ip.is_none());

    let mut warm = latency_request(&server, "/generate_204");
    warm.include_handshake = false;
    warm.landing_ip_url = Some(format!("{}/ip", server.uri()));
    let probe = measurer.measure_latency(&warm).await.unwrap();
    assert_eq!(probe.landing_ip.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn latency_probe_fails_on_error_status() {
    let server = mock_server().await;
    let err = HttpMeasurer::new()
        .measure_latency(&latency_request(&server, "/broken"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "MEASURE");
}

#[tokio::test]
async fn latency_probe_rejects_unknown_link_scheme() {
    let server = mock_server().await;
    let mut request = latency_request(&server, "/generate_204");
    request.target = Target::new(9, "odd", "gopher://192.0.2.1:70");
    assert!(HttpMeasurer::new().measure_latency(&request).await.is_err());
}

#[tokio::test]
async fn throughput_probe_reads_the_body() {
    let server = mock_server().await;

    let probe = HttpMeasurer::new()
        .measure_throughput(&throughput_request(&server, 10 * 1024 * 1024))
        .await
        .unwrap();

    assert_eq!(probe.bytes_transferred, BODY_BYTES as u64);
    assert!(probe.speed_mbps > 0.0);
    assert_eq!(probe.landing_ip.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn throughput_probe_stops_at_byte_cap() {
    let server = mock_server().await;

    let probe = HttpMeasurer::new()
        .measure_throughput(&throughput_request(&server, 1024))
        .await
        .unwrap();

    // Chunks may overshoot the cap, but never read the whole body
    assert!(probe.bytes_transferred >= 1024);
    assert!(probe.bytes_transferred <= BODY_BYTES as u64);
}

#[tokio::test]
async fn geo_resolver_reads_json_and_text() {
    let server = mock_server().await;
    let resolver = HttpGeoResolver::new(format!("{}/geo/{{ip}}", server.uri()), Duration::from_secs(5)).unwrap();

    assert_eq!(resolver.country_code("203.0.113.9").await.unwrap(), "NL");
    assert!(resolver.country_code("198.51.100.1").await.is_err());
}

#[tokio::test]
async fn pipeline_runs_against_live_http() {
    let server = mock_server().await;

    let mut profile = SpeedTestProfile::new(1, "mock");
    profile.mode = TestMode::Full;
    profile.timeout_seconds = 5;
    profile.latency_url = format!("{}/generate_204", server.uri());
    profile.speed_url = format!("{}/down", server.uri());
    profile.landing_ip_url = format!("{}/ip", server.uri());
    profile.detect_country = true;

    let mut targets: Vec<Target> = (1..=3).map(direct).collect();
    targets.push(Target::new(4, "bad", "gopher://192.0.2.1:70"));
    let catalog = Arc::new(MemoryCatalog::new(vec![profile], targets));
    let tasks = Arc::new(TaskManager::new().with_logger(Logger::quiet("TASK")));
    let geo = HttpGeoResolver::new(format!("{}/geo/{{ip}}", server.uri()), Duration::from_secs(5)).unwrap();

    let collab = Collaborators::new(Arc::new(HttpMeasurer::new()), catalog.clone(), catalog.clone(), tasks.clone())
        .with_geo(Arc::new(geo));
    let pipeline = SpeedTestPipeline::new(collab, Logger::quiet("PST"));

    let summary = pipeline.run_profile(1, None, TaskTrigger::Manual).await.unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.success, 3);
    assert_eq!(summary.fail, 1);
    assert_eq!(summary.traffic.total_bytes, 3 * BODY_BYTES as u64);

    for row in summary.results.iter().filter(|r| r.target_id <= 3) {
        assert_eq!(row.speed_status, SpeedStatus::Success);
        assert_eq!(row.bytes_transferred, BODY_BYTES as u64);
        assert_eq!(row.landing_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(row.country_code.as_deref(), Some("NL"));
    }

    let task = tasks.get(summary.task_id.as_deref().unwrap()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(catalog.results().await.len(), 4);
}

/// Server whose download and landing IP endpoints answer slowly
async fn slow_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![7u8; 64 * 1024])
                .set_delay(Duration::from_millis(2500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("203.0.113.9")
                .set_delay(Duration::from_millis(4000)),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn slow_landing_ip_keeps_the_transfer() {
    let server = slow_server().await;

    let mut profile = SpeedTestProfile::new(1, "slow");
    profile.mode = TestMode::Full;
    profile.timeout_seconds = 3;
    profile.latency_url = format!("{}/generate_204", server.uri());
    profile.speed_url = format!("{}/down", server.uri());
    profile.landing_ip_url = format!("{}/ip", server.uri());
    profile.detect_country = true;

    let catalog = Arc::new(MemoryCatalog::new(vec![profile], vec![direct(1)]));
    let tasks = Arc::new(TaskManager::new().with_logger(Logger::quiet("TASK")));
    let collab = Collaborators::new(Arc::new(HttpMeasurer::new()), catalog.clone(), catalog.clone(), tasks);
    let pipeline = SpeedTestPipeline::new(collab, Logger::quiet("PST"));

    let summary = pipeline.run_profile(1, None, TaskTrigger::Manual).await.unwrap();

    assert_eq!(summary.success, 1);
    let row = &summary.results[0];
    assert_eq!(row.speed_status, SpeedStatus::Success, "row: {:?}", row);
    assert_eq!(row.bytes_transferred, 64 * 1024);
    assert!(row.landing_ip.is_none());
    assert_eq!(summary.traffic.total_bytes, 64 * 1024);
}

#[tokio::test]
async fn warm_latency_check_bounds_the_landing_ip_lookup() {
    let server = slow_server().await;
    let mut request = latency_request(&server, "/generate_204");
    request.timeout = Duration::from_secs(1);
    request.include_handshake = false;
    request.landing_ip_url = Some(format!("{}/ip", server.uri()));

    let started = std::time::Instant::now();
    let probe = HttpMeasurer::new().measure_latency(&request).await.unwrap();

    assert!(probe.landing_ip.is_none());
    assert!(started.elapsed() < request.timeout + LANDING_IP_BUDGET + Duration::from_millis(500));
}
