//! HTTP measurer over reqwest
//!
//! Every probe builds its own client bound to the target's proxy, so no
//! connection state leaks between targets. All requests of one probe share a
//! single deadline of `timeout`; only the best-effort landing IP lookup may run
//! past it, by at most [`LANDING_IP_BUDGET`].

use super::{
    megabytes_per_second, LatencyProbe, LatencyRequest, Measurer, ProxyLink, ThroughputProbe,
    ThroughputRequest,
};
use crate::error::{AppError, Result};
use crate::types::SpeedRecordMode;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;

const USER_AGENT: &str = concat!("proxy-speedtest/", env!("CARGO_PKG_VERSION"));

/// Time a landing IP lookup may still take once the measurement itself is done
pub const LANDING_IP_BUDGET: Duration = Duration::from_secs(1);

/// Measures targets by issuing real HTTP requests through them
#[derive(Debug, Clone)]
pub struct HttpMeasurer {
    accept_invalid_certs: bool,
}

impl Default for HttpMeasurer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMeasurer {
    pub fn new() -> Self {
        Self {
            accept_invalid_certs: false,
        }
    }

    /// Accept self-signed certificates on the measured URLs
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    fn client_for(&self, link: &ProxyLink, timeout: Option<Duration>, connect_timeout: Duration) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs);

        builder = match link.to_proxy()? {
            Some(proxy) => builder.proxy(proxy),
            None => builder.no_proxy(),
        };

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        builder
            .build()
            .map_err(|e| AppError::config(format!("Failed to build HTTP client: {}", e)))
    }

    async fn timed_get(client: &Client, url: &str, deadline: TokioInstant, timeout: Duration) -> Result<Duration> {
        let request = async {
            let start = Instant::now();
            let response = client.get(url).send().await?;
            let elapsed = start.elapsed();
            let response = check_status(response)?;
            // Drain so the connection can be reused
            let _ = response.bytes().await;
            Ok::<_, AppError>(elapsed)
        };
        tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| AppError::timeout(format!("No response from {} within {:?}", url, timeout)))?
    }

    /// Best effort; any failure yields `None`. Bounded by the probe deadline or
    /// [`LANDING_IP_BUDGET`] from now, whichever is later.
    async fn fetch_landing_ip(client: &Client, url: &str, deadline: TokioInstant) -> Option<String> {
        let deadline = deadline.max(TokioInstant::now() + LANDING_IP_BUDGET);
        let lookup = async {
            let response = client.get(url).send().await.ok()?;
            let response = check_status(response).ok()?;
            let body = response.text().await.ok()?;
            parse_landing_ip(&body)
        };
        tokio::time::timeout_at(deadline, lookup).await.ok().flatten()
    }
}

#[async_trait]
impl Measurer for HttpMeasurer {
    async fn measure_latency(&self, request: &LatencyRequest) -> Result<LatencyProbe> {
        let link = ProxyLink::parse(&request.target.link)?;
        let client = self.client_for(&link, Some(request.timeout), request.timeout)?;
        let deadline = TokioInstant::now() + request.timeout;

        let elapsed = if request.include_handshake {
            Self::timed_get(&client, &request.url, deadline, request.timeout).await?
        } else {
            // First request pays for the proxy handshake; time the second on the warm connection
            Self::timed_get(&client, &request.url, deadline, request.timeout).await?;
            Self::timed_get(&client, &request.url, deadline, request.timeout).await?
        };

        let landing_ip = match &request.landing_ip_url {
            Some(url) => Self::fetch_landing_ip(&client, url, deadline).await,
            None => None,
        };

        Ok(LatencyProbe {
            latency_ms: elapsed.as_millis().max(1) as i64,
            landing_ip,
        })
    }

    async fn measure_throughput(&self, request: &ThroughputRequest) -> Result<ThroughputProbe> {
        let link = ProxyLink::parse(&request.target.link)?;
        // The transfer is bounded by the deadline below, not by a client timeout
        let client = self.client_for(&link, None, request.timeout)?;

        let start = Instant::now();
        let deadline = TokioInstant::now() + request.timeout;

        let response = tokio::time::timeout_at(deadline, client.get(&request.url).send())
            .await
            .map_err(|_| AppError::timeout(format!("No response from {} within {:?}", request.url, request.timeout)))??;
        let response = check_status(response)?;
        let first_response = start.elapsed();

        let transfer_start = Instant::now();
        let mut sampler = PeakSampler::new(request.peak_sample_interval);
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;

        while total < request.max_bytes {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) | Ok(None) => break,
                Ok(Some(Ok(chunk))) => {
                    total += chunk.len() as u64;
                    sampler.record(chunk.len() as u64);
                }
                Ok(Some(Err(e))) => {
                    if total == 0 {
                        return Err(e.into());
                    }
                    break;
                }
            }
        }
        let elapsed = transfer_start.elapsed();
        drop(stream);

        if total == 0 {
            return Err(AppError::measurement(format!("No data received from {}", request.url)));
        }

        let average = megabytes_per_second(total, elapsed);
        let speed_mbps = match request.record_mode {
            SpeedRecordMode::Average => average,
            SpeedRecordMode::Peak => sampler.peak().unwrap_or(average),
        };

        let landing_ip = match &request.landing_ip_url {
            Some(url) => {
                let ip_client = self.client_for(&link, Some(request.timeout), request.timeout)?;
                Self::fetch_landing_ip(&ip_client, url, deadline).await
            }
            None => None,
        };

        Ok(ThroughputProbe {
            speed_mbps,
            latency_ms: first_response.as_millis() as i64,
            bytes_transferred: total,
            landing_ip,
        })
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        Ok(response)
    } else {
        Err(AppError::measurement(format!("HTTP status {} from {}", status, response.url())))
    }
}

/// Extract an IP from an echo service body: plain text or JSON
pub(crate) fn parse_landing_ip(body: &str) -> Option<String> {
    let body = body.trim();
    let candidate = if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        ["ip", "query", "origin"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))?
    } else {
        body.to_string()
    };

    // httpbin-style "a, b" lists put the client first
    let first = candidate.split(',').next()?.trim();
    first.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Tracks the best MB/s over fixed sampling windows
#[derive(Debug)]
pub(crate) struct PeakSampler {
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
    peak: Option<f64>,
}

impl PeakSampler {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            window_start: Instant::now(),
            window_bytes: 0,
            peak: None,
        }
    }

    pub(crate) fn record(&mut self, bytes: u64) {
        self.window_bytes += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.interval {
            let sample = megabytes_per_second(self.window_bytes, elapsed);
            self.peak = Some(self.peak.map_or(sample, |p| p.max(sample)));
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }

    /// `None` until at least one full window was observed
    pub(crate) fn peak(&self) -> Option<f64> {
        self.peak
    }
}
