//! Country lookup for landing IPs

use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

/// Maps an exit IP to an ISO 3166-1 alpha-2 country code
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn country_code(&self, ip: &str) -> Result<String>;
}

/// Looks countries up over HTTP.
///
/// The endpoint is a template where `{ip}` is replaced by the address. The
/// response may be a bare code (`US`) or JSON carrying `country_code`,
/// `countryCode` or `country`.
pub struct HttpGeoResolver {
    client: Client,
    endpoint: String,
}

impl HttpGeoResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("proxy-speedtest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url_for(&self, ip: &str) -> String {
        self.endpoint.replace("{ip}", ip)
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn country_code(&self, ip: &str) -> Result<String> {
        let response = self.client.get(self.url_for(ip)).send().await?;
        if !response.status().is_success() {
            return Err(AppError::network(format!(
                "Geo lookup for {} returned HTTP {}",
                ip,
                response.status()
            )));
        }
        let body = response.text().await?;
        parse_country(&body).ok_or_else(|| AppError::parse(format!("No country code in geo response for {}", ip)))
    }
}

fn parse_country(body: &str) -> Option<String> {
    let body = body.trim();
    let raw = if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        ["country_code", "countryCode", "country"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))?
    } else {
        body.to_string()
    };

    let code = raw.trim().to_uppercase();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

/// Fixed IP to country table
#[derive(Debug, Default, Clone)]
pub struct StaticGeoResolver {
    entries: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: impl Into<String>, country: impl Into<String>) -> Self {
        self.entries.insert(ip.into(), country.into());
        self
    }

    /// Answer for addresses not in the table
    pub fn with_fallback(mut self, country: impl Into<String>) -> Self {
        self.fallback = Some(country.into());
        self
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn country_code(&self, ip: &str) -> Result<String> {
        self.entries
            .get(ip)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| AppError::validation(format!("No country known for {}", ip)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_country_formats() {
        assert_eq!(parse_country("us\n").as_deref(), Some("US"));
        assert_eq!(parse_country(r#"{"countryCode":"DE"}"#).as_deref(), Some("DE"));
        assert_eq!(parse_country(r#"{"country":"jp","city":"Tokyo"}"#).as_deref(), Some("JP"));
        assert!(parse_country("United States").is_none());
        assert!(parse_country(r#"{"ip":"1.1.1.1"}"#).is_none());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticGeoResolver::new().with_entry("192.0.2.1", "NL");
        assert_eq!(resolver.country_code("192.0.2.1").await.unwrap(), "NL");
        assert!(resolver.country_code("192.0.2.2").await.is_err());

        let resolver = resolver.with_fallback("ZZ");
        assert_eq!(resolver.country_code("192.0.2.2").await.unwrap(), "ZZ");
    }

    #[tokio::test]
    async fn test_http_resolver_uses_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/203.0.113.9/country"))
            .respond_with(ResponseTemplate::new(200).set_body_string("SG\n"))
            .mount(&server)
            .await;

        let resolver = HttpGeoResolver::new(format!("{}/{{ip}}/country", server.uri()), Duration::from_secs(2)).unwrap();
        assert_eq!(resolver.country_code("203.0.113.9").await.unwrap(), "SG");
        assert!(resolver.country_code("203.0.113.10").await.is_err());
    }
}
