//! Public address lookup over HTTP.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LookupError;
use crate::orchestrator::client::AddressResolver;

/// Asks a plain-text "what is my IP" service for the host's public address.
pub struct HttpAddressResolver {
    client: reqwest::Client,
    url: String,
}

impl HttpAddressResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Address(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AddressResolver for HttpAddressResolver {
    async fn resolve(&self) -> Result<IpAddr, LookupError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| LookupError::Address(e.to_string()))?
            .text()
            .await
            .map_err(|e| LookupError::Address(e.to_string()))?;

        parse_address(&body)
    }
}

fn parse_address(body: &str) -> Result<IpAddr, LookupError> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| LookupError::Address(format!("resolver returned '{}'", trimmed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text_addresses() {
        assert_eq!(
            parse_address("1.2.3.4\n").unwrap(),
            "1.2.3.4".parse::<IpAddr>().unwrap()
        );
        assert!(parse_address("2001:db8::1").unwrap().is_ipv6());
    }

    #[test]
    fn rejects_non_address_bodies() {
        assert!(parse_address("<html>rate limited</html>").is_err());
        assert!(parse_address("").is_err());
    }

    #[tokio::test]
    async fn unreachable_resolver_is_an_error() {
        let resolver =
            HttpAddressResolver::new("http://127.0.0.1:9/?format=text", Duration::from_secs(1))
                .unwrap();
        assert!(resolver.resolve().await.is_err());
    }
}
