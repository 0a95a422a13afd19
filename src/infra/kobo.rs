use crate::app::ports::SurveySource;
use crate::config::SourceConfig;
use crate::error::{Result, SyncError};
use crate::extract::flatten_record;
use crate::types::RawRecord;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// One decoded page of the collection service's data envelope.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub skipped: usize,
    pub next: Option<String>,
}

/// Decodes `{ "results": [...], "next": ... }`. A missing `results` array is
/// an error; results that are not objects are skipped and counted.
pub fn parse_page(body: Value) -> Result<Page> {
    let Value::Object(mut envelope) = body else {
        return Err(SyncError::Source {
            message: "response is not a JSON object".to_string(),
        });
    };
    let Some(Value::Array(results)) = envelope.remove("results") else {
        return Err(SyncError::Source {
            message: "response has no 'results' array".to_string(),
        });
    };
    let next = match envelope.remove("next") {
        Some(Value::String(url)) if !url.is_empty() => Some(url),
        _ => None,
    };

    let mut page = Page {
        next,
        ..Default::default()
    };
    for result in results {
        match result {
            Value::Object(record) => page.records.push(flatten_record(record)),
            other => {
                debug!("Skipping non-object result: {}", other);
                page.skipped += 1;
            }
        }
    }
    Ok(page)
}

/// Client for the survey collection service's JSON data endpoint.
pub struct KoboClient {
    client: reqwest::Client,
    url: String,
    authorization: String,
    follow_pagination: bool,
}

impl KoboClient {
    pub fn new(
        url: impl Into<String>,
        auth_scheme: &str,
        token: &str,
        timeout: Duration,
        follow_pagination: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            authorization: format!("{} {}", auth_scheme, token),
            follow_pagination,
        })
    }

    /// Reads the token from the configured environment variable.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let token = env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::MissingCredential(config.token_env.clone()))?;
        Self::new(
            config.url.clone(),
            &config.auth_scheme,
            token.trim(),
            Duration::from_secs(config.timeout_secs),
            config.follow_pagination,
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<Page> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.authorization)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Source {
                message: format!("{} returned {}: {}", url, status.as_u16(), body.trim()),
            });
        }

        let body: Value = response.json().await?;
        parse_page(body)
    }
}

#[async_trait]
impl SurveySource for KoboClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_all(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut skipped = 0;
        let mut url = Some(self.url.clone());
        let mut pages = 0;

        while let Some(current) = url.take() {
            let page = self.fetch_page(&current).await?;
            pages += 1;
            debug!("Page {} returned {} records", pages, page.records.len());
            records.extend(page.records);
            skipped += page.skipped;
            if self.follow_pagination {
                url = page.next;
            }
        }

        if skipped > 0 {
            warn!("Skipped {} results that were not JSON objects", skipped);
        }
        info!("Fetched {} records in {} page(s)", records.len(), pages);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_page_flattens_and_skips() {
        let page = parse_page(json!({
            "count": 3,
            "next": "https://kf.example.org/api/v2/assets/x/data.json?start=2",
            "results": [
                {"_uuid": "a", "geo_ref/geo_punto": "-34.6 -58.4", "meta": {"instanceID": "uuid:a"}},
                "garbage",
                {"_uuid": "b", "tags": ["x"]}
            ]
        }))
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.skipped, 1);
        assert_eq!(
            page.next.as_deref(),
            Some("https://kf.example.org/api/v2/assets/x/data.json?start=2")
        );
        assert_eq!(page.records[0].get("meta.instanceID"), Some(&json!("uuid:a")));
        assert_eq!(page.records[1].get("tags"), Some(&json!(["x"])));
    }

    #[test]
    fn test_parse_page_last_page() {
        let page = parse_page(json!({"next": null, "results": []})).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn test_parse_page_requires_results() {
        assert!(matches!(
            parse_page(json!({"detail": "Invalid token."})),
            Err(SyncError::Source { .. })
        ));
        assert!(parse_page(json!([1, 2])).is_err());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let config: SourceConfig = toml::from_str(
            r#"
            url = "https://kf.example.org/data.json"
            token_env = "SURVEY_SYNC_TEST_TOKEN_THAT_IS_NEVER_SET"
            "#,
        )
        .unwrap();
        assert!(matches!(
            KoboClient::from_config(&config),
            Err(SyncError::MissingCredential(_))
        ));
    }
}
