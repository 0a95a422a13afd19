use crate::app::ports::TextSink;
use crate::error::{Result, SyncError};
use crate::sanitize::CellValue;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A single worksheet, accessed through the Sheets REST API with a bearer
/// access token.
pub struct GoogleSheet {
    client: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    worksheet: String,
    token: String,
}

/// Sheet cells carry no null; an explicit null is written as an empty cell.
fn sheet_value(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::String(String::new()),
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::Integer(i) => json!(i),
        CellValue::Number(n) => json!(n),
        CellValue::Text(s) => Value::String(s.clone()),
    }
}

fn sheet_rows(rows: &[Vec<CellValue>]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| row.iter().map(sheet_value).collect())
        .collect()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl GoogleSheet {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = Url::parse(SHEETS_API).map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base,
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            token: token.into(),
        })
    }

    pub fn from_env(
        spreadsheet_id: &str,
        worksheet: &str,
        token_env: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let token = env::var(token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::MissingCredential(token_env.to_string()))?;
        Self::new(
            spreadsheet_id,
            worksheet,
            token.trim(),
            Duration::from_secs(timeout_secs),
        )
    }

    /// A1 range covering the whole worksheet.
    fn range(&self) -> String {
        format!("'{}'", self.worksheet.replace('\'', "''"))
    }

    /// `{base}{spreadsheet}/values/{range}{suffix}`, percent-encoded.
    fn values_url(&self, suffix: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::sink(self.name(), "invalid API base URL"))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{}{}", self.range(), suffix));
        Ok(url)
    }

    async fn call(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value> {
        let mut request = self.client.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::sink(
                self.name(),
                format!("{}: {}", status.as_u16(), text.trim()),
            ));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TextSink for GoogleSheet {
    fn name(&self) -> &str {
        &self.worksheet
    }

    #[instrument(skip(self), fields(worksheet = %self.worksheet))]
    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>> {
        let url = self.values_url("")?;
        let body = self.call(Method::GET, url, None).await?;
        let range: ValueRange = serde_json::from_value(body)?;
        let rows: Vec<Vec<String>> = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        debug!("Read {} rows", rows.len());
        Ok(rows)
    }

    async fn clear(&self) -> Result<()> {
        let url = self.values_url(":clear")?;
        self.call(Method::POST, url, Some(json!({}))).await?;
        Ok(())
    }

    #[instrument(skip(self, header, rows), fields(worksheet = %self.worksheet))]
    async fn write_all(&self, header: &[String], rows: &[Vec<CellValue>]) -> Result<()> {
        self.clear().await?;
        let mut values = vec![header.iter().map(|h| Value::String(h.clone())).collect()];
        values.extend(sheet_rows(rows));

        let mut url = self.values_url("")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "range": self.range(), "majorDimension": "ROWS", "values": values });
        self.call(Method::PUT, url, Some(body)).await?;
        info!("Wrote header and {} rows", rows.len());
        Ok(())
    }

    #[instrument(skip(self, rows), fields(worksheet = %self.worksheet))]
    async fn append_rows(&self, rows: &[Vec<CellValue>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut url = self.values_url(":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "majorDimension": "ROWS", "values": sheet_rows(rows) });
        self.call(Method::POST, url, Some(body)).await?;
        info!("Appended {} rows", rows.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(worksheet: &str) -> GoogleSheet {
        GoogleSheet::new("abc123", worksheet, "token", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_values_url_encodes_worksheet() {
        let url = sheet("Hoja 1").values_url(":append").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'Hoja%201':append"
        );
    }

    #[test]
    fn test_range_escapes_quotes() {
        assert_eq!(sheet("O'Brien").range(), "'O''Brien'");
    }

    #[test]
    fn test_null_cells_are_empty_strings() {
        let rows = sheet_rows(&[vec![
            CellValue::Null,
            CellValue::Integer(3),
            CellValue::Number(14.5),
            CellValue::Text("TO".into()),
        ]]);
        assert_eq!(rows[0], vec![json!(""), json!(3), json!(14.5), json!("TO")]);
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!("a")), "a");
        assert_eq!(cell_text(&json!(2)), "2");
        assert_eq!(cell_text(&Value::Null), "");
    }
}
