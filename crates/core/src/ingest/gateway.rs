use crate::config::{parsed_env, Settings};
use crate::ingest::source::{ChangeCounts, MarketDataSource, SourceError};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRIES: u32 = 3;

const MARGIN_TABLE: &str = "markettradingstatistics(value)";
const CHANGE_TABLE: &str = "numberofchangeindomestic";
const CONSTITUENT_TABLE: &str = "sectorconstituent";
const CHANGE_FIELDS: &str = "reportdate,risenumberofshandsz,noriseorfallnumberofshandsz,\
fallnumberofshandsz,limitupnumofshandsz,limitdownnumofshandsz";

/// JSON gateway in front of the market-data terminal.
///
/// Every call is a `POST` with a JSON body; responses carry the terminal's
/// result frame (`error_code`, `times`, column-major `data`).
#[derive(Debug)]
pub struct HttpGatewaySource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    session: tokio::sync::Mutex<Option<String>>,
}

#[derive(Debug, Default, Serialize)]
struct GatewayRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    begin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    connected: Option<bool>,
    #[serde(default)]
    times: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl GatewayResponse {
    fn cell(&self, column: usize, row: usize) -> Option<f64> {
        self.data.get(column).and_then(|c| c.get(row)).and_then(number)
    }
}

impl HttpGatewaySource {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_market_data_base_url()?.to_string();
        let timeout_secs = parsed_env::<u64>("MARKET_DATA_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = parsed_env::<u32>("MARKET_DATA_RETRIES").unwrap_or(DEFAULT_RETRIES);

        Self::new(
            base_url,
            settings.market_data_api_key.clone(),
            Duration::from_secs(timeout_secs),
            retries,
        )
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retries: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            retries: retries.max(1),
            session: tokio::sync::Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, SourceError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| SourceError::Connection(format!("invalid api key header: {e}")))?;
            headers.insert("x-api-key", value);
        }
        Ok(headers)
    }

    async fn session_id(&self) -> Result<String, SourceError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| SourceError::Connection("no open session".to_string()))
    }

    async fn post(
        &self,
        path: &str,
        label: &str,
        body: &GatewayRequest,
    ) -> Result<GatewayResponse, SourceError> {
        let url = self.url(path);
        let headers = self.headers()?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let res = self
                .http
                .post(url.clone())
                .headers(headers.clone())
                .json(body)
                .send()
                .await;

            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(SourceError::Connection(format!("{label}: {err}")));
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, query = label, error = %err, "gateway request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .map_err(|e| SourceError::query(label, format!("failed to read response: {e}")))?;

            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < self.retries {
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, query = label, http_status = %status, "gateway HTTP error; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
                    return Err(SourceError::Connection(format!("{label}: HTTP {status}")));
                }
                return Err(SourceError::query(label, format!("HTTP {status}: {text}")));
            }

            let parsed = serde_json::from_str::<GatewayResponse>(&text)
                .map_err(|e| SourceError::query(label, format!("invalid response: {e}")))?;
            if parsed.error_code != 0 {
                let message = parsed.message.as_deref().unwrap_or("no message");
                return Err(SourceError::query(
                    label,
                    format!("error code {}: {message}", parsed.error_code),
                ));
            }
            return Ok(parsed);
        }
    }

    async fn query(
        &self,
        shape: &str,
        label: &str,
        mut body: GatewayRequest,
    ) -> Result<GatewayResponse, SourceError> {
        body.session = Some(self.session_id().await?);
        self.post(&format!("/query/{shape}"), label, &body).await
    }
}

#[async_trait::async_trait]
impl MarketDataSource for HttpGatewaySource {
    fn source_name(&self) -> &'static str {
        "http_gateway"
    }

    async fn connect(&self) -> Result<(), SourceError> {
        let resp = self
            .post("/session/connect", "connect", &GatewayRequest::default())
            .await
            .map_err(|e| match e {
                SourceError::Query { detail, .. } => SourceError::Connection(detail),
                other => other,
            })?;
        let session = resp
            .session
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SourceError::Connection("gateway returned no session id".to_string()))?;

        tracing::info!(source = self.source_name(), "market data session opened");
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let Some(session) = self.session.lock().await.clone() else {
            return false;
        };
        let body = GatewayRequest {
            session: Some(session),
            ..Default::default()
        };
        match self.post("/session/status", "status", &body).await {
            Ok(resp) => resp.connected.unwrap_or(false),
            Err(err) => {
                tracing::debug!(error = %err, "session status check failed");
                false
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        let body = GatewayRequest {
            session: Some(session),
            ..Default::default()
        };
        self.post("/session/disconnect", "disconnect", &body).await?;
        tracing::info!(source = self.source_name(), "market data session closed");
        Ok(())
    }

    async fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, SourceError> {
        let label = format!("tdays {start}..{end}");
        let resp = self
            .query(
                "tdays",
                &label,
                GatewayRequest {
                    begin: Some(start.to_string()),
                    end: Some(end.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let mut days: Vec<NaiveDate> = if resp.times.is_empty() {
            resp.data
                .first()
                .map(|col| col.iter().filter_map(|v| v.as_str().and_then(parse_day)).collect())
                .unwrap_or_default()
        } else {
            resp.times.iter().filter_map(|s| parse_day(s)).collect()
        };
        days.sort();
        days.dedup();
        Ok(days)
    }

    async fn scalar_fields(
        &self,
        code: &str,
        fields: &[&str],
        date: NaiveDate,
        options: &str,
    ) -> Result<Vec<Option<f64>>, SourceError> {
        let joined = fields.join(",");
        let label = format!("wsd {code} {joined}");
        let resp = self
            .query(
                "wsd",
                &label,
                GatewayRequest {
                    codes: Some(code.to_string()),
                    fields: Some(joined),
                    begin: Some(date.to_string()),
                    end: Some(date.to_string()),
                    options: Some(options.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok((0..fields.len()).map(|i| resp.cell(i, 0)).collect())
    }

    async fn constituents(&self, sector_id: &str, date: NaiveDate) -> Result<Vec<String>, SourceError> {
        let label = format!("wset {CONSTITUENT_TABLE} {sector_id}");
        let resp = self
            .query(
                "wset",
                &label,
                GatewayRequest {
                    table: Some(CONSTITUENT_TABLE.to_string()),
                    options: Some(format!("date={date};sectorid={sector_id}")),
                    ..Default::default()
                },
            )
            .await?;
        // Column 0 is the as-of date, column 1 the constituent code.
        Ok(resp
            .data
            .get(1)
            .map(|col| {
                col.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cross_section(
        &self,
        codes: &[String],
        fields: &[&str],
        date: NaiveDate,
        options: &str,
    ) -> Result<Vec<Vec<Option<f64>>>, SourceError> {
        let joined = fields.join(",");
        let label = format!("wss {} codes {joined}", codes.len());
        let resp = self
            .query(
                "wss",
                &label,
                GatewayRequest {
                    codes: Some(codes.join(",")),
                    fields: Some(joined),
                    options: Some(options.to_string()),
                    begin: Some(date.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok((0..codes.len())
            .map(|row| (0..fields.len()).map(|col| resp.cell(col, row)).collect())
            .collect())
    }

    async fn margin_balance(&self, date: NaiveDate) -> Result<Option<f64>, SourceError> {
        let label = format!("wset {MARGIN_TABLE}");
        let resp = self
            .query(
                "wset",
                &label,
                GatewayRequest {
                    table: Some(MARGIN_TABLE.to_string()),
                    options: Some(format!(
                        "exchange=all;startdate={date};enddate={date};frequency=day;sort=asc;field=margin_balance"
                    )),
                    ..Default::default()
                },
            )
            .await?;
        // The first column may be the report date; the balance follows it.
        let column = if resp.data.len() > 1 { 1 } else { 0 };
        Ok(resp.cell(column, 0))
    }

    async fn change_counts(&self, date: NaiveDate) -> Result<ChangeCounts, SourceError> {
        let label = format!("wset {CHANGE_TABLE}");
        let resp = self
            .query(
                "wset",
                &label,
                GatewayRequest {
                    table: Some(CHANGE_TABLE.to_string()),
                    options: Some(format!(
                        "startdate={date};enddate={date};frequency=day;field={CHANGE_FIELDS}"
                    )),
                    ..Default::default()
                },
            )
            .await?;
        if resp.data.first().map_or(true, |c| c.is_empty()) {
            return Ok(ChangeCounts::default());
        }
        Ok(ChangeCounts {
            advancing: resp.cell(1, 0),
            flat: resp.cell(2, 0),
            declining: resp.cell(3, 0),
            limit_up: resp.cell(4, 0),
            limit_down: resp.cell(5, 0),
        })
    }

    async fn economic_value(&self, code: &str, date: NaiveDate) -> Result<Option<f64>, SourceError> {
        let label = format!("edb {code}");
        let resp = self
            .query(
                "edb",
                &label,
                GatewayRequest {
                    codes: Some(code.to_string()),
                    begin: Some(date.to_string()),
                    end: Some(date.to_string()),
                    options: Some("Fill=Previous".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(resp.cell(0, 0))
    }
}

/// Numeric cell from a result frame. Strings are parsed; NaN and null are missing.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn parse_day(s: &str) -> Option<NaiveDate> {
    let head = s.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(url: &str) -> HttpGatewaySource {
        HttpGatewaySource::new(url, Some("k".into()), Duration::from_secs(5), 1).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn numbers_accept_strings_and_reject_nan() {
        assert_eq!(number(&json!(1.5)), Some(1.5));
        assert_eq!(number(&json!(" 2.25 ")), Some(2.25));
        assert_eq!(number(&json!("NaN")), None);
        assert_eq!(number(&json!(null)), None);
        assert_eq!(parse_day("2024-03-04 00:00:00.005000"), Some(d(2024, 3, 4)));
    }

    #[tokio::test]
    async fn queries_without_a_session_are_connection_errors() {
        let gateway = source("http://127.0.0.1:9");
        let err = gateway
            .scalar_fields("881001.WI", &["close"], d(2024, 3, 4), "")
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn session_lifecycle_and_scalar_query() {
        let mut server = mockito::Server::new_async().await;
        let connect = server
            .mock("POST", "/session/connect")
            .match_header("x-api-key", "k")
            .with_body(json!({"error_code": 0, "session": "s-1"}).to_string())
            .create_async()
            .await;
        let wsd = server
            .mock("POST", "/query/wsd")
            .match_body(mockito::Matcher::PartialJson(json!({
                "session": "s-1",
                "codes": "881001.WI",
                "fields": "close,free_turn_n",
                "begin": "2024-03-04",
            })))
            .with_body(
                json!({"error_code": 0, "times": ["2024-03-04"], "data": [[5100.5], [null]]})
                    .to_string(),
            )
            .create_async()
            .await;
        let disconnect = server
            .mock("POST", "/session/disconnect")
            .with_body(json!({"error_code": 0}).to_string())
            .create_async()
            .await;

        let gateway = source(&server.url());
        gateway.connect().await.unwrap();
        let values = gateway
            .scalar_fields("881001.WI", &["close", "free_turn_n"], d(2024, 3, 4), "PriceAdj=F")
            .await
            .unwrap();
        assert_eq!(values, vec![Some(5100.5), None]);
        gateway.disconnect().await.unwrap();
        assert!(!gateway.is_connected().await);

        connect.assert_async().await;
        wsd.assert_async().await;
        disconnect.assert_async().await;
    }

    #[tokio::test]
    async fn terminal_error_codes_become_query_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/session/connect")
            .with_body(json!({"error_code": 0, "session": "s-1"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/query/wset")
            .with_body(json!({"error_code": -40522017, "message": "quota"}).to_string())
            .create_async()
            .await;

        let gateway = source(&server.url());
        gateway.connect().await.unwrap();
        let err = gateway.margin_balance(d(2024, 3, 4)).await.unwrap_err();
        assert!(matches!(err, SourceError::Query { .. }));
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn margin_reads_the_balance_column_and_counts_read_columns_one_to_five() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/session/connect")
            .with_body(json!({"error_code": 0, "session": "s-1"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/query/wset")
            .match_body(mockito::Matcher::PartialJson(json!({"table": MARGIN_TABLE})))
            .with_body(
                json!({"error_code": 0, "data": [["2024-03-04"], [1523456789012.0]]}).to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/query/wset")
            .match_body(mockito::Matcher::PartialJson(json!({"table": CHANGE_TABLE})))
            .with_body(
                json!({"error_code": 0, "data": [["2024-03-04"], [3000], [120], [2100], [45], [7]]})
                    .to_string(),
            )
            .create_async()
            .await;

        let gateway = source(&server.url());
        gateway.connect().await.unwrap();
        assert_eq!(
            gateway.margin_balance(d(2024, 3, 4)).await.unwrap(),
            Some(1523456789012.0)
        );
        let counts = gateway.change_counts(d(2024, 3, 4)).await.unwrap();
        assert_eq!(counts.advancing, Some(3000.0));
        assert_eq!(counts.limit_down, Some(7.0));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_connection_error() {
        let gateway = source("http://127.0.0.1:9");
        let err = gateway.connect().await.unwrap_err();
        assert!(err.is_connection());
    }
}
