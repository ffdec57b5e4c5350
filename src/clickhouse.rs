use crate::level::Level;
use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// Where and how [`ClickHouseSink`] inserts rows.
///
/// Rows go through the HTTP interface as `JSONEachRow`. Setting
/// `service_name` tags every row, which lets several services share a table.
#[derive(Clone, Debug)]
pub struct ClickHouseConfig {
    /// Base URL without query, e.g. "http://127.0.0.1:8123"
    pub url: String,
    pub database: String,
    pub table: String,
    pub service_name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub threshold: Level,
}

impl ClickHouseConfig {
    fn url_for(&self, statement: &str) -> String {
        let mut url = format!(
            "{}/?database={}&query={}",
            self.url.trim_end_matches('/'),
            urlencoding::encode(&self.database),
            urlencoding::encode(statement),
        );
        for (key, value) in [("user", &self.user), ("password", &self.password)] {
            if let Some(value) = value {
                url.push_str(&format!("&{key}={}", urlencoding::encode(value)));
            }
        }
        url
    }
}

/// Sends one row per record to a ClickHouse table.
#[derive(Clone)]
pub struct ClickHouseSink {
    client: Client,
    config: ClickHouseConfig,
    insert_url: String,
}

impl ClickHouseSink {
    pub fn new(config: ClickHouseConfig) -> Self {
        let insert_url = config.url_for(&format!("INSERT INTO {} FORMAT JSONEachRow", config.table));
        ClickHouseSink { client: Client::new(), config, insert_url }
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    fn row<'a>(&'a self, record: &'a LogRecord) -> ClickHouseRow<'a> {
        ClickHouseRow {
            timestamp: record.timestamp.to_rfc3339(),
            level: record.level.as_str(),
            logger_name: &record.logger_name,
            message: record.get_message().into_owned(),
            exc_text: record.exc_text.as_deref(),
            process_id: record.process_id,
            thread_id: &record.thread_id,
            service_name: self.config.service_name.as_deref(),
            fields: serde_json::to_string(&record.fields).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    /// Check that the target table exists. Not called automatically.
    pub async fn validate_schema(&self) -> Result<(), BoxError> {
        let url = self
            .config
            .url_for(&format!("DESCRIBE TABLE {}.{} FORMAT JSON", self.config.database, self.config.table));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(format!("clickhouse table check returned {}", resp.status()).into());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ClickHouseRow<'a> {
    timestamp: String,
    level: &'static str,
    logger_name: &'a str,
    message: String,
    exc_text: Option<&'a str>,
    process_id: u32,
    thread_id: &'a str,
    service_name: Option<&'a str>,
    fields: String,
}

#[async_trait]
impl LogSink for ClickHouseSink {
    fn threshold(&self) -> Level {
        self.config.threshold
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        let mut body = serde_json::to_string(&self.row(record))?;
        body.push('\n');

        let resp = self.client.post(&self.insert_url).body(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(format!("clickhouse insert returned {status}: {text}").into())
    }
}
