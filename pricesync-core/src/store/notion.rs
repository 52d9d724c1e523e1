//! Notion database as the price store.
//!
//! Existing keys come from one paginated database query per batch, filtered
//! on the title (ticker) and date properties. Each new row becomes one page.
//! Request bodies and response parsing are plain functions over
//! `serde_json::Value` so they can be tested without a network.

use super::{InsertError, PriceStore, StoreError};
use crate::domain::{ExistingRowKey, PriceBar};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;

pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

/// Largest `page_size` Notion accepts.
const MAX_PAGE_SIZE: usize = 100;

/// Database column names for each price field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionProperties {
    pub ticker: String,
    pub date: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub adj_close: String,
}

impl Default for NotionProperties {
    fn default() -> Self {
        Self {
            ticker: "Ticker".into(),
            date: "Date".into(),
            open: "Open".into(),
            high: "High".into(),
            low: "Low".into(),
            close: "Close".into(),
            volume: "Volume".into(),
            adj_close: "Adj Close".into(),
        }
    }
}

/// One page of query results.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub keys: Vec<ExistingRowKey>,
    /// Cursor for the next page, present only when Notion reports `has_more`.
    pub next_cursor: Option<String>,
}

pub struct NotionStore {
    client: reqwest::blocking::Client,
    api_key: String,
    database_id: String,
    base_url: String,
    properties: NotionProperties,
    page_size: usize,
    max_pages: Option<usize>,
}

impl NotionStore {
    pub fn new(
        api_key: impl Into<String>,
        database_id: impl Into<String>,
        properties: NotionProperties,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            database_id: database_id.into(),
            base_url: NOTION_API_URL.to_string(),
            properties,
            page_size: 50,
            max_pages: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Rows requested per query page, clamped to `1..=100`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Stop following cursors after this many pages.
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn properties(&self) -> &NotionProperties {
        &self.properties
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Body for `POST /databases/{id}/query`.
    pub fn query_body(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
        cursor: Option<&str>,
    ) -> Value {
        let props = &self.properties;
        let ticker_filters: Vec<Value> = tickers
            .iter()
            .map(|t| json!({ "property": props.ticker, "title": { "equals": t } }))
            .collect();

        let mut body = json!({
            "page_size": self.page_size,
            "filter": {
                "and": [
                    { "or": ticker_filters },
                    { "property": props.date, "date": { "on_or_after": start.to_string() } },
                    { "property": props.date, "date": { "on_or_before": end.to_string() } },
                ]
            }
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = Value::String(cursor.to_string());
        }
        body
    }

    /// Body for `POST /pages` creating one row.
    pub fn page_body(&self, bar: &PriceBar) -> Value {
        let props = &self.properties;
        let mut properties = Map::new();
        properties.insert(
            props.ticker.clone(),
            json!({ "title": [{ "type": "text", "text": { "content": bar.ticker() } }] }),
        );
        properties.insert(
            props.date.clone(),
            json!({ "date": { "start": bar.date().to_string() } }),
        );
        properties.insert(props.open.clone(), json!({ "number": bar.open() }));
        properties.insert(props.high.clone(), json!({ "number": bar.high() }));
        properties.insert(props.low.clone(), json!({ "number": bar.low() }));
        properties.insert(props.close.clone(), json!({ "number": bar.close() }));
        properties.insert(props.volume.clone(), json!({ "number": bar.volume() }));
        if let Some(adj) = bar.adj_close() {
            properties.insert(props.adj_close.clone(), json!({ "number": adj }));
        }

        json!({
            "parent": { "database_id": self.database_id },
            "properties": properties,
        })
    }

    /// Pull `(ticker, date)` keys out of a query response.
    ///
    /// Pages missing either property are skipped.
    pub fn parse_query_page(&self, body: &Value) -> Result<QueryPage, StoreError> {
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Decode("query response has no results array".into()))?;

        let keys = results
            .iter()
            .filter_map(|page| self.page_key(page))
            .collect();

        let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        let next_cursor = if has_more {
            body.get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        Ok(QueryPage { keys, next_cursor })
    }

    fn page_key(&self, page: &Value) -> Option<ExistingRowKey> {
        let props = page.get("properties")?;

        let title = props.get(&self.properties.ticker)?.get("title")?.as_array()?;
        let ticker: String = title
            .iter()
            .filter_map(|part| {
                part.get("plain_text")
                    .or_else(|| part.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect();
        let ticker = ticker.trim().to_ascii_uppercase();
        if ticker.is_empty() {
            return None;
        }

        let start = props
            .get(&self.properties.date)?
            .get("date")?
            .get("start")?
            .as_str()?;
        // Date properties may carry a time component.
        let date = NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()?;

        Some(ExistingRowKey::new(ticker, date))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response.json()?)
    }
}

impl PriceStore for NotionStore {
    fn name(&self) -> &str {
        "notion"
    }

    fn existing_keys(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<ExistingRowKey>, StoreError> {
        let mut keys = HashSet::new();
        if tickers.is_empty() {
            return Ok(keys);
        }

        let path = format!("databases/{}/query", self.database_id);
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let body = self.query_body(tickers, start, end, cursor.as_deref());
            let page = self.parse_query_page(&self.post(&path, &body)?)?;
            pages += 1;
            keys.extend(page.keys);

            match page.next_cursor {
                Some(next) if self.max_pages.map_or(true, |max| pages < max) => {
                    cursor = Some(next);
                }
                Some(_) => {
                    tracing::warn!(pages, "stopped paging Notion query at max_pages");
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(tickers = tickers.len(), keys = keys.len(), pages, "queried Notion");
        Ok(keys)
    }

    fn insert(&self, ticker: &str, rows: &[PriceBar]) -> Result<usize, InsertError> {
        for (written, bar) in rows.iter().enumerate() {
            if let Err(e) = self.post("pages", &self.page_body(bar)) {
                tracing::warn!(ticker, written, error = %e, "Notion page create failed");
                return Err(InsertError::new(written, e));
            }
        }
        Ok(rows.len())
    }
}
