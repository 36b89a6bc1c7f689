#![forbid(unsafe_code)]

//! Feishu Bitable REST adapter.
//!
//! Covers exactly what the sync flow needs: tenant-token authentication,
//! paginated record listing, and chunked batch updates. The token lives for
//! the duration of one process invocation; there is no refresh logic.

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{error, info};

use crate::reconcile::{RecordRow, RecordUpdate};

const OPEN_API_URL: &str = "https://open.feishu.cn/open-apis/bitable/v1/apps";
const AUTH_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(60);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

const PAGE_SIZE: u32 = 100;
const UPDATE_BATCH: usize = 500;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<ListData>,
}

#[derive(Debug, Default, Deserialize)]
struct ListData {
    #[serde(default)]
    items: Vec<RawRecord>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    record_id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl RawRecord {
    fn into_row(self) -> RecordRow {
        RecordRow {
            record_id: self.record_id,
            fields: self.fields,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Bitable client scoped to one app's credentials.
pub struct FeishuClient {
    client: Client,
    app_id: String,
    app_secret: String,
    tenant_access_token: Option<String>,
}

impl FeishuClient {
    pub fn new(app_id: &str, app_secret: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("building Feishu HTTP client")?;
        Ok(Self {
            client,
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            tenant_access_token: None,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.tenant_access_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Exchanges the app credentials for a tenant access token. Must run
    /// before any other call; a backend rejection here is a hard error.
    pub fn authenticate(&mut self) -> Result<()> {
        let response = self
            .client
            .post(AUTH_URL)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .timeout(AUTH_TIMEOUT)
            .send()
            .context("requesting tenant access token")?
            .error_for_status()
            .context("tenant access token request rejected")?;

        let auth: AuthResponse = response.json().context("decoding auth response")?;
        if auth.code != 0 {
            bail!("Feishu auth failed: {}", auth.msg);
        }
        let Some(token) = auth.tenant_access_token else {
            bail!("Feishu auth response is missing the tenant access token");
        };

        self.tenant_access_token = Some(token);
        info!("Feishu authentication succeeded");
        Ok(())
    }

    /// Lists every record in a table, following `page_token` pagination until
    /// the backend reports no more pages.
    pub fn list_records(
        &self,
        app_token: &str,
        table_id: &str,
        view_id: Option<&str>,
    ) -> Result<Vec<RecordRow>> {
        let url = format!("{OPEN_API_URL}/{app_token}/tables/{table_id}/records");
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        info!("listing records from table {table_id}");

        loop {
            let mut query: Vec<(&str, String)> = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(view_id) = view_id {
                query.push(("view_id", view_id.to_string()));
            }
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let response = self
                .authorized(self.client.get(&url))
                .query(&query)
                .timeout(LIST_TIMEOUT)
                .send()
                .context("listing table records")?
                .error_for_status()
                .context("record listing rejected")?;

            let page: ListResponse = response.json().context("decoding record list")?;
            if page.code != 0 {
                bail!("listing records failed: {}", page.msg);
            }

            let data = page.data.unwrap_or_default();
            records.extend(data.items.into_iter().map(RawRecord::into_row));

            if !data.has_more {
                break;
            }
            page_token = data.page_token;
            if page_token.is_none() {
                break;
            }
        }

        info!("fetched {} record(s)", records.len());
        Ok(records)
    }

    /// Pushes updates in batches of up to 500 records. A rejected batch is
    /// logged and skipped; later batches still go out.
    pub fn update_records(
        &self,
        app_token: &str,
        table_id: &str,
        updates: &[RecordUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let url = format!("{OPEN_API_URL}/{app_token}/tables/{table_id}/records/batch_update");

        for batch in updates.chunks(UPDATE_BATCH) {
            let response = self
                .authorized(self.client.post(&url))
                .query(&[("field_id_type", "name")])
                .json(&json!({ "records": batch }))
                .timeout(UPDATE_TIMEOUT)
                .send()
                .context("updating table records")?
                .error_for_status()
                .context("record update rejected")?;

            let outcome: UpdateResponse = response.json().context("decoding update response")?;
            if outcome.code != 0 {
                error!("updating a batch of {} record(s) failed: {}", batch.len(), outcome.msg);
            } else {
                info!("updated {} record(s)", batch.len());
            }
        }

        Ok(())
    }
}
