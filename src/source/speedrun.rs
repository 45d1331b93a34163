//! speedrun.com REST client.
//!
//! Pending items are runs with `status=new`. The category, level and player
//! objects are embedded in the listing so one request per page is enough to
//! render every message.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::QueueSource;
use crate::error::SourceError;
use crate::model::{ItemId, Resource, ResourceId, WorkItem};

pub const DEFAULT_API_BASE: &str = "https://www.speedrun.com/api/v1";

const PAGE_SIZE: usize = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SpeedrunClient {
    http: reqwest::Client,
    api_base: String,
}

impl SpeedrunClient {
    pub fn new(api_base: &str, api_key: Option<&SecretString>) -> Result<Self, SourceError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key.expose_secret())
                .map_err(|e| SourceError::Transient(format!("invalid api key header: {e}")))?;
            headers.insert("X-API-Key", value);
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("verifyq/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Transient(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(
        &self,
        resource: &ResourceId,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, SourceError> {
        let url = format!("{}{path}", self.api_base);
        debug!(%url, "speedrun.com request");
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("request to {url} failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| SourceError::Transient(format!("bad response from {url}: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized {
                resource: resource.clone(),
            }),
            StatusCode::NOT_FOUND => Err(SourceError::NotFound {
                resource: resource.clone(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(%url, status = status.as_u16(), "speedrun.com request failed");
                Err(SourceError::Transient(format!(
                    "{url} returned {status}: {}",
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }
}

#[async_trait]
impl QueueSource for SpeedrunClient {
    async fn describe(&self, resource: &ResourceId) -> Result<Resource, SourceError> {
        let body = self
            .get_json(resource, &format!("/games/{resource}"), &[])
            .await?;
        let name = body
            .pointer("/data/names/international")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Transient(format!("game {resource} has no name")))?;
        Ok(Resource {
            id: resource.clone(),
            name: name.to_string(),
        })
    }

    async fn list_pending(&self, resource: &ResourceId) -> Result<Vec<WorkItem>, SourceError> {
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let query = [
                ("game", resource.to_string()),
                ("status", "new".to_string()),
                ("embed", "category.variables,level,players".to_string()),
                ("max", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ];
            let body = self.get_json(resource, "/runs", &query).await?;
            let runs = body
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| SourceError::Transient("run listing has no data".to_string()))?;

            for run in runs {
                match parse_run(run) {
                    Some(item) => items.push(item),
                    None => warn!(%resource, "skipping malformed run in listing"),
                }
            }
            if runs.len() < PAGE_SIZE {
                break;
            }
            offset += runs.len();
        }
        Ok(items)
    }
}

/// Build a work item from one embedded run object.
pub fn parse_run(run: &Value) -> Option<WorkItem> {
    let id = run.get("id")?.as_str()?;
    let url = run.get("weblink")?.as_str()?;
    let duration_secs = run.pointer("/times/primary_t")?.as_f64()?;
    let players = run
        .pointer("/players/data")?
        .as_array()?
        .iter()
        .filter_map(player_name)
        .collect::<Vec<_>>();
    if players.is_empty() {
        return None;
    }

    Some(WorkItem {
        id: ItemId::new(id),
        category: category_label(run)?,
        duration_secs,
        players,
        url: url.to_string(),
    })
}

fn player_name(player: &Value) -> Option<String> {
    match player.get("rel").and_then(Value::as_str) {
        Some("guest") => player.get("name")?.as_str().map(str::to_string),
        _ => player
            .pointer("/names/international")?
            .as_str()
            .map(str::to_string),
    }
}

/// Category name (level name for per-level categories) followed by
/// `" - <label>"` for each subcategory value the run has.
fn category_label(run: &Value) -> Option<String> {
    let category = run.pointer("/category/data")?;
    let mut label = if category.get("type").and_then(Value::as_str) == Some("per-level") {
        // An absent level is embedded as an empty array rather than an object.
        run.pointer("/level/data/name")?.as_str()?.to_string()
    } else {
        category.get("name")?.as_str()?.to_string()
    };

    let chosen = run.get("values").and_then(Value::as_object);
    let variables = category
        .pointer("/variables/data")
        .and_then(Value::as_array);
    if let (Some(chosen), Some(variables)) = (chosen, variables) {
        for variable in variables {
            if variable.get("is-subcategory").and_then(Value::as_bool) != Some(true) {
                continue;
            }
            let Some(var_id) = variable.get("id").and_then(Value::as_str) else {
                continue;
            };
            let Some(value_id) = chosen.get(var_id).and_then(Value::as_str) else {
                continue;
            };
            if let Some(sub) = variable
                .pointer(&format!("/values/values/{value_id}/label"))
                .and_then(Value::as_str)
            {
                label.push_str(" - ");
                label.push_str(sub);
            }
        }
    }
    Some(label)
}
