#![forbid(unsafe_code)]

//! Blocking client for the TikHub video-data API.
//!
//! The API exposes several endpoints with overlapping coverage: a web detail
//! endpoint, a mobile (app) detail endpoint that sometimes still knows about
//! videos the web one 404s on, a multi-video batch endpoint, and an app
//! statistics endpoint whose play counts are more reliable than the web
//! ones. This module stitches them together: fixed-count retries with short
//! sleeps, per-item fallbacks, and a max-wins merge wherever two sources
//! report the same counter.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::ident::{self, ResolveRedirect};
use crate::parse::{
    Author, Promotion, Statistics, TextExtra, VIDEO_REMOVED, VideoMetadata, extract_hashtags,
    share_url_for,
};

const MOBILE_DETAIL_URL: &str = "https://api.tikhub.io/api/v1/douyin/app/v3/fetch_one_video";
const MULTI_VIDEO_URL: &str = "https://api.tikhub.io/api/v1/douyin/web/fetch_multi_video";
const STATISTICS_URL: &str = "https://api.tikhub.io/api/v1/douyin/app/v3/fetch_video_statistics";
const TRANSLATE_URL: &str = "https://api.tikhub.io/api/v1/tiktok/app/v3/fetch_content_translate";
const DOWNLOAD_DETAIL_URL: &str = "https://api.tikhub.io/api/v1/douyin/web/fetch_one_video";

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);
const STATS_RETRY_DELAY: Duration = Duration::from_secs(1);

const DETAIL_TIMEOUT: Duration = Duration::from_secs(30);
const MOBILE_TIMEOUT: Duration = Duration::from_secs(20);
const STATS_SINGLE_TIMEOUT: Duration = Duration::from_secs(10);
const STATS_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_TIMEOUT: Duration = Duration::from_secs(60);
const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// The multi-video endpoint accepts at most this many ids per request.
const MULTI_VIDEO_CHUNK: usize = 50;
/// The statistics endpoint starts truncating above two ids per request.
const STATS_CHUNK: usize = 2;

/// Translation input is capped by the backend; longer text is cut silently.
pub const TRANSLATE_MAX_CHARS: usize = 5000;

/// Ids arrive as JSON strings or bare numbers depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(i64),
}

impl IdValue {
    fn as_text(&self) -> String {
        match self {
            IdValue::Text(text) => text.trim().to_string(),
            IdValue::Number(number) => number.to_string(),
        }
    }
}

/// Counters come back as numbers or numeric strings; anything else reads as 0.
fn count_value(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    unique_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatistics {
    #[serde(default)]
    play_count: Value,
    #[serde(default)]
    digg_count: Value,
    #[serde(default)]
    comment_count: Value,
    #[serde(default)]
    share_count: Value,
    #[serde(default)]
    collect_count: Value,
}

impl RawStatistics {
    fn to_statistics(&self) -> Statistics {
        Statistics {
            play_count: count_value(&self.play_count),
            digg_count: count_value(&self.digg_count),
            comment_count: count_value(&self.comment_count),
            share_count: count_value(&self.share_count),
            collect_count: count_value(&self.collect_count),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default)]
    is_delete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPlayAddr {
    #[serde(default)]
    url_list: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVideoInfo {
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    play_addr: Option<RawPlayAddr>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPromotion {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    sales: Value,
    #[serde(default)]
    url: Option<String>,
}

impl RawPromotion {
    fn to_promotion(&self) -> Promotion {
        Promotion {
            title: self.title.clone().unwrap_or_default(),
            price: count_value(&self.price),
            sales: count_value(&self.sales),
            url: self.url.clone().unwrap_or_default(),
        }
    }
}

/// `aweme_detail` as both detail endpoints and the batch endpoint return it.
/// Everything is optional; older or filtered videos omit whole subtrees.
#[derive(Debug, Default, Deserialize)]
struct RawAweme {
    #[serde(default)]
    aweme_id: Option<IdValue>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    create_time: Option<i64>,
    #[serde(default)]
    video: Option<RawVideoInfo>,
    #[serde(default)]
    author: Option<RawAuthor>,
    #[serde(default)]
    statistics: Option<RawStatistics>,
    #[serde(default)]
    text_extra: Vec<TextExtra>,
    #[serde(default)]
    status: Option<RawStatus>,
    #[serde(default)]
    promotions: Vec<RawPromotion>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatEntry {
    #[serde(default)]
    aweme_id: Option<IdValue>,
    #[serde(flatten)]
    counters: RawStatistics,
}

/// Result of translating a piece of content.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Translation {
    pub success: bool,
    pub source: String,
    pub target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn normalize_detail(raw: &RawAweme, requested_id: &str, data_source: &str) -> VideoMetadata {
    let aweme_id = raw
        .aweme_id
        .as_ref()
        .map(IdValue::as_text)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| requested_id.to_string());

    VideoMetadata {
        share_url: share_url_for(&aweme_id),
        desc: raw.desc.clone().unwrap_or_default(),
        create_time: raw.create_time.unwrap_or(0),
        duration_ms: raw.video.as_ref().and_then(|video| video.duration).unwrap_or(0),
        author: Author {
            nickname: raw
                .author
                .as_ref()
                .and_then(|author| author.nickname.clone())
                .unwrap_or_default(),
            unique_id: raw
                .author
                .as_ref()
                .and_then(|author| author.unique_id.clone())
                .unwrap_or_default(),
        },
        statistics: raw
            .statistics
            .as_ref()
            .map(RawStatistics::to_statistics)
            .unwrap_or_default(),
        hashtags: extract_hashtags(&raw.text_extra),
        promotions: raw.promotions.iter().map(RawPromotion::to_promotion).collect(),
        data_source: data_source.to_string(),
        is_deleted: raw
            .status
            .as_ref()
            .is_some_and(|status| status.is_delete == Some(true)),
        aweme_id,
    }
}

/// Accepts every shape the multi-video endpoint has been seen returning:
/// a JSON-encoded string, a bare array, or an object carrying the list under
/// `aweme_list` or `aweme_details`.
fn parse_multi_video_payload(data: Option<&Value>) -> Vec<RawAweme> {
    let Some(data) = data else {
        return Vec::new();
    };

    let owned;
    let data = match data {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => {
                owned = parsed;
                &owned
            }
            Err(err) => {
                warn!("multi-video data arrived as an unparseable string: {err}");
                return Vec::new();
            }
        },
        other => other,
    };

    let items = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(object) => object
            .get("aweme_list")
            .or_else(|| object.get("aweme_details"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<RawAweme>(item.clone()) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping malformed batch entry: {err}");
                None
            }
        })
        .collect()
}

/// Pulls the translated text out of the translate endpoint's `data` payload.
fn translated_text(data: &Value) -> Option<String> {
    data.get("translated_content_list")?
        .as_array()?
        .first()?
        .get("translated_content")?
        .as_str()
        .map(str::to_string)
}

/// Cuts `content` down to `max` characters (not bytes).
fn truncate_chars(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((index, _)) => content[..index].to_string(),
        None => content.to_string(),
    }
}

enum DetailOutcome {
    Found { raw: RawAweme, source: &'static str },
    Removed(VideoMetadata),
    /// Terminal for this id: the API answered but had nothing usable.
    Unavailable,
    /// Transient; worth another attempt.
    Retry,
}

/// Blocking TikHub client. One instance per process invocation.
pub struct DouyinApi {
    client: Client,
    api_key: String,
    detail_url: String,
}

impl DouyinApi {
    pub fn new(api_key: &str, detail_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            detail_url: detail_url.to_string(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    /// Fetches one video from an arbitrary reference (id, URL, share link).
    ///
    /// An unresolvable reference is a hard error; a video the API cannot
    /// serve after all retries comes back as `Ok(None)`; a video the API
    /// reports as gone comes back as a synthetic removed record.
    pub fn fetch_video(
        &self,
        input: &str,
        resolver: &dyn ResolveRedirect,
    ) -> Result<Option<VideoMetadata>> {
        let Some(aweme_id) = ident::resolve(input, resolver) else {
            bail!("could not extract a video id from {input:?}");
        };
        Ok(self.fetch_video_by_id(&aweme_id))
    }

    /// Retry loop around the detail endpoint, with the mobile fallback and
    /// the statistics supplement folded in.
    pub fn fetch_video_by_id(&self, aweme_id: &str) -> Option<VideoMetadata> {
        for attempt in 1..=FETCH_ATTEMPTS {
            info!("fetching video {aweme_id} (attempt {attempt}/{FETCH_ATTEMPTS})");
            match self.try_fetch_detail(aweme_id) {
                Ok(DetailOutcome::Found { raw, source }) => {
                    let mut metadata = normalize_detail(&raw, aweme_id, source);
                    self.supplement_statistics(&mut metadata);
                    return Some(metadata);
                }
                Ok(DetailOutcome::Removed(metadata)) => return Some(metadata),
                Ok(DetailOutcome::Unavailable) => return None,
                Ok(DetailOutcome::Retry) => {}
                Err(err) => {
                    warn!("fetch attempt {attempt} for {aweme_id} failed: {err:#}");
                }
            }
            if attempt < FETCH_ATTEMPTS {
                thread::sleep(FETCH_RETRY_DELAY);
            }
        }
        error!("could not fetch video {aweme_id} after {FETCH_ATTEMPTS} attempts");
        None
    }

    fn try_fetch_detail(&self, aweme_id: &str) -> Result<DetailOutcome> {
        let response = self
            .authorized(self.client.get(&self.detail_url))
            .query(&[("aweme_id", aweme_id)])
            .timeout(DETAIL_TIMEOUT)
            .send()
            .context("requesting video detail")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body: Value = response.json().unwrap_or(Value::Null);

            if let Some(raw) = self.mobile_fallback(aweme_id) {
                return Ok(DetailOutcome::Found {
                    raw,
                    source: "Web API",
                });
            }

            if body.get("detail").and_then(Value::as_str) == Some("Not Found") {
                info!("video {aweme_id} no longer exists");
                let mut removed = VideoMetadata::removed(aweme_id);
                removed.desc = "视频不存在或已下架".to_string();
                return Ok(DetailOutcome::Removed(removed));
            }

            warn!("API returned status 404 for {aweme_id}");
            return Ok(DetailOutcome::Retry);
        }

        if !status.is_success() {
            warn!("API returned status {status} for {aweme_id}");
            return Ok(DetailOutcome::Retry);
        }

        let envelope: Value = match response.json() {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("could not decode detail response for {aweme_id}: {err}");
                return Ok(DetailOutcome::Retry);
            }
        };

        if envelope.get("code").and_then(Value::as_i64) != Some(200) {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            error!("API error for {aweme_id}: {message}");
            return Ok(DetailOutcome::Unavailable);
        }

        let data = envelope.get("data").cloned().unwrap_or(Value::Null);

        if let Some(detail) = data
            .get("aweme_detail")
            .filter(|value| value.as_object().is_some_and(|object| !object.is_empty()))
        {
            let raw: RawAweme =
                serde_json::from_value(detail.clone()).context("parsing aweme_detail")?;
            return Ok(DetailOutcome::Found {
                raw,
                source: "Web API",
            });
        }

        if let Some(filter) = data
            .get("filter_detail")
            .and_then(Value::as_object)
            .filter(|object| !object.is_empty())
        {
            let message = filter
                .get("detail_msg")
                .and_then(Value::as_str)
                .unwrap_or("filtered");
            warn!("video {aweme_id} appears deleted or hidden: {message}");
            let id = filter
                .get("aweme_id")
                .and_then(Value::as_str)
                .unwrap_or(aweme_id);
            let mut removed = VideoMetadata::removed(id);
            removed.desc = VIDEO_REMOVED.to_string();
            return Ok(DetailOutcome::Removed(removed));
        }

        error!("response for {aweme_id} is missing aweme_detail");
        Ok(DetailOutcome::Unavailable)
    }

    /// One-shot attempt against the mobile detail endpoint; any failure here
    /// is logged and reads as "not found" for the caller.
    fn mobile_fallback(&self, aweme_id: &str) -> Option<RawAweme> {
        info!("web API 404 for {aweme_id}, trying mobile API fallback");
        let attempt = || -> Result<Option<RawAweme>> {
            let response = self
                .authorized(self.client.get(MOBILE_DETAIL_URL))
                .query(&[("aweme_id", aweme_id)])
                .timeout(MOBILE_TIMEOUT)
                .send()?;
            if !response.status().is_success() {
                return Ok(None);
            }
            let envelope: Value = response.json()?;
            if envelope.get("code").and_then(Value::as_i64) != Some(200) {
                return Ok(None);
            }
            let Some(detail) = envelope
                .get("data")
                .and_then(|data| data.get("aweme_detail"))
                .filter(|value| value.as_object().is_some_and(|object| !object.is_empty()))
            else {
                return Ok(None);
            };
            let raw = serde_json::from_value(detail.clone())?;
            Ok(Some(raw))
        };

        match attempt() {
            Ok(Some(raw)) => {
                info!("mobile API fallback succeeded for {aweme_id}");
                Some(raw)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("mobile API fallback failed for {aweme_id}: {err:#}");
                None
            }
        }
    }

    /// Folds the app statistics endpoint's counters into `metadata` under the
    /// max-wins policy. Best effort: gives up quietly after three attempts.
    fn supplement_statistics(&self, metadata: &mut VideoMetadata) {
        for attempt in 1..=FETCH_ATTEMPTS {
            debug!(
                "supplementing statistics for {} (attempt {attempt}/{FETCH_ATTEMPTS})",
                metadata.aweme_id
            );
            match self.fetch_statistics(&[metadata.aweme_id.clone()], STATS_SINGLE_TIMEOUT) {
                Ok(entries) => {
                    if let Some(entry) = entries.first() {
                        let app = entry.counters.to_statistics();
                        info!(
                            "app statistics for {}: play_count {}",
                            metadata.aweme_id, app.play_count
                        );
                        metadata.statistics.merge_max(&app);
                        return;
                    }
                }
                Err(err) => {
                    warn!(
                        "statistics supplement for {} failed (attempt {attempt}/{FETCH_ATTEMPTS}): {err:#}",
                        metadata.aweme_id
                    );
                }
            }
            if attempt < FETCH_ATTEMPTS {
                thread::sleep(STATS_RETRY_DELAY);
            }
        }
    }

    fn fetch_statistics(&self, aweme_ids: &[String], timeout: Duration) -> Result<Vec<RawStatEntry>> {
        let response = self
            .authorized(self.client.get(STATISTICS_URL))
            .query(&[("aweme_ids", aweme_ids.join(","))])
            .timeout(timeout)
            .send()
            .context("requesting video statistics")?;

        let status = response.status();
        if !status.is_success() {
            bail!("statistics endpoint returned {status}");
        }

        let envelope: Value = response.json().context("decoding statistics response")?;
        if envelope.get("code").and_then(Value::as_i64) != Some(200) {
            bail!("statistics API error");
        }

        let entries = envelope
            .get("data")
            .and_then(|data| data.get("statistics_list"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value::<RawStatEntry>(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    /// Fetches many videos, id by id in the result even when the upstream
    /// batch call fails. Every id maps to `Some(metadata)` or `None`; callers
    /// never have to guess which ids were attempted.
    pub fn fetch_videos_batch(
        &self,
        aweme_ids: &[String],
    ) -> HashMap<String, Option<VideoMetadata>> {
        let mut results: HashMap<String, Option<VideoMetadata>> = HashMap::new();
        if aweme_ids.is_empty() {
            return results;
        }

        for chunk in aweme_ids.chunks(MULTI_VIDEO_CHUNK) {
            info!("fetching batch of {} video(s)", chunk.len());
            match self.request_multi_video(chunk) {
                Ok(raws) => {
                    for raw in raws {
                        let Some(id) = raw.aweme_id.as_ref().map(IdValue::as_text) else {
                            continue;
                        };
                        if id.is_empty() {
                            continue;
                        }
                        let metadata = normalize_detail(&raw, &id, "Web API");
                        results.insert(id, Some(metadata));
                    }
                }
                Err(err) => {
                    error!("multi-video request failed: {err:#}");
                }
            }

            // Whatever the batch endpoint did not return gets one single-fetch
            // rescue attempt before being written off.
            for aweme_id in chunk {
                if results.contains_key(aweme_id) {
                    continue;
                }
                warn!("video {aweme_id} missing from batch response, trying single fetch");
                let rescued = self.fetch_video_by_id(aweme_id);
                if rescued.is_none() {
                    error!("single-fetch fallback also failed for {aweme_id}");
                }
                results.insert(aweme_id.clone(), rescued);
            }
        }

        // Second pass: the app statistics endpoint fills in play counts the
        // web batch endpoint reports as zero.
        let successful: Vec<String> = aweme_ids
            .iter()
            .filter(|id| matches!(results.get(*id), Some(Some(_))))
            .cloned()
            .collect();

        if !successful.is_empty() {
            info!("supplementing play counts for {} video(s)", successful.len());
            for pair in successful.chunks(STATS_CHUNK) {
                match self.fetch_statistics(pair, STATS_BATCH_TIMEOUT) {
                    Ok(entries) => {
                        for entry in entries {
                            let Some(id) = entry.aweme_id.as_ref().map(IdValue::as_text) else {
                                continue;
                            };
                            if let Some(Some(metadata)) = results.get_mut(&id) {
                                let app = entry.counters.to_statistics();
                                debug!("play count for {id} from app API: {}", app.play_count);
                                metadata.statistics.merge_max(&app);
                                metadata.data_source = "App API".to_string();
                            }
                        }
                    }
                    Err(err) => {
                        error!("play-count supplement failed: {err:#}");
                    }
                }
            }
        }

        let fetched = results.values().filter(|value| value.is_some()).count();
        info!("batch fetch complete: {fetched}/{} video(s)", aweme_ids.len());
        results
    }

    fn request_multi_video(&self, aweme_ids: &[String]) -> Result<Vec<RawAweme>> {
        let response = self
            .authorized(self.client.post(MULTI_VIDEO_URL))
            .json(&aweme_ids)
            .timeout(BATCH_TIMEOUT)
            .send()
            .context("requesting multi-video batch")?;

        let status = response.status();
        if !status.is_success() {
            bail!("multi-video endpoint returned {status}");
        }

        let envelope: Value = response.json().context("decoding multi-video response")?;
        if envelope.get("code").and_then(Value::as_i64) != Some(200) {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("multi-video API error: {message}");
        }

        Ok(parse_multi_video_payload(envelope.get("data")))
    }

    /// Translates `content` to `target_lang` through the content-translate
    /// endpoint. Input beyond the backend's character cap is cut silently.
    pub fn translate(&self, content: &str, target_lang: &str) -> Result<Translation> {
        if content.is_empty() {
            bail!("translation content is empty");
        }

        let content = if content.chars().count() > TRANSLATE_MAX_CHARS {
            warn!("content exceeds {TRANSLATE_MAX_CHARS} characters, truncating");
            truncate_chars(content, TRANSLATE_MAX_CHARS)
        } else {
            content.to_string()
        };

        info!("translating {} character(s) to {target_lang}", content.chars().count());

        let response = self
            .authorized(self.client.post(TRANSLATE_URL))
            .json(&json!({ "trg_lang": target_lang, "src_content": content }))
            .timeout(TRANSLATE_TIMEOUT)
            .send()
            .context("requesting translation")?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Translation {
                success: false,
                source: content,
                target_lang: target_lang.to_string(),
                translated: None,
                error: Some(format!("HTTP {status}")),
            });
        }

        let envelope: Value = response.json().context("decoding translation response")?;
        if envelope.get("code").and_then(Value::as_i64) != Some(200) {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Ok(Translation {
                success: false,
                source: content,
                target_lang: target_lang.to_string(),
                translated: None,
                error: Some(message),
            });
        }

        let translated = envelope.get("data").and_then(translated_text);
        Ok(Translation {
            success: true,
            source: content,
            target_lang: target_lang.to_string(),
            translated,
            error: None,
        })
    }

    /// Resolves the direct play URL for a video, used by the transcript flow
    /// to download the media file.
    pub fn fetch_play_url(&self, aweme_id: &str) -> Result<String> {
        let response = self
            .authorized(self.client.get(DOWNLOAD_DETAIL_URL))
            .query(&[("aweme_id", aweme_id)])
            .timeout(DETAIL_TIMEOUT)
            .send()
            .context("requesting video download info")?;

        let envelope: Value = response.json().context("decoding download info")?;
        let url = envelope
            .get("data")
            .and_then(|data| data.get("aweme_detail"))
            .and_then(|detail| detail.get("video"))
            .and_then(|video| video.get("play_addr"))
            .and_then(|addr| addr.get("url_list"))
            .and_then(Value::as_array)
            .and_then(|urls| urls.first())
            .and_then(Value::as_str)
            .map(str::to_string);

        url.with_context(|| format!("no play URL available for video {aweme_id}"))
    }

    /// Streams the media file at `url` into `dest`.
    pub fn download_file(&self, url: &str, dest: &std::path::Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .context("downloading video file")?;
        if !response.status().is_success() {
            bail!("video download returned {}", response.status());
        }
        let mut file = std::fs::File::create(dest)
            .with_context(|| format!("creating {}", dest.display()))?;
        let bytes = response
            .copy_to(&mut file)
            .context("writing video file")?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_json() -> Value {
        json!({
            "aweme_id": "7567352731951164082",
            "desc": "新品测评 #乐高",
            "create_time": 1_730_000_000,
            "video": { "duration": 15_500 },
            "author": { "nickname": "作者", "unique_id": "author_id" },
            "statistics": {
                "play_count": 100,
                "digg_count": "12",
                "comment_count": 3,
                "share_count": 0,
                "collect_count": 1
            },
            "text_extra": [
                { "type": 1, "hashtag_name": "乐高" },
                { "type": 0, "hashtag_name": "不是话题" }
            ],
            "status": { "is_delete": false }
        })
    }

    #[test]
    fn normalize_detail_maps_every_field() {
        let raw: RawAweme = serde_json::from_value(detail_json()).unwrap();
        let metadata = normalize_detail(&raw, "fallback", "Web API");
        assert_eq!(metadata.aweme_id, "7567352731951164082");
        assert_eq!(
            metadata.share_url,
            "https://www.douyin.com/video/7567352731951164082"
        );
        assert_eq!(metadata.desc, "新品测评 #乐高");
        assert_eq!(metadata.duration_ms, 15_500);
        assert_eq!(metadata.author.nickname, "作者");
        assert_eq!(metadata.statistics.play_count, 100);
        // String-typed counters parse like numbers.
        assert_eq!(metadata.statistics.digg_count, 12);
        assert_eq!(metadata.hashtags, vec!["乐高"]);
        assert!(!metadata.is_deleted);
        assert_eq!(metadata.data_source, "Web API");
    }

    #[test]
    fn normalize_detail_falls_back_to_requested_id() {
        let raw: RawAweme = serde_json::from_value(json!({ "desc": "无ID" })).unwrap();
        let metadata = normalize_detail(&raw, "1234567890123456789", "Web API");
        assert_eq!(metadata.aweme_id, "1234567890123456789");
    }

    #[test]
    fn normalize_detail_accepts_numeric_ids() {
        let raw: RawAweme =
            serde_json::from_value(json!({ "aweme_id": 7567352731951164082_i64 })).unwrap();
        let metadata = normalize_detail(&raw, "x", "Web API");
        assert_eq!(metadata.aweme_id, "7567352731951164082");
    }

    #[test]
    fn normalize_detail_flags_deleted_videos() {
        let raw: RawAweme =
            serde_json::from_value(json!({ "status": { "is_delete": true } })).unwrap();
        let metadata = normalize_detail(&raw, "1", "Web API");
        assert!(metadata.is_deleted);
    }

    #[test]
    fn multi_video_payload_reads_aweme_list_object() {
        let data = json!({ "aweme_list": [detail_json()] });
        let raws = parse_multi_video_payload(Some(&data));
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].desc.as_deref(), Some("新品测评 #乐高"));
    }

    #[test]
    fn multi_video_payload_reads_aweme_details_key() {
        let data = json!({ "aweme_details": [detail_json(), detail_json()] });
        assert_eq!(parse_multi_video_payload(Some(&data)).len(), 2);
    }

    #[test]
    fn multi_video_payload_reads_bare_array() {
        let data = json!([detail_json()]);
        assert_eq!(parse_multi_video_payload(Some(&data)).len(), 1);
    }

    #[test]
    fn multi_video_payload_reparses_string_encoded_data() {
        let inner = json!({ "aweme_list": [detail_json()] }).to_string();
        let data = Value::String(inner);
        assert_eq!(parse_multi_video_payload(Some(&data)).len(), 1);
    }

    #[test]
    fn multi_video_payload_tolerates_garbage() {
        assert!(parse_multi_video_payload(None).is_empty());
        assert!(parse_multi_video_payload(Some(&Value::Null)).is_empty());
        assert!(parse_multi_video_payload(Some(&json!("not json"))).is_empty());
        assert!(parse_multi_video_payload(Some(&json!({ "other": 1 }))).is_empty());
        assert!(parse_multi_video_payload(Some(&json!(42))).is_empty());
    }

    #[test]
    fn translated_text_digs_out_first_entry() {
        let data = json!({
            "translated_content_list": [
                { "translated_content": "Hello" },
                { "translated_content": "Ignored" }
            ]
        });
        assert_eq!(translated_text(&data).as_deref(), Some("Hello"));
        assert!(translated_text(&json!({})).is_none());
        assert!(translated_text(&json!({ "translated_content_list": [] })).is_none());
    }

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("短视频数据", 3), "短视频");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn count_value_reads_numbers_and_numeric_strings() {
        assert_eq!(count_value(&json!(42)), 42);
        assert_eq!(count_value(&json!("42")), 42);
        assert_eq!(count_value(&json!(" 7 ")), 7);
        assert_eq!(count_value(&json!(3.9)), 3);
        assert_eq!(count_value(&json!("abc")), 0);
        assert_eq!(count_value(&Value::Null), 0);
    }

    #[test]
    fn stat_entry_flattens_counters() {
        let entry: RawStatEntry = serde_json::from_value(json!({
            "aweme_id": "123",
            "play_count": "900",
            "digg_count": 5
        }))
        .unwrap();
        let stats = entry.counters.to_statistics();
        assert_eq!(entry.aweme_id.as_ref().map(IdValue::as_text).as_deref(), Some("123"));
        assert_eq!(stats.play_count, 900);
        assert_eq!(stats.digg_count, 5);
        assert_eq!(stats.share_count, 0);
    }
}
