#![forbid(unsafe_code)]

//! Normalized video metadata and its projections.
//!
//! The raw API payloads (see [`crate::tikhub`]) are flattened into
//! [`VideoMetadata`] once, right at the adapter boundary. Everything further
//! downstream — the Bitable field mapping, the `query` JSON output — works
//! from this one shape and never re-reads raw JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Title written to a row whose video no longer exists. Also recognized by
/// the reconciliation logic as a "needs refresh" sentinel.
pub const VIDEO_REMOVED: &str = "视频已下架";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub unique_id: String,
}

/// The five engagement counters both data sources report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub play_count: i64,
    #[serde(default)]
    pub digg_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub share_count: i64,
    #[serde(default)]
    pub collect_count: i64,
}

impl Statistics {
    /// Merges counters from a second source under the max-wins policy: the
    /// larger value is kept, and zero counts as "no data" rather than a real
    /// measurement, so it never replaces a positive count.
    pub fn merge_max(&mut self, other: &Statistics) {
        self.play_count = max_wins(self.play_count, other.play_count);
        self.digg_count = max_wins(self.digg_count, other.digg_count);
        self.comment_count = max_wins(self.comment_count, other.comment_count);
        self.share_count = max_wins(self.share_count, other.share_count);
        self.collect_count = max_wins(self.collect_count, other.collect_count);
    }
}

fn max_wins(current: i64, candidate: i64) -> i64 {
    if candidate > 0 {
        current.max(candidate)
    } else {
        current
    }
}

/// A promoted product attached to a video ("挂车" in operator speak).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Promotion {
    #[serde(default)]
    pub title: String,
    /// Price in cents, as reported by the API.
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub sales: i64,
    #[serde(default)]
    pub url: String,
}

/// One `text_extra` entry from the raw payload; only hashtag entries
/// (`type == 1`) are of interest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextExtra {
    #[serde(default, rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub hashtag_name: Option<String>,
}

/// Collects the hashtag names out of a `text_extra` list, in order.
pub fn extract_hashtags(text_extra: &[TextExtra]) -> Vec<String> {
    text_extra
        .iter()
        .filter(|item| item.kind == 1)
        .filter_map(|item| item.hashtag_name.as_deref())
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag.to_string())
        .collect()
}

/// The normalized record every fetch produces, immutable once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub aweme_id: String,
    pub share_url: String,
    pub desc: String,
    /// Creation time in epoch seconds; 0 when unknown.
    pub create_time: i64,
    /// Duration in milliseconds as reported by the API.
    pub duration_ms: i64,
    pub author: Author,
    pub statistics: Statistics,
    pub hashtags: Vec<String>,
    pub promotions: Vec<Promotion>,
    pub data_source: String,
    pub is_deleted: bool,
}

pub fn share_url_for(aweme_id: &str) -> String {
    format!("https://www.douyin.com/video/{aweme_id}")
}

impl VideoMetadata {
    /// The title to show operators: the description, or the removed-video
    /// sentinel when the video is gone or the payload was empty.
    pub fn display_title(&self) -> String {
        if !self.desc.is_empty() {
            return self.desc.clone();
        }
        if self.is_deleted || (!self.aweme_id.is_empty() && self.create_time == 0) {
            return VIDEO_REMOVED.to_string();
        }
        String::new()
    }

    fn hashtags_text(&self) -> String {
        self.hashtags
            .iter()
            .map(|tag| format!("#{tag}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the full Bitable field mapping for this video, using the column
    /// names the operator spreadsheets were created with.
    pub fn to_bitable_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();

        fields.insert("视频ID".into(), json!(self.aweme_id));
        fields.insert(
            "视频链接".into(),
            if self.share_url.is_empty() {
                Value::Null
            } else {
                json!({ "text": "查看视频", "link": self.share_url })
            },
        );
        fields.insert("标题描述".into(), json!(self.display_title()));
        fields.insert("作者昵称".into(), json!(self.author.nickname));
        fields.insert("作者ID".into(), json!(self.author.unique_id));
        // Bitable date columns take epoch milliseconds.
        fields.insert("发布时间".into(), json!(self.create_time.max(0) * 1000));
        fields.insert(
            "视频时长(秒)".into(),
            json!(round2(self.duration_ms as f64 / 1000.0)),
        );
        fields.insert("采集时间".into(), json!(Utc::now().timestamp_millis()));

        fields.insert("播放量".into(), json!(self.statistics.play_count));
        fields.insert("点赞数".into(), json!(self.statistics.digg_count));
        fields.insert("评论数".into(), json!(self.statistics.comment_count));
        fields.insert("分享数".into(), json!(self.statistics.share_count));
        fields.insert("收藏数".into(), json!(self.statistics.collect_count));

        fields.insert("数据来源".into(), json!(self.data_source));
        fields.insert("话题标签".into(), json!(self.hashtags_text()));

        match self.promotions.first() {
            Some(product) => {
                fields.insert("是否挂车".into(), json!(true));
                fields.insert("商品标题".into(), json!(product.title));
                fields.insert(
                    "商品价格(元)".into(),
                    json!(round2(product.price as f64 / 100.0)),
                );
                fields.insert("商品销量".into(), json!(product.sales));
                fields.insert(
                    "商品链接".into(),
                    if product.url.is_empty() {
                        Value::Null
                    } else {
                        json!({ "text": "查看商品", "link": product.url })
                    },
                );
            }
            None => {
                fields.insert("是否挂车".into(), json!(false));
                fields.insert("商品标题".into(), json!(""));
                fields.insert("商品价格(元)".into(), json!(0));
                fields.insert("商品销量".into(), json!(0));
                fields.insert("商品链接".into(), Value::Null);
            }
        }

        fields
    }

    /// Compact JSON shape for `query --output json`.
    pub fn to_simple_json(&self) -> Value {
        let url = if self.share_url.is_empty() {
            share_url_for(&self.aweme_id)
        } else {
            self.share_url.clone()
        };

        json!({
            "aweme_id": self.aweme_id,
            "url": url,
            "title": self.display_title(),
            "author": {
                "nickname": self.author.nickname,
                "unique_id": self.author.unique_id,
            },
            "create_time": self.create_time,
            "duration_seconds": round2(self.duration_ms as f64 / 1000.0),
            "statistics": {
                "play_count": self.statistics.play_count,
                "digg_count": self.statistics.digg_count,
                "comment_count": self.statistics.comment_count,
                "share_count": self.statistics.share_count,
                "collect_count": self.statistics.collect_count,
            },
            "hashtags": self.hashtags_text(),
            "is_deleted": self.is_deleted,
            "data_source": self.data_source,
            "fetched_at": Utc::now().timestamp(),
        })
    }

    /// Synthetic record for a video the backend reports as gone.
    pub fn removed(aweme_id: &str) -> Self {
        Self {
            aweme_id: aweme_id.to_string(),
            desc: String::new(),
            is_deleted: true,
            data_source: "Web API".to_string(),
            ..Self::default()
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
