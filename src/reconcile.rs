#![forbid(unsafe_code)]

//! Reconciliation between spreadsheet rows and fresh video data.
//!
//! This is a pure two-phase transformation, re-run from scratch on every
//! invocation: [`plan`] groups the rows by canonical video id and decides
//! which groups are stale, [`apply_results`] turns fetched metadata into row
//! updates. There is no persisted watermark and nothing here caches state
//! between runs.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::ident::{self, ResolveRedirect};
use crate::parse::{VIDEO_REMOVED, VideoMetadata};

const FIELD_VIDEO_ID: &str = "视频ID";
const FIELD_TITLE: &str = "标题描述";
const FIELD_LIKES: &str = "点赞数";
const FIELD_PLAYS: &str = "播放量";

/// One spreadsheet row as the backend returned it. Rows are never mutated;
/// updates are expressed as fresh field maps in [`RecordUpdate`].
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub record_id: String,
    pub fields: Map<String, Value>,
}

/// All rows sharing one canonical video id. The first row encountered is the
/// master and the only row that ever receives updates; duplicates are tracked
/// in encounter order but left untouched.
#[derive(Debug, Clone)]
pub struct VideoGroup {
    pub master: RecordRow,
    pub duplicates: Vec<RecordRow>,
}

/// Output of the planning phase.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Groups in row-encounter order, keyed by canonical id.
    pub groups: Vec<(String, VideoGroup)>,
    /// Ids whose group needs fresh data, in encounter order.
    pub to_fetch: Vec<String>,
    /// Rows dropped because no video id could be resolved from them.
    pub unresolved_rows: usize,
}

impl SyncPlan {
    /// Groups already complete and therefore skipped this run.
    pub fn skipped(&self) -> usize {
        self.groups.len() - self.to_fetch.len()
    }
}

/// A field mapping destined for one row, in the shape the backend's
/// batch-update endpoint expects.
#[derive(Debug, Clone, Serialize)]
pub struct RecordUpdate {
    pub record_id: String,
    pub fields: Map<String, Value>,
}

/// Flattens a spreadsheet field value to a plain string.
///
/// The backend hands back scalars, bare strings, lists of strings, or lists
/// of rich-text objects depending on the column type; this is the single
/// place that knows about all of those shapes.
pub fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Array(items) => match items.first() {
            None => String::new(),
            Some(Value::Object(object)) => object
                .get("text")
                .map(field_text)
                .unwrap_or_default(),
            Some(first) => field_text(first),
        },
        other => other.to_string(),
    }
}

/// Whether a field holds usable data: absent, null, zero, and empty values
/// all count as "no data".
fn field_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(object)) => !object.is_empty(),
    }
}

/// A group is complete when its master row has a real title and at least one
/// engagement counter. The removed-video sentinel and warning-prefixed titles
/// override the counters: those rows always need a refresh.
fn is_complete(fields: &Map<String, Value>) -> bool {
    let has_likes = field_truthy(fields.get(FIELD_LIKES));
    let has_plays = field_truthy(fields.get(FIELD_PLAYS));

    let title = fields.get(FIELD_TITLE).map(field_text).unwrap_or_default();
    let is_error = title.is_empty() || title == VIDEO_REMOVED || title.starts_with("⚠️");

    !is_error && (has_likes || has_plays)
}

/// Groups `rows` by canonical video id and decides which groups to refresh.
///
/// Rows whose id cannot be resolved are dropped from grouping entirely; the
/// count is reported on the plan and logged, but deliberately kept out of the
/// user-visible summary. `force` marks every group for refresh regardless of
/// completeness.
pub fn plan(rows: Vec<RecordRow>, force: bool, resolver: &dyn ResolveRedirect) -> SyncPlan {
    let mut groups: Vec<(String, VideoGroup)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unresolved_rows = 0;

    for row in rows {
        let raw = row
            .fields
            .get(FIELD_VIDEO_ID)
            .map(field_text)
            .unwrap_or_default();
        let resolved = if raw.is_empty() {
            None
        } else {
            ident::resolve(&raw, resolver)
        };
        let Some(id) = resolved else {
            unresolved_rows += 1;
            continue;
        };

        match index.get(&id) {
            Some(&position) => groups[position].1.duplicates.push(row),
            None => {
                index.insert(id.clone(), groups.len());
                groups.push((
                    id,
                    VideoGroup {
                        master: row,
                        duplicates: Vec::new(),
                    },
                ));
            }
        }
    }

    if unresolved_rows > 0 {
        debug!("{unresolved_rows} row(s) had no resolvable video id and were skipped");
    }

    let to_fetch = groups
        .iter()
        .filter(|(_, group)| force || !is_complete(&group.master.fields))
        .map(|(id, _)| id.clone())
        .collect();

    SyncPlan {
        groups,
        to_fetch,
        unresolved_rows,
    }
}

/// Turns fetch results into row updates, in group encounter order.
///
/// A fetched record becomes a full field mapping on the group's master row.
/// A missing record (`None`, or an id absent from `fetched`) becomes a
/// minimal update that only sets the removed-video title, so nothing else on
/// the row gets cleared. Groups that were not planned for fetching produce no
/// update at all.
pub fn apply_results(
    plan: &SyncPlan,
    fetched: &HashMap<String, Option<VideoMetadata>>,
) -> Vec<RecordUpdate> {
    let planned: HashSet<&str> = plan.to_fetch.iter().map(String::as_str).collect();
    let mut updates = Vec::new();

    for (id, group) in &plan.groups {
        if !planned.contains(id.as_str()) {
            continue;
        }

        let fields = match fetched.get(id) {
            Some(Some(metadata)) => metadata.to_bitable_fields(),
            _ => {
                let mut fields = Map::new();
                fields.insert(FIELD_TITLE.to_string(), json!(VIDEO_REMOVED));
                fields
            }
        };

        updates.push(RecordUpdate {
            record_id: group.master.record_id.clone(),
            fields,
        });
    }

    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::NoRedirect;
    use crate::parse::{Author, Statistics};

    const ID_A: &str = "1111111111111111111";
    const ID_B: &str = "2222222222222222222";

    fn row(record_id: &str, fields: &[(&str, Value)]) -> RecordRow {
        let mut map = Map::new();
        for (name, value) in fields {
            map.insert(name.to_string(), value.clone());
        }
        RecordRow {
            record_id: record_id.to_string(),
            fields: map,
        }
    }

    fn complete_row(record_id: &str, id: &str) -> RecordRow {
        row(
            record_id,
            &[
                (FIELD_VIDEO_ID, json!(id)),
                (FIELD_TITLE, json!("某标题")),
                (FIELD_LIKES, json!(120)),
            ],
        )
    }

    fn sample_metadata(id: &str) -> VideoMetadata {
        VideoMetadata {
            aweme_id: id.to_string(),
            share_url: crate::parse::share_url_for(id),
            desc: "新视频".into(),
            create_time: 1_730_000_000,
            duration_ms: 10_000,
            author: Author {
                nickname: "作者".into(),
                unique_id: "author".into(),
            },
            statistics: Statistics {
                play_count: 10,
                digg_count: 2,
                ..Statistics::default()
            },
            hashtags: Vec::new(),
            promotions: Vec::new(),
            data_source: "Web API".into(),
            is_deleted: false,
        }
    }

    #[test]
    fn field_text_flattens_every_backend_shape() {
        assert_eq!(field_text(&json!("  abc  ")), "abc");
        assert_eq!(field_text(&json!(123)), "123");
        assert_eq!(field_text(&json!(["first", "second"])), "first");
        assert_eq!(field_text(&json!([{ "text": "rich" }])), "rich");
        assert_eq!(field_text(&json!([])), "");
        assert_eq!(field_text(&Value::Null), "");
        assert_eq!(field_text(&json!([{ "link": "no text key" }])), "");
    }

    #[test]
    fn grouping_is_stable_and_first_row_wins_master() {
        let rows = vec![
            complete_row("rec1", ID_A),
            complete_row("rec2", ID_A),
            complete_row("rec3", ID_A),
        ];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.groups.len(), 1);
        let (id, group) = &plan.groups[0];
        assert_eq!(id, ID_A);
        assert_eq!(group.master.record_id, "rec1");
        let duplicate_ids: Vec<_> = group
            .duplicates
            .iter()
            .map(|dup| dup.record_id.as_str())
            .collect();
        assert_eq!(duplicate_ids, ["rec2", "rec3"]);
    }

    #[test]
    fn url_and_raw_id_rows_land_in_one_group() {
        let url = format!("https://www.douyin.com/video/{ID_A}");
        let rows = vec![
            complete_row("rec1", ID_A),
            row("rec2", &[(FIELD_VIDEO_ID, json!(url))]),
        ];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].1.duplicates.len(), 1);
    }

    #[test]
    fn rich_text_id_fields_resolve_like_scalars() {
        let rows = vec![row(
            "rec1",
            &[(FIELD_VIDEO_ID, json!([{ "text": ID_A }]))],
        )];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].0, ID_A);
    }

    #[test]
    fn unresolved_rows_are_dropped_and_counted() {
        let rows = vec![
            complete_row("rec1", ID_A),
            row("rec2", &[(FIELD_VIDEO_ID, json!("not an id"))]),
            row("rec3", &[(FIELD_TITLE, json!("missing id field"))]),
        ];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.unresolved_rows, 2);
    }

    #[test]
    fn complete_group_is_not_fetched() {
        let plan = plan(vec![complete_row("rec1", ID_A)], false, &NoRedirect);
        assert!(plan.to_fetch.is_empty());
        assert_eq!(plan.skipped(), 1);
    }

    #[test]
    fn empty_title_needs_refresh() {
        let rows = vec![row(
            "rec1",
            &[
                (FIELD_VIDEO_ID, json!(ID_A)),
                (FIELD_TITLE, json!("")),
                (FIELD_LIKES, json!(50)),
            ],
        )];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_A]);
    }

    #[test]
    fn removed_sentinel_overrides_counters() {
        let rows = vec![row(
            "rec1",
            &[
                (FIELD_VIDEO_ID, json!(ID_A)),
                (FIELD_TITLE, json!(VIDEO_REMOVED)),
                (FIELD_LIKES, json!(999)),
            ],
        )];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_A]);
    }

    #[test]
    fn warning_prefixed_title_needs_refresh() {
        let rows = vec![row(
            "rec1",
            &[
                (FIELD_VIDEO_ID, json!(ID_A)),
                (FIELD_TITLE, json!("⚠️ 获取失败")),
                (FIELD_PLAYS, json!(10)),
            ],
        )];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_A]);
    }

    #[test]
    fn title_without_counters_needs_refresh() {
        let rows = vec![row(
            "rec1",
            &[(FIELD_VIDEO_ID, json!(ID_A)), (FIELD_TITLE, json!("标题"))],
        )];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_A]);
    }

    #[test]
    fn force_marks_every_group() {
        let rows = vec![complete_row("rec1", ID_A), complete_row("rec2", ID_B)];
        let plan = plan(rows, true, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_A, ID_B]);
        assert_eq!(plan.skipped(), 0);
    }

    #[test]
    fn apply_results_builds_full_update_for_fetched_metadata() {
        let rows = vec![row("rec1", &[(FIELD_VIDEO_ID, json!(ID_A))])];
        let plan = plan(rows, false, &NoRedirect);

        let mut fetched = HashMap::new();
        fetched.insert(ID_A.to_string(), Some(sample_metadata(ID_A)));

        let updates = apply_results(&plan, &fetched);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].record_id, "rec1");
        assert_eq!(updates[0].fields[FIELD_TITLE], json!("新视频"));
        assert_eq!(updates[0].fields[FIELD_PLAYS], json!(10));
    }

    #[test]
    fn apply_results_missing_fetch_touches_only_the_title() {
        let rows = vec![row("rec1", &[(FIELD_VIDEO_ID, json!(ID_A))])];
        let plan = plan(rows, false, &NoRedirect);

        let mut fetched = HashMap::new();
        fetched.insert(ID_A.to_string(), None);

        let updates = apply_results(&plan, &fetched);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].fields.len(), 1);
        assert_eq!(updates[0].fields[FIELD_TITLE], json!(VIDEO_REMOVED));
    }

    #[test]
    fn apply_results_skips_groups_not_planned() {
        let rows = vec![complete_row("rec1", ID_A)];
        let plan = plan(rows, false, &NoRedirect);

        let mut fetched = HashMap::new();
        fetched.insert(ID_A.to_string(), Some(sample_metadata(ID_A)));

        assert!(apply_results(&plan, &fetched).is_empty());
    }

    #[test]
    fn duplicate_and_incomplete_rows_end_to_end() {
        // Rows reference ids A, A, B: A is complete, its duplicate is
        // ignored, and only incomplete B gets fetched and updated.
        let rows = vec![
            complete_row("recA1", ID_A),
            complete_row("recA2", ID_A),
            row("recB", &[(FIELD_VIDEO_ID, json!(ID_B)), (FIELD_TITLE, json!(""))]),
        ];
        let plan = plan(rows, false, &NoRedirect);
        assert_eq!(plan.to_fetch, [ID_B]);

        let mut fetched = HashMap::new();
        fetched.insert(ID_B.to_string(), Some(sample_metadata(ID_B)));

        let updates = apply_results(&plan, &fetched);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].record_id, "recB");
    }
}
