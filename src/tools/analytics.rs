//! Analytics tool handlers: pipeline execution, dataset preview, dataset
//! listing.
//!
//! `analytics.run` stitches the stores to the engine: dataset lookup is
//! tenant-scoped, join right sides resolve through the same store, results
//! are memoized in the result cache unless the caller persists them as a
//! new dataset.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::dispatch::{HandlerOutcome, ToolHandler};
use crate::engine::dataset::{Cell, Dataset, Frame};
use crate::engine::{self, plan, EngineBounds, EngineError};
use crate::invoke::str_arg;
use crate::registry::{ArgValue, ToolIntent};
use crate::store::{DatasetStore, ResultCache};
use crate::store::result_cache::CachedResult;

/// Rows included in the evidence sample.
const EVIDENCE_SAMPLE_ROWS: usize = 3;

// ---------------------------------------------------------------------------
// analytics.run
// ---------------------------------------------------------------------------

/// Handler for `analytics.run`.
pub struct AnalyticsRunHandler {
    datasets: Arc<DatasetStore>,
    cache: Arc<ResultCache>,
    bounds: EngineBounds,
}

impl AnalyticsRunHandler {
    /// Wire the handler to its stores and default bounds.
    pub fn new(datasets: Arc<DatasetStore>, cache: Arc<ResultCache>, bounds: EngineBounds) -> Self {
        Self {
            datasets,
            cache,
            bounds,
        }
    }

    fn effective_bounds(&self, intent: &ToolIntent) -> EngineBounds {
        let over = |name: &str, current: usize| {
            intent
                .arg(name)
                .and_then(ArgValue::as_int)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(current)
        };
        EngineBounds {
            top_n: over("topN", self.bounds.top_n),
            max_groups: over("maxGroups", self.bounds.max_groups),
            max_join_rows: over("maxJoinRows", self.bounds.max_join_rows),
            max_join_matches_per_left: over(
                "maxJoinMatchesPerLeft",
                self.bounds.max_join_matches_per_left,
            ),
            max_columns: over("maxColumns", self.bounds.max_columns),
            max_result_rows: over("maxResultRows", self.bounds.max_result_rows),
        }
        .clamped()
    }
}

#[async_trait]
impl ToolHandler for AnalyticsRunHandler {
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let dataset_id = str_arg(intent, "datasetId")
            .ok_or_else(|| anyhow::anyhow!("datasetId absent after validation"))?;
        let pipeline = intent
            .arg("pipeline")
            .and_then(ArgValue::as_json)
            .ok_or_else(|| anyhow::anyhow!("pipeline absent after validation"))?;

        let Some(dataset) = self
            .datasets
            .lookup(dataset_id, &ctx.tenant_id, &ctx.user_id)
        else {
            return Ok(HandlerOutcome::fail(
                "DATASET_NOT_FOUND",
                format!("dataset '{dataset_id}' does not exist or has expired"),
            ));
        };

        let (steps, mut warnings) = match plan::parse_plan(pipeline) {
            Ok(parsed) => parsed,
            Err(EngineError::Argument(message)) => {
                return Ok(HandlerOutcome::fail("ARGUMENT_ERROR", message));
            }
        };

        let bounds = self.effective_bounds(intent);
        let persist_as = str_arg(intent, "persistAs").map(ToOwned::to_owned);
        let pipeline_json = pipeline.to_string();
        let cache_key = ResultCache::key(dataset_id, &bounds, &pipeline_json);

        // Cache consult — bypassed entirely when persisting. Cached entries
        // already carry the parse warnings of the original run.
        if persist_as.is_none() {
            if let Some(hit) = self.cache.get(&cache_key) {
                let payload = run_payload(dataset_id, &hit.frame, &hit.warnings, true, None);
                return Ok(success_outcome(&hit.frame, payload, hit.warnings.len()));
            }
        }

        let tenant = ctx.tenant_id.clone();
        let user = ctx.user_id.clone();
        let datasets = self.datasets.clone();
        let resolver = move |rid: &str| datasets.lookup(rid, &tenant, &user);

        let (frame, exec_warnings) = match engine::execute(&dataset, &steps, &bounds, &resolver) {
            Ok(result) => result,
            Err(EngineError::Argument(message)) => {
                return Ok(HandlerOutcome::fail("ARGUMENT_ERROR", message));
            }
        };
        warnings.extend(exec_warnings);

        let result_dataset_id = match &persist_as {
            Some(label) => {
                let new_id = Uuid::new_v4().simple().to_string();
                let persisted = Dataset::from_frame(
                    new_id.clone(),
                    format!("analytics:{label}"),
                    ctx.tenant_id.clone(),
                    ctx.user_id.clone(),
                    self.datasets.default_ttl_secs(),
                    &frame,
                )
                .map_err(|e| anyhow::anyhow!("persisting result failed: {e}"))?;
                self.datasets.insert(persisted);
                Some(new_id)
            }
            None => {
                self.cache.put(
                    cache_key,
                    CachedResult {
                        frame: frame.clone(),
                        warnings: warnings.clone(),
                    },
                );
                None
            }
        };

        let payload = run_payload(
            dataset_id,
            &frame,
            &warnings,
            false,
            result_dataset_id.as_deref(),
        );
        Ok(success_outcome(&frame, payload, warnings.len()))
    }
}

fn success_outcome(frame: &Frame, payload: Value, warning_count: usize) -> HandlerOutcome {
    let message = if warning_count == 0 {
        format!("pipeline produced {} rows", frame.row_count())
    } else {
        format!(
            "pipeline produced {} rows ({warning_count} warnings)",
            frame.row_count()
        )
    };
    let evidence = vec![frame_evidence(frame)];
    HandlerOutcome::ok(message, payload)
        .with_source("analytics-engine")
        .with_evidence(evidence)
}

fn run_payload(
    dataset_id: &str,
    frame: &Frame,
    warnings: &[String],
    cached: bool,
    result_dataset_id: Option<&str>,
) -> Value {
    let mut payload = json!({
        "kind": "analytics.run.v2",
        "schemaVersion": 2,
        "datasetId": dataset_id,
        "rowCount": frame.row_count(),
        "columns": columns_json(frame),
        "rows": rows_json(frame, frame.row_count()),
        "warnings": warnings,
        "cached": cached,
    });
    if let Some(id) = result_dataset_id {
        payload["resultDatasetId"] = Value::String(id.to_owned());
    }
    payload
}

fn frame_evidence(frame: &Frame) -> Value {
    let sample: Vec<Vec<String>> = frame
        .rows
        .iter()
        .take(EVIDENCE_SAMPLE_ROWS)
        .map(|row| row.iter().map(Cell::canon).collect())
        .collect();
    json!({
        "rowCount": frame.row_count(),
        "columns": frame.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        "sampleRows": sample,
    })
}

fn columns_json(frame: &Frame) -> Value {
    Value::Array(
        frame
            .columns
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "dataType": c.data_type.tag(),
                    "displayName": c.display_name,
                })
            })
            .collect(),
    )
}

fn rows_json(frame: &Frame, limit: usize) -> Value {
    Value::Array(
        frame
            .rows
            .iter()
            .take(limit)
            .map(|row| Value::Array(row.iter().map(Cell::to_json).collect()))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// dataset.preview
// ---------------------------------------------------------------------------

/// Handler for `dataset.preview`.
pub struct DatasetPreviewHandler {
    datasets: Arc<DatasetStore>,
}

impl DatasetPreviewHandler {
    /// Wire the handler to the dataset store.
    pub fn new(datasets: Arc<DatasetStore>) -> Self {
        Self { datasets }
    }
}

#[async_trait]
impl ToolHandler for DatasetPreviewHandler {
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let dataset_id = str_arg(intent, "datasetId")
            .ok_or_else(|| anyhow::anyhow!("datasetId absent after validation"))?;

        let Some(dataset) = self
            .datasets
            .lookup(dataset_id, &ctx.tenant_id, &ctx.user_id)
        else {
            return Ok(HandlerOutcome::fail(
                "DATASET_NOT_FOUND",
                format!("dataset '{dataset_id}' does not exist or has expired"),
            ));
        };

        let frame = dataset.frame();
        let total = frame.row_count();
        let page = usize::try_from(intent.page).unwrap_or(1).max(1);
        let page_size = usize::try_from(intent.page_size).unwrap_or(1).max(1);
        let start = page.saturating_sub(1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);

        let rows: Vec<Value> = frame.rows[start..end]
            .iter()
            .map(|row| Value::Array(row.iter().map(Cell::to_json).collect()))
            .collect();

        let payload = json!({
            "kind": "dataset.preview.v2",
            "schemaVersion": 2,
            "datasetId": dataset.dataset_id,
            "source": dataset.source,
            "rowCount": total,
            "page": intent.page,
            "pageSize": intent.page_size,
            "columns": columns_json(&frame),
            "rows": rows,
        });

        Ok(HandlerOutcome::ok(
            format!(
                "dataset '{dataset_id}': rows {start}..{end} of {total}",
            ),
            payload,
        )
        .with_source("dataset-store"))
    }
}

// ---------------------------------------------------------------------------
// dataset.list
// ---------------------------------------------------------------------------

/// Handler for `dataset.list`.
pub struct DatasetListHandler {
    datasets: Arc<DatasetStore>,
}

impl DatasetListHandler {
    /// Wire the handler to the dataset store.
    pub fn new(datasets: Arc<DatasetStore>) -> Self {
        Self { datasets }
    }
}

#[async_trait]
impl ToolHandler for DatasetListHandler {
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let source_filter = intent.filters.get("source");
        let items: Vec<Value> = self
            .datasets
            .list_for(&ctx.tenant_id, &ctx.user_id)
            .into_iter()
            .filter(|d| {
                source_filter.map_or(true, |wanted| d.source.eq_ignore_ascii_case(wanted))
            })
            .map(|d| {
                let expires = d
                    .created_at_utc
                    .checked_add_signed(chrono::Duration::seconds(
                        i64::try_from(d.ttl_secs).unwrap_or(i64::MAX),
                    ))
                    .unwrap_or(d.created_at_utc);
                json!({
                    "datasetId": d.dataset_id,
                    "source": d.source,
                    "rowCount": d.row_count(),
                    "createdAtUtc": d.created_at_utc,
                    "expiresAtUtc": expires,
                })
            })
            .collect();

        let payload = json!({
            "kind": "dataset.list.v2",
            "schemaVersion": 2,
            "count": items.len(),
            "items": items,
        });
        Ok(HandlerOutcome::ok(
            format!("{} live datasets", payload["count"]),
            payload,
        )
        .with_source("dataset-store"))
    }
}
