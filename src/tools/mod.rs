//! Built-in tools: analytics over stored datasets and the two-phase
//! writeback pair.
//!
//! Each tool contributes its [`ToolSpec`] and handler here, explicitly, at
//! startup. The specs double as the source of the JSON Schemas offered to
//! the model.

use std::sync::Arc;

use serde_json::json;

use crate::dispatch::Dispatcher;
use crate::engine::EngineBounds;
use crate::registry::{
    ArgSpec, ArgType, FilterCanonicalizer, PagingPolicy, ToolRegistry, ToolSpec,
};
use crate::store::{DatasetStore, PlanStore, ResultCache};

pub mod analytics;
pub mod confirm;

pub use confirm::{LoggingWritebackSink, WritebackSink};

/// Settings the built-in tools need at registration time.
#[derive(Debug, Clone)]
pub struct BuiltinToolConfig {
    /// Engine bounds applied to `analytics.run`.
    pub bounds: EngineBounds,
    /// Roles allowed to run write tools.
    pub write_roles: Vec<String>,
    /// Confirmation plan lifetime in seconds.
    pub plan_ttl_secs: u64,
}

impl Default for BuiltinToolConfig {
    fn default() -> Self {
        Self {
            bounds: EngineBounds::default(),
            write_roles: vec!["admin".to_owned(), "editor".to_owned()],
            plan_ttl_secs: 900,
        }
    }
}

/// Register every built-in tool into `registry` and `dispatcher`.
pub fn register_builtin(
    registry: &mut ToolRegistry,
    dispatcher: &mut Dispatcher,
    datasets: Arc<DatasetStore>,
    cache: Arc<ResultCache>,
    plans: Arc<PlanStore>,
    sink: Arc<dyn WritebackSink>,
    config: &BuiltinToolConfig,
) {
    let no_filters = Arc::new(FilterCanonicalizer::default());

    registry.register(analytics_run_spec(no_filters.clone()));
    dispatcher.register(
        "analytics.run",
        Arc::new(analytics::AnalyticsRunHandler::new(
            datasets.clone(),
            cache,
            config.bounds,
        )),
    );

    registry.register(dataset_preview_spec(no_filters.clone()));
    dispatcher.register(
        "dataset.preview",
        Arc::new(analytics::DatasetPreviewHandler::new(datasets.clone())),
    );

    registry.register(dataset_list_spec());
    dispatcher.register(
        "dataset.list",
        Arc::new(analytics::DatasetListHandler::new(datasets)),
    );

    registry.register(writeback_prepare_spec(no_filters.clone()));
    dispatcher.register(
        "writeback.prepare",
        Arc::new(confirm::WritebackPrepareHandler::new(
            plans.clone(),
            config.plan_ttl_secs,
        )),
    );

    registry.register(writeback_commit_spec(no_filters, config.write_roles.clone()));
    dispatcher.register(
        "writeback.commit",
        Arc::new(confirm::WritebackCommitHandler::new(plans, sink)),
    );
}

fn analytics_run_spec(filters: Arc<FilterCanonicalizer>) -> ToolSpec {
    let bound = |name: &str, max: i64| {
        ArgSpec::optional(name, ArgType::Int, None).with_range(1, max)
    };
    ToolSpec {
        name: "analytics.run".to_owned(),
        description: "Run a bounded pipeline (filter/select/groupBy/sort/topN/join) \
                      over a stored dataset and return the resulting rows."
            .to_owned(),
        requires_write: false,
        write_roles: vec![],
        args: vec![
            ArgSpec::required("datasetId", ArgType::String),
            ArgSpec::required("pipeline", ArgType::Json),
            bound("topN", 5000),
            bound("maxGroups", 10_000),
            bound("maxResultRows", 10_000),
            bound("maxJoinRows", 100_000),
            bound("maxJoinMatchesPerLeft", 1000),
            bound("maxColumns", 256),
            ArgSpec::optional("persistAs", ArgType::String, None),
        ],
        paging: PagingPolicy::none(),
        allowed_filter_keys: vec![],
        filter_aliases: filters,
    }
}

fn dataset_preview_spec(filters: Arc<FilterCanonicalizer>) -> ToolSpec {
    ToolSpec {
        name: "dataset.preview".to_owned(),
        description: "Preview a page of rows from a stored dataset, with its schema.".to_owned(),
        requires_write: false,
        write_roles: vec![],
        args: vec![ArgSpec::required("datasetId", ArgType::String)],
        paging: PagingPolicy::pages(20, 200),
        allowed_filter_keys: vec![],
        filter_aliases: filters,
    }
}

fn dataset_list_spec() -> ToolSpec {
    ToolSpec {
        name: "dataset.list".to_owned(),
        description: "List the caller's live datasets with row counts and expiry.".to_owned(),
        requires_write: false,
        write_roles: vec![],
        args: vec![],
        paging: PagingPolicy::none(),
        allowed_filter_keys: vec!["source".to_owned()],
        filter_aliases: Arc::new(FilterCanonicalizer::new(&[
            ("src", "source"),
            ("dataset source", "source"),
        ])),
    }
}

fn writeback_prepare_spec(filters: Arc<FilterCanonicalizer>) -> ToolSpec {
    ToolSpec {
        name: "writeback.prepare".to_owned(),
        description: "Stage a data change for two-phase commit; returns a plan id \
                      the user must confirm."
            .to_owned(),
        requires_write: false,
        write_roles: vec![],
        args: vec![
            ArgSpec::required("action", ArgType::String),
            ArgSpec::optional("payload", ArgType::StringMap, Some(json!({}))),
        ],
        paging: PagingPolicy::none(),
        allowed_filter_keys: vec![],
        filter_aliases: filters,
    }
}

fn writeback_commit_spec(filters: Arc<FilterCanonicalizer>, write_roles: Vec<String>) -> ToolSpec {
    ToolSpec {
        name: "writeback.commit".to_owned(),
        description: "Commit a previously prepared change. Requires the user's \
                      CONFIRM <id> reply."
            .to_owned(),
        requires_write: true,
        write_roles,
        args: vec![ArgSpec::optional("planId", ArgType::String, None)],
        paging: PagingPolicy::none(),
        allowed_filter_keys: vec![],
        filter_aliases: filters,
    }
}
