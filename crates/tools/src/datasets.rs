//! Dataset tools: enumerate the caller's tables and pull data through the
//! scoped SQL capability into the context.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use dq_context::ContextState;
use dq_domain::error::Result;
use dq_storage::RelationalStore;

use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

pub(crate) fn register(registry: &mut ToolRegistry, store: Arc<dyn RelationalStore>) {
    registry.register(
        ToolSpec {
            name: "list_user_datasets",
            description: "List the user's uploaded datasets with row counts and field metadata.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
            effect: SideEffect::EXTERNAL_READ,
        },
        Arc::new(ListUserDatasets {
            store: store.clone(),
        }),
    );

    registry.register(
        ToolSpec {
            name: "get_dataset_data_from_sql",
            description: "Execute a read-only SQL query against the user's dataset tables and \
                          keep the result available for later analysis steps. Table names use \
                          the user's `__user_<id>_<dataset>` namespace.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "A single SELECT statement" },
                    "name": { "type": "string", "description": "Name to store the result under (defaults to the dataset name)" },
                    "params": { "type": "array", "description": "Positional parameters for ? placeholders" }
                },
                "required": ["query"]
            }),
            effect: SideEffect::EXTERNAL_READ_CONTEXT_WRITE,
        },
        Arc::new(GetDatasetDataFromSql { store }),
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_user_datasets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ListUserDatasets {
    store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl ToolExecutor for ListUserDatasets {
    async fn execute(&self, _args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let datasets = self.store.list_user_tables(&ctx.user_id).await?;

        let summary = if datasets.is_empty() {
            "No datasets uploaded yet.".to_string()
        } else {
            let mut s = format!("{} dataset(s):\n", datasets.len());
            for d in &datasets {
                s.push_str(&format!(
                    "- **{}** ({} rows): {}\n",
                    d.friendly_name,
                    d.row_count,
                    d.columns.join(", ")
                ));
            }
            s
        };

        Ok(ToolOutcome::ok(
            summary,
            serde_json::json!({ "datasets": datasets }),
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_dataset_data_from_sql
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct SqlArgs {
    query: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    params: Option<Vec<Value>>,
}

struct GetDatasetDataFromSql {
    store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl ToolExecutor for GetDatasetDataFromSql {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: SqlArgs = parse_args(args)?;
        let params = args.params.unwrap_or_default();

        let table = self
            .store
            .execute_sql(&ctx.user_id, &args.query, &params)
            .await?;

        let name = args
            .name
            .or_else(|| friendly_name_from_query(&ctx.user_id, &args.query))
            .unwrap_or_else(|| "sql_result".to_string());

        let summary = format!(
            "Stored `{}`: {} rows × {} columns ({}).",
            name,
            table.row_count(),
            table.columns.len(),
            table.columns.join(", ")
        );
        let payload = serde_json::json!({
            "name": name,
            "row_count": table.row_count(),
            "columns": table.columns,
        });

        ctx.insert_dataset(&name, table);
        Ok(ToolOutcome::ok(summary, payload))
    }
}

/// Derive the dataset name from the first scoped identifier in the query:
/// `__user_u1_reviews` → `reviews`.
fn friendly_name_from_query(user_id: &str, query: &str) -> Option<String> {
    let prefix = dq_storage::owner_prefix(user_id);
    let start = query.find(&prefix)? + prefix.len();
    let rest = &query[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let name = &rest[..end];
    (!name.is_empty()).then(|| name.to_string())
}
