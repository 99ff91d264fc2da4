use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_err, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};

const META_KEY: &str = "workspace.meta";

/// Open (or create) the workspace database and make it the active store.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let store = Store::open(path)?;
    let now = chrono::Utc::now().to_rfc3339();
    let created_at = db::settings_get_json(store.conn(), META_KEY)?
        .and_then(|m| m.get("createdAt").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| now.clone());
    db::settings_set_json(
        store.conn(),
        META_KEY,
        &json!({ "createdAt": created_at, "lastOpenedAt": now }),
    )?;
    tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
    state.workspace = Some(path.to_path_buf());
    state.store = Some(store);
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let meta = state
        .store
        .as_ref()
        .and_then(|s| db::settings_get_json(s.conn(), META_KEY).ok().flatten());
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "workspaceMeta": meta,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

fn read_snapshot_file(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.to_string_lossy()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("snapshot is not valid JSON: {}", path.to_string_lossy()))
}

fn snapshot_import(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let path = req.params.get("path").and_then(|v| v.as_str());
    let snapshot = match (path, req.params.get("snapshot")) {
        (Some(p), _) => read_snapshot_file(Path::new(p))
            .map_err(|e| HandlerErr::new("snapshot_read_failed", format!("{e:#}")))?,
        (None, Some(v)) if v.is_object() => v.clone(),
        _ => return Err(HandlerErr::bad_params("missing path or snapshot object")),
    };
    let summary = store
        .import_snapshot(&snapshot)
        .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "imported": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "snapshot.import" => Some(respond(req, snapshot_import(state, req))),
        _ => None,
    }
}
