//! RPC method handlers organized by domain. This layer carries no business
//! logic: it converts params, calls the engine, and maps domain errors to
//! wire error codes.

use std::sync::Arc;

use serde::Serialize;

use tempo_core::ids::{EntryId, LogId, RecordId, SessionId, TagId, TaskId};
use tempo_engine::{Engine, EngineError};
use tempo_store::schedule::EntryPatch;
use tempo_store::tags::TagPatch;
use tempo_store::tasks::{NewTask, TaskPatch, TaskStatus};
use tempo_telemetry::{LogQuery, TelemetryGuard};

use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub engine: Engine,
    pub telemetry: Option<Arc<TelemetryGuard>>,
}

impl HandlerState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            telemetry: None,
        }
    }

    pub fn with_telemetry(engine: Engine, telemetry: Arc<TelemetryGuard>) -> Self {
        Self {
            engine,
            telemetry: Some(telemetry),
        }
    }
}

/// Dispatch an RPC method to the appropriate handler.
pub fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Task
        "task.create" => task_create(state, params, id),
        "task.get" => task_get(state, params, id),
        "task.list" => task_list(state, id),
        "task.update" => task_update(state, params, id),
        "task.delete" => task_delete(state, params, id),

        // Tag
        "tag.create" => tag_create(state, params, id),
        "tag.list" => tag_list(state, id),
        "tag.update" => tag_update(state, params, id),
        "tag.delete" => tag_delete(state, params, id),
        "tag.assign" => tag_assign(state, params, id),
        "tag.remove" => tag_remove(state, params, id),

        // Session + logs
        "session.create" => session_create(state, params, id),
        "session.get" => session_get(state, params, id),
        "session.list" => session_list(state, params, id),
        "session.end" => session_end(state, params, id),
        "session.delete" => session_delete(state, params, id),
        "log.start" => log_start(state, params, id),
        "log.stop" => log_stop(state, params, id),
        "log.list" => log_list(state, params, id),
        "log.delete" => log_delete(state, params, id),

        // Records
        "record.get" => record_get(state, params, id),
        "record.list" => record_list(state, params, id),
        "record.update_note" => record_update_note(state, params, id),

        // Schedule
        "schedule.create" => schedule_create(state, params, id),
        "schedule.get" => schedule_get(state, params, id),
        "schedule.update" => schedule_update(state, params, id),
        "schedule.delete" => schedule_delete(state, params, id),
        "schedule.range" => schedule_range(state, params, id),
        "schedule.list" => schedule_list(state, params, id),

        // Aggregation
        "aggregate.session" => aggregate_session(state, params, id),
        "aggregate.task" => aggregate_task(state, params, id),

        // Telemetry
        "telemetry.logs" => telemetry_logs(state, params, id),

        // System
        "health" => RpcResponse::success(id, serde_json::json!({"status": "healthy"})),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn ok<T: Serialize>(id: Option<serde_json::Value>, value: &T) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(json) => RpcResponse::success(id, json),
        Err(e) => RpcResponse::error(id, "INTERNAL_ERROR", e.to_string()),
    }
}

fn engine_result<T: Serialize>(
    id: Option<serde_json::Value>,
    result: Result<T, EngineError>,
) -> RpcResponse {
    match result {
        Ok(value) => ok(id, &value),
        Err(e) => RpcResponse::domain_error(id, &e),
    }
}

// ── Task handlers ──

fn task_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let title = match rpc::require_str(params, "title") {
        Ok(t) => t.to_string(),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let status = match optional_status(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let spec = NewTask {
        title,
        description: rpc::optional_str(params, "description")
            .unwrap_or_default()
            .to_string(),
        estimated_minutes: rpc::optional_i64(params, "estimated_minutes"),
        status,
        parent_id: rpc::optional_i64(params, "parent_id").map(TaskId::from_raw),
    };
    engine_result(id, state.engine.tasks.create_task(&spec))
}

fn task_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.tasks.get_task(task_id))
}

fn task_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    engine_result(id, state.engine.tasks.list_roots())
}

fn task_update(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let status = match optional_status(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let patch = TaskPatch {
        title: rpc::optional_str(params, "title").map(String::from),
        description: rpc::optional_str(params, "description").map(String::from),
        estimated_minutes: rpc::optional_nullable_i64(params, "estimated_minutes"),
        status,
        parent: rpc::optional_nullable_i64(params, "parent_id")
            .map(|p| p.map(TaskId::from_raw)),
    };
    engine_result(id, state.engine.tasks.update_task(task_id, &patch))
}

fn task_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.tasks.delete_task(task_id))
}

fn optional_status(params: &serde_json::Value) -> Result<Option<TaskStatus>, String> {
    match rpc::optional_str(params, "status") {
        Some(raw) => raw
            .parse::<TaskStatus>()
            .map(Some)
            .map_err(|e| format!("Invalid status: {e}")),
        None => Ok(None),
    }
}

// ── Tag handlers ──

fn tag_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let name = match rpc::require_str(params, "name") {
        Ok(n) => n,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let color = rpc::optional_str(params, "color");
    engine_result(id, state.engine.tags.create_tag(name, color))
}

fn tag_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    engine_result(id, state.engine.tags.list_tags())
}

fn tag_update(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let tag_id = match rpc::require_i64(params, "id") {
        Ok(v) => TagId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let patch = TagPatch {
        name: rpc::optional_str(params, "name").map(String::from),
        color: rpc::optional_nullable_str(params, "color"),
    };
    engine_result(id, state.engine.tags.update_tag(tag_id, &patch))
}

fn tag_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let tag_id = match rpc::require_i64(params, "id") {
        Ok(v) => TagId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.tags.delete_tag(tag_id))
}

fn tag_assign(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (task_id, tag_id) = match task_tag_pair(params) {
        Ok(pair) => pair,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.tags.assign_tag(task_id, tag_id))
}

fn tag_remove(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (task_id, tag_id) = match task_tag_pair(params) {
        Ok(pair) => pair,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.tags.remove_tag(task_id, tag_id))
}

fn task_tag_pair(params: &serde_json::Value) -> Result<(TaskId, TagId), String> {
    Ok((
        TaskId::from_raw(rpc::require_i64(params, "task_id")?),
        TagId::from_raw(rpc::require_i64(params, "tag_id")?),
    ))
}

// ── Session + log handlers ──

fn session_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let title = match rpc::require_str(params, "title") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let note = rpc::optional_str(params, "note");
    engine_result(id, state.engine.timing.create_session(task_id, title, note))
}

fn session_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.get_session(session_id))
}

fn session_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.list_sessions(task_id))
}

fn session_end(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let note = rpc::optional_str(params, "note");
    engine_result(id, state.engine.timing.end_session(session_id, note))
}

fn session_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.engine.timing.delete_session(session_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"deleted": true})),
        Err(e) => RpcResponse::domain_error(id, &e),
    }
}

fn log_start(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let started_at = match rpc::optional_timestamp(params, "started_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.start_log(session_id, started_at))
}

fn log_stop(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let log_id = match rpc::require_i64(params, "id") {
        Ok(v) => LogId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let ended_at = match rpc::optional_timestamp(params, "ended_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let note = rpc::optional_str(params, "note");
    engine_result(id, state.engine.timing.stop_log(log_id, ended_at, note))
}

fn log_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.list_logs(session_id))
}

fn log_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let log_id = match rpc::require_i64(params, "id") {
        Ok(v) => LogId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.engine.timing.delete_log(log_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"deleted": true})),
        Err(e) => RpcResponse::domain_error(id, &e),
    }
}

// ── Record handlers ──

fn record_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let record_id = match rpc::require_i64(params, "id") {
        Ok(v) => RecordId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.get_record(record_id))
}

fn record_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.timing.list_records(task_id))
}

fn record_update_note(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let record_id = match rpc::require_i64(params, "id") {
        Ok(v) => RecordId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let note = rpc::optional_str(params, "note");
    engine_result(id, state.engine.timing.update_record_note(record_id, note))
}

// ── Schedule handlers ──

fn schedule_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let starts_at = match rpc::require_timestamp(params, "starts_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let ends_at = match rpc::require_timestamp(params, "ends_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(
        id,
        state.engine.schedule.create_entry(task_id, starts_at, ends_at),
    )
}

fn schedule_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let entry_id = match rpc::require_i64(params, "id") {
        Ok(v) => EntryId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.schedule.get_entry(entry_id))
}

fn schedule_update(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let entry_id = match rpc::require_i64(params, "id") {
        Ok(v) => EntryId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let starts_at = match rpc::optional_timestamp(params, "starts_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let ends_at = match rpc::optional_timestamp(params, "ends_at") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let patch = EntryPatch { starts_at, ends_at };
    engine_result(id, state.engine.schedule.update_entry(entry_id, &patch))
}

fn schedule_delete(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let entry_id = match rpc::require_i64(params, "id") {
        Ok(v) => EntryId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.engine.schedule.delete_entry(entry_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"deleted": true})),
        Err(e) => RpcResponse::domain_error(id, &e),
    }
}

fn schedule_range(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let from = match rpc::require_timestamp(params, "from") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let to = match rpc::require_timestamp(params, "to") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.schedule.list_between(from, to))
}

fn schedule_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    engine_result(id, state.engine.schedule.list_by_task(task_id))
}

// ── Aggregation handlers ──

fn aggregate_session(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_i64(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.engine.aggregate.total_for_session(session_id) {
        Ok(total) => RpcResponse::success(id, serde_json::json!({"total_seconds": total})),
        Err(e) => RpcResponse::domain_error(id, &e),
    }
}

fn aggregate_task(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let task_id = match rpc::require_i64(params, "task_id") {
        Ok(v) => TaskId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let live = match state.engine.aggregate.total_for_task(task_id) {
        Ok(total) => total,
        Err(e) => return RpcResponse::domain_error(id, &e),
    };
    let recorded = match state.engine.aggregate.recorded_total_for_task(task_id) {
        Ok(total) => total,
        Err(e) => return RpcResponse::domain_error(id, &e),
    };
    RpcResponse::success(
        id,
        serde_json::json!({"total_seconds": live, "recorded_seconds": recorded}),
    )
}

// ── Telemetry handlers ──

fn telemetry_logs(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(ref telemetry) = state.telemetry else {
        return RpcResponse::error(id, "INTERNAL_ERROR", "Telemetry not configured");
    };
    let Some(sink) = telemetry.logs() else {
        return RpcResponse::error(id, "INTERNAL_ERROR", "Log sink disabled");
    };
    let query = LogQuery {
        level: rpc::optional_str(params, "level").map(String::from),
        target: rpc::optional_str(params, "target").map(String::from),
        since: rpc::optional_str(params, "since").map(String::from),
        limit: rpc::optional_i64(params, "limit").map(|l| l as u32),
    };
    match sink.query(&query) {
        Ok(records) => ok(id, &records),
        Err(e) => RpcResponse::error(id, "INTERNAL_ERROR", e.to_string()),
    }
}
