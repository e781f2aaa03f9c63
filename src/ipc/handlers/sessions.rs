use serde::Deserialize;
use serde_json::json;

use crate::gateway::{delete_session, get_session, student_view, teacher_view, QueryFilters};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::query_settings;
use crate::ipc::helpers::{parse_params, require_db, settings_err, to_result, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Caller;
use crate::store::SqliteSessionStore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    caller: Caller,
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParams {
    caller: Caller,
    #[serde(default)]
    filters: QueryFilters,
}

fn session_params(req: &Request) -> Result<(Caller, String), HandlerErr> {
    let params: SessionParams = parse_params(req)?;
    let session_id = params.session_id.trim().to_string();
    if session_id.is_empty() {
        return Err(HandlerErr::new("bad_params", "sessionId must not be empty"));
    }
    Ok((params.caller.validated()?, session_id))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (caller, session_id) = session_params(req)?;
    let store = SqliteSessionStore::new(conn);
    Ok(get_session(&store, &caller, &session_id)?)
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (caller, session_id) = session_params(req)?;
    let store = SqliteSessionStore::new(conn);
    delete_session(&store, &caller, &session_id)?;
    Ok(json!({ "deleted": session_id }))
}

fn teacher_query(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let params: QueryParams = parse_params(req)?;
    let caller = params.caller.validated()?;
    let settings = query_settings(conn).map_err(settings_err)?;
    let store = SqliteSessionStore::new(conn);
    let view = teacher_view(&store, &caller, &params.filters, &settings)?;
    to_result(&view)
}

fn student_query(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let params: QueryParams = parse_params(req)?;
    let caller = params.caller.validated()?;
    let settings = query_settings(conn).map_err(settings_err)?;
    let store = SqliteSessionStore::new(conn);
    let view = student_view(&store, &caller, &params.filters, &settings)?;
    to_result(&view)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sessions.get" => get(state, req),
        "sessions.delete" => delete(state, req),
        "sessions.teacherQuery" => teacher_query(state, req),
        "sessions.studentQuery" => student_query(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
