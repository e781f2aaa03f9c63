use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::ingest::{ingest_upload, preview_upload, upload_template, IngestSettings, UploadRequest};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::ingest_settings;
use crate::ipc::helpers::{parse_params, require_db, settings_err, to_result, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Caller, ClassInfo, TimeSlot};
use crate::store::SqliteSessionStore;
use crate::upload::{read_upload_source, UploadFile, UploadSource};

const TEMPLATE_FILE_NAME: &str = "attendance-template.csv";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileParams {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadParams {
    caller: Caller,
    class_info: ClassInfo,
    date: NaiveDate,
    time_slot: TimeSlot,
    file: FileParams,
}

fn upload_source(file: &FileParams) -> Result<UploadSource, HandlerErr> {
    let path = file
        .file_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (path, file.content_base64.as_deref()) {
        (Some(p), None) => Ok(UploadSource::Path(PathBuf::from(p))),
        (None, Some(b64)) => Ok(UploadSource::Base64(b64.to_string())),
        (Some(_), Some(_)) => Err(HandlerErr::new(
            "bad_params",
            "file takes filePath or contentBase64, not both",
        )),
        (None, None) => Err(HandlerErr::new(
            "bad_params",
            "file.filePath or file.contentBase64 is required",
        )),
    }
}

/// Reads the payload named by the params. A path upload without an explicit
/// fileName takes the name from the path.
fn upload_request(req: &Request, settings: &IngestSettings) -> Result<UploadRequest, HandlerErr> {
    let params: UploadParams = parse_params(req)?;
    let source = upload_source(&params.file)?;
    let bytes = read_upload_source(&source, settings.limits.max_upload_bytes)?;
    let file_name = params.file.file_name.clone().or_else(|| match &source {
        UploadSource::Path(p) => p.file_name().map(|n| n.to_string_lossy().to_string()),
        UploadSource::Base64(_) => None,
    });
    Ok(UploadRequest {
        caller: params.caller,
        class_info: params.class_info,
        date: params.date,
        time_slot: params.time_slot,
        file: UploadFile {
            file_name,
            mime_type: params.file.mime_type,
            bytes,
        },
    })
}

fn upload(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = ingest_settings(conn).map_err(settings_err)?;
    let upload = upload_request(req, &settings)?;
    let store = SqliteSessionStore::new(conn);
    let outcome = ingest_upload(&store, &upload, &settings)?;
    to_result(&outcome)
}

fn preview(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = ingest_settings(conn).map_err(settings_err)?;
    let upload = upload_request(req, &settings)?;
    let outcome = preview_upload(&upload, &settings)?;
    to_result(&outcome)
}

fn template() -> serde_json::Value {
    json!({
        "fileName": TEMPLATE_FILE_NAME,
        "mimeType": "text/csv",
        "content": upload_template(),
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.upload" => upload(state, req),
        "attendance.preview" => preview(state, req),
        "attendance.template" => Ok(template()),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
