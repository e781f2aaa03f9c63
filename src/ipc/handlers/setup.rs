use crate::db;
use crate::gateway::QuerySettings;
use crate::ingest::{DuplicatePolicy, IngestSettings, DEFAULT_MAX_ROWS, DEFAULT_MAX_UPLOAD_BYTES};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::upload::DecodeLimits;
use serde_json::{json, Map, Value};
use tracing::info;

const MIN_UPLOAD_BYTES: i64 = 1024;
const MAX_UPLOAD_BYTES: i64 = 50 * 1024 * 1024;
const MAX_ROWS_CEILING: i64 = 20_000;

#[derive(Clone, Copy)]
enum SetupSection {
    Upload,
    Queries,
    Ingest,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Upload, Self::Queries, Self::Ingest];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "queries" => Some(Self::Queries),
            "ingest" => Some(Self::Ingest),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Queries => "queries",
            Self::Ingest => "ingest",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Upload => "setup.upload",
            Self::Queries => "setup.queries",
            Self::Ingest => "setup.ingest",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Upload => json!({
            "maxUploadBytes": DEFAULT_MAX_UPLOAD_BYTES,
            "maxRows": DEFAULT_MAX_ROWS
        }),
        SetupSection::Queries => json!({
            "academicYearFallback": true
        }),
        SetupSection::Ingest => json!({
            "duplicatePolicy": "warn"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Upload => match k.as_str() {
                "maxUploadBytes" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, MIN_UPLOAD_BYTES, MAX_UPLOAD_BYTES)?),
                    );
                }
                "maxRows" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, MAX_ROWS_CEILING)?));
                }
                _ => return Err(format!("unknown upload field: {}", k)),
            },
            SetupSection::Queries => match k.as_str() {
                "academicYearFallback" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown queries field: {}", k)),
            },
            SetupSection::Ingest => match k.as_str() {
                "duplicatePolicy" => {
                    let p = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if DuplicatePolicy::parse(&p).is_none() {
                        return Err("duplicatePolicy must be one of: warn, reject".into());
                    }
                    obj.insert(k.clone(), Value::String(p));
                }
                _ => return Err(format!("unknown ingest field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

/// Upload ceilings and the repeated-meeting policy, as currently configured.
pub fn ingest_settings(conn: &rusqlite::Connection) -> anyhow::Result<IngestSettings> {
    let upload = load_section(conn, SetupSection::Upload)?;
    let ingest = load_section(conn, SetupSection::Ingest)?;
    let defaults = IngestSettings::default();
    Ok(IngestSettings {
        limits: DecodeLimits {
            max_upload_bytes: upload["maxUploadBytes"]
                .as_u64()
                .unwrap_or(defaults.limits.max_upload_bytes),
            max_rows: upload["maxRows"]
                .as_u64()
                .map(|n| n as usize)
                .unwrap_or(defaults.limits.max_rows),
        },
        duplicate_policy: ingest["duplicatePolicy"]
            .as_str()
            .and_then(DuplicatePolicy::parse)
            .unwrap_or(defaults.duplicate_policy),
    })
}

pub fn query_settings(conn: &rusqlite::Connection) -> anyhow::Result<QuerySettings> {
    let queries = load_section(conn, SetupSection::Queries)?;
    Ok(QuerySettings {
        academic_year_fallback: queries["academicYearFallback"].as_bool().unwrap_or(true),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut result = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                result.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(result))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
