use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Line written when a request could not be parsed at all.
pub fn bad_json(message: impl Into<String>) -> serde_json::Value {
    json!({
        "ok": false,
        "error": {
            "code": "bad_json",
            "message": message.into(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_omitted_when_absent() {
        let resp = err("8", "not_found", "session x", None);
        assert_eq!(resp["id"], "8");
        assert_eq!(resp["ok"], false);
        assert!(resp["error"].get("details").is_none());

        let resp = err("9", "schema_error", "missing", Some(json!({ "missing": ["status"] })));
        assert_eq!(resp["error"]["details"]["missing"][0], "status");
        assert_eq!(bad_json("eof")["error"]["code"], "bad_json");
    }
}
