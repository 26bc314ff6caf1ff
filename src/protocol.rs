use serde_json::{json, Map, Value};

use crate::error::ParseError;

pub const JNAP_PATH: &str = "/JNAP/";
pub const ACTION_HEADER: &str = "X-JNAP-Action";
pub const GET_ATTRIBUTES: &str = "GetAttributes";

const RESULT_OK: &str = "OK";

/// `GetAttributes` payload. An empty name list asks for every variable.
pub fn get_attributes_payload(names: &[&str]) -> Value {
    if names.is_empty() {
        json!({})
    } else {
        json!({ "waspVarNames": names })
    }
}

/// Extract `(name, value)` pairs from a `GetAttributes` response.
///
/// Accepts the `{"result", "output": {"vars": [...]}}` envelope and the flat
/// object form. Nested objects in the flat form prefix their keys with the
/// parent key, so `{"C1_T1": {"rh": 45}}` yields `C1_T1_rh`.
pub fn parse_attributes(body: &Value) -> Result<Vec<(String, Value)>, ParseError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ParseError(format!("expected object, got {}", type_name(body))))?;

    if let Some(result) = obj.get("result") {
        let result = result
            .as_str()
            .ok_or_else(|| ParseError("result is not a string".to_string()))?;
        if result != RESULT_OK {
            return Err(ParseError(format!("controller returned result {result}")));
        }
        let vars = body
            .pointer("/output/vars")
            .ok_or_else(|| ParseError("missing output.vars".to_string()))?;
        return parse_var_list(vars);
    }

    let mut out = Vec::new();
    flatten(obj, "", &mut out);
    Ok(out)
}

fn parse_var_list(vars: &Value) -> Result<Vec<(String, Value)>, ParseError> {
    let Value::Array(entries) = vars else {
        return Err(ParseError("output.vars is not an array".to_string()));
    };
    entries
        .iter()
        .map(|entry| {
            let name = entry
                .get("waspVarName")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ParseError("var entry without waspVarName".to_string()))?;
            let value = entry.get("waspVarValue").cloned().unwrap_or(Value::Null);
            Ok((name.to_string(), value))
        })
        .collect()
}

fn flatten(obj: &Map<String, Value>, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten(inner, &name, out),
            other => out.push((name, other.clone())),
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_structure() {
        assert_eq!(get_attributes_payload(&[]), json!({}));
        let p = get_attributes_payload(&["C1_T1_rh", "sys_heat_cool_mode"]);
        assert_eq!(p["waspVarNames"][1], "sys_heat_cool_mode");
    }

    #[test]
    fn parse_envelope_vars() {
        let body = json!({
            "result": "OK",
            "output": {"vars": [
                {"waspVarName": "C1_T1_rh", "waspVarValue": "45"},
                {"waspVarName": "sys_pump_management", "waspVarValue": "1"}
            ]}
        });
        let vars = parse_attributes(&body).unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0], ("C1_T1_rh".to_string(), json!("45")));
    }

    #[test]
    fn parse_envelope_rejects_error_result() {
        let body = json!({"result": "ErrorUnauthorized"});
        assert!(parse_attributes(&body).is_err());
    }

    #[test]
    fn parse_envelope_requires_vars() {
        assert!(parse_attributes(&json!({"result": "OK", "output": {}})).is_err());
        assert!(parse_attributes(&json!({"result": "OK", "output": {"vars": {}}})).is_err());
        let body = json!({"result": "OK", "output": {"vars": [{"waspVarValue": "1"}]}});
        assert!(parse_attributes(&body).is_err());
    }

    #[test]
    fn parse_flat_and_grouped() {
        let body = json!({
            "C1_average_room_temperature": "215",
            "C1_T2": {"stat_demand_led": 0}
        });
        let vars = parse_attributes(&body).unwrap();
        assert!(vars.contains(&("C1_average_room_temperature".to_string(), json!("215"))));
        assert!(vars.contains(&("C1_T2_stat_demand_led".to_string(), json!(0))));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_attributes(&json!([1, 2])).is_err());
        assert!(parse_attributes(&Value::Null).is_err());
    }
}
