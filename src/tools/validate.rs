//! 参数校验：按工具声明的 JSON Schema 检查调用参数（jsonschema）
//!
//! schema 在注册时编译一次并随工具缓存；调度时只做校验。全部违规一次性报告，以 "; " 连接。

use serde_json::Value;

use crate::core::AgentError;

/// 编译后的参数 schema
pub struct ParamValidator {
    inner: jsonschema::Validator,
}

impl ParamValidator {
    /// 编译 schema；schema 本身不合法时返回 ParamValidation
    pub fn compile(schema: &Value) -> Result<Self, AgentError> {
        let inner = jsonschema::Validator::new(schema)
            .map_err(|e| AgentError::ParamValidation(format!("invalid parameter schema: {e}")))?;
        Ok(Self { inner })
    }

    pub fn validate(&self, params: &Value) -> Result<(), AgentError> {
        if self.inner.is_valid(params) {
            return Ok(());
        }
        let errors: Vec<String> = self.inner.iter_errors(params).map(|e| e.to_string()).collect();
        Err(AgentError::ParamValidation(errors.join("; ")))
    }
}

impl std::fmt::Debug for ParamValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamValidator").finish_non_exhaustive()
    }
}

/// 一次性校验（不缓存）；注册表内的调度走 ParamValidator
pub fn validate_params(params: &Value, schema: &Value) -> Result<(), AgentError> {
    ParamValidator::compile(schema)?.validate(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"},
                "mode": {"type": "string", "enum": ["read", "write"]},
                "tags": {"type": ["array", "null"]}
            },
            "required": ["path", "mode"]
        })
    }

    fn message(err: AgentError) -> String {
        match err {
            AgentError::ParamValidation(m) => m,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_accepts_valid_params() {
        assert!(validate_params(&json!({"path": "a.txt", "mode": "read", "limit": 3}), &schema()).is_ok());
        assert!(validate_params(&json!({"path": "a", "mode": "write", "tags": null}), &schema()).is_ok());
        assert!(validate_params(&json!({"path": "a", "mode": "read", "extra": 1}), &schema()).is_ok());
    }

    #[test]
    fn test_reports_all_missing_required() {
        let msg = message(validate_params(&json!({}), &schema()).unwrap_err());
        assert!(msg.contains("\"path\""), "{msg}");
        assert!(msg.contains("\"mode\""), "{msg}");
    }

    #[test]
    fn test_type_and_enum_mismatch() {
        assert!(validate_params(&json!({"path": 1, "mode": "read"}), &schema()).is_err());
        assert!(validate_params(&json!({"path": "a", "mode": "read", "limit": 1.5}), &schema()).is_err());
        assert!(validate_params(&json!({"path": "a", "mode": "delete"}), &schema()).is_err());
        assert!(validate_params(&json!("not an object"), &schema()).is_err());
    }

    #[test]
    fn test_closed_schema_rejects_unknown_keys() {
        let s = json!({"type": "object", "properties": {"a": {"type": "string"}}, "additionalProperties": false});
        assert!(validate_params(&json!({"a": "x"}), &s).is_ok());
        assert!(validate_params(&json!({"b": "x"}), &s).is_err());
    }

    #[test]
    fn test_numeric_bounds_nested_required_and_items() {
        let s = json!({
            "type": "object",
            "properties": {
                "n": {"type": "integer", "minimum": 1},
                "opts": {"type": "object", "required": ["k"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        });
        let v = ParamValidator::compile(&s).unwrap();
        assert!(v.validate(&json!({"n": 1, "opts": {"k": 0}, "tags": ["a"]})).is_ok());
        assert!(v.validate(&json!({"n": -5})).is_err());
        assert!(message(v.validate(&json!({"n": 1, "opts": {}})).unwrap_err()).contains("\"k\""));
        assert!(v.validate(&json!({"tags": [1, 2]})).is_err());
    }

    #[test]
    fn test_invalid_schema_fails_to_compile() {
        let err = ParamValidator::compile(&json!({"type": "no-such-type"})).unwrap_err();
        assert!(message(err).starts_with("invalid parameter schema"));
    }
}
