//! API request recording and validation.
//!
//! Request bodies observed during a case are matched against the case's
//! `apiUrls` (recorded as shape descriptors) and `validateApiUrls` (checked
//! against the previously recorded descriptor).

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::driver::{CapturedRequest, SchemaValidator, Validation};
use crate::model::{CaseLog, TestCase};

/// Structural shape validator.
///
/// Descriptors are a small JSON-Schema subset: `type` plus `properties` for
/// objects and `items` for arrays. Extra properties in a body are allowed;
/// missing ones are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeValidator;

impl ShapeValidator {
    fn check(&self, schema: &Value, body: &Value, path: &str) -> Result<(), String> {
        let Some(expected) = schema.get("type").and_then(Value::as_str) else {
            return Ok(());
        };
        let actual = type_name(body);
        if expected != actual {
            return Err(format!("{}: expected {}, found {}", path, expected, actual));
        }
        match body {
            Value::Object(fields) => {
                if let Some(Value::Object(properties)) = schema.get("properties") {
                    for (name, sub) in properties {
                        let child = format!("{}.{}", path, name);
                        match fields.get(name) {
                            Some(value) => self.check(sub, value, &child)?,
                            None => return Err(format!("{}: missing property", child)),
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(sub) = schema.get("items") {
                    for (i, item) in items.iter().enumerate() {
                        self.check(sub, item, &format!("{}[{}]", path, i))?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl SchemaValidator for ShapeValidator {
    fn derive(&self, sample: &Value) -> Value {
        match sample {
            Value::Object(fields) => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.derive(v)))
                    .collect();
                json!({"type": "object", "properties": properties})
            }
            Value::Array(items) => match items.first() {
                Some(first) => json!({"type": "array", "items": self.derive(first)}),
                None => json!({"type": "array"}),
            },
            other => json!({"type": type_name(other)}),
        }
    }

    fn validate(&self, schema: &Value, body: &Value) -> Validation {
        match self.check(schema, body, "$") {
            Ok(()) => Validation::ok(),
            Err(reason) => Validation::fail(reason),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Recorded shapes and validation failures for one case
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiOutcome {
    pub records: BTreeMap<String, Value>,
    pub failures: Vec<String>,
}

impl ApiOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn process_requests(
    case: &TestCase,
    requests: &[CapturedRequest],
    prior: Option<&BTreeMap<String, Value>>,
    validator: &dyn SchemaValidator,
    log: &mut CaseLog,
) -> ApiOutcome {
    let mut outcome = ApiOutcome::default();

    for pattern in &case.api_urls {
        match with_body(requests, pattern).next() {
            Some((request, body)) => {
                log.push(format!("api: recorded {} {}", request.method, pattern));
                outcome.records.insert(pattern.clone(), validator.derive(body));
            }
            None => log.push(format!("api: no request body observed for {}", pattern)),
        }
    }

    for pattern in &case.validate_api_urls {
        let Some(schema) = prior.and_then(|p| p.get(pattern)) else {
            log.push(format!("api: no recorded shape for {}, skipping validation", pattern));
            continue;
        };
        let mut seen = false;
        for (request, body) in with_body(requests, pattern) {
            seen = true;
            let result = validator.validate(schema, body);
            if result.ok {
                log.push(format!("api: {} {} matches recorded shape", request.method, request.url));
            } else {
                let reason = result.reason.unwrap_or_else(|| "shape mismatch".to_string());
                log.push(format!("api: {} {} invalid: {}", request.method, request.url, reason));
                outcome.failures.push(format!("{}: {}", pattern, reason));
            }
        }
        if !seen {
            outcome
                .failures
                .push(format!("{}: no request observed", pattern));
        }
    }

    outcome
}

/// Requests whose URL contains `pattern` and that carried a body
fn with_body<'a>(
    requests: &'a [CapturedRequest],
    pattern: &'a str,
) -> impl Iterator<Item = (&'a CapturedRequest, &'a Value)> + 'a {
    requests
        .iter()
        .filter(move |r| r.url.contains(pattern))
        .filter_map(|r| r.body.as_ref().map(|body| (r, body)))
}
