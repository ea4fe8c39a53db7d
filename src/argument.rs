use crate::context::Context;
use crate::error::{StateError, ERROR_CODE_REQUEST_INVALID};
use crate::model::{Argument, ArgumentSource};
use serde_json::{Map, Value};
use std::sync::Arc;

// Backend-side type names used by generic invocation.
pub const CLASS_STRING: &str = "java.lang.String";
pub const CLASS_LONG: &str = "java.lang.Long";
pub const CLASS_DOUBLE: &str = "java.lang.Double";
pub const CLASS_BOOLEAN: &str = "java.lang.Boolean";
pub const CLASS_MAP: &str = "java.util.Map";
pub const CLASS_LIST: &str = "java.util.List";

/// Pluggable raw-value lookup: `(spec, context) -> raw value`, held in the
/// extension registry. `Ok(None)` means the request carries no value for the
/// spec.
pub type ArgumentLookup =
    Arc<dyn Fn(&Argument, &Context) -> Result<Option<Value>, StateError> + Send + Sync>;

/// Default lookup: read by source kind and key from the parsed request.
pub fn default_lookup() -> ArgumentLookup {
    Arc::new(|arg, ctx| Ok(lookup_raw(arg, ctx)))
}

fn lookup_raw(arg: &Argument, ctx: &Context) -> Option<Value> {
    let key = arg.lookup_key();
    let req = ctx.request();
    match arg.source {
        ArgumentSource::Query => req.query.get(key).map(|s| Value::from(s.clone())),
        ArgumentSource::Path => req.path_params.get(key).map(|s| Value::from(s.clone())),
        ArgumentSource::Form => req.form.get(key).map(|s| Value::from(s.clone())),
        ArgumentSource::Header => req.header(key).map(Value::from),
        ArgumentSource::Cookie => req.cookies.get(key).map(|s| Value::from(s.clone())),
        ArgumentSource::Attribute => ctx.attribute(key),
        ArgumentSource::Body => req.body.clone(),
        ArgumentSource::Auto => req
            .path_params
            .get(key)
            .or_else(|| req.query.get(key))
            .or_else(|| req.form.get(key))
            .map(|s| Value::from(s.clone()))
            .or_else(|| req.header(key).map(Value::from))
            .or_else(|| ctx.attribute(key)),
    }
}

/// Resolve an endpoint's argument list into parallel `(classes, values)`
/// vectors for generic invocation.
pub fn resolve_arguments(
    lookup: &ArgumentLookup,
    arguments: &[Argument],
    ctx: &Context,
) -> Result<(Vec<String>, Vec<Value>), StateError> {
    let mut classes = Vec::with_capacity(arguments.len());
    let mut values = Vec::with_capacity(arguments.len());
    for arg in arguments {
        let (class, value) = resolve_one(lookup, arg, ctx)?;
        classes.push(class);
        values.push(value);
    }
    Ok((classes, values))
}

fn resolve_one(
    lookup: &ArgumentLookup,
    arg: &Argument,
    ctx: &Context,
) -> Result<(String, Value), StateError> {
    // Structured arguments resolve their children into an object.
    if !arg.fields.is_empty() {
        let mut object = Map::with_capacity(arg.fields.len());
        for field in &arg.fields {
            let (_, value) = resolve_one(lookup, field, ctx)?;
            object.insert(field.name.clone(), value);
        }
        let class = if arg.class.is_empty() {
            CLASS_MAP.to_string()
        } else {
            arg.class.clone()
        };
        return Ok((class, Value::Object(object)));
    }

    match (lookup)(arg, ctx)? {
        Some(raw) => {
            let class = if arg.class.is_empty() {
                infer_class(&raw).to_string()
            } else {
                arg.class.clone()
            };
            let value = coerce(&class, raw).map_err(|reason| {
                StateError::new(
                    400,
                    ERROR_CODE_REQUEST_INVALID,
                    format!("REQUEST:ARGUMENTS:{}", arg.name),
                )
                .with_internal(anyhow::anyhow!(reason))
            })?;
            Ok((class, value))
        }
        None if arg.required => Err(StateError::new(
            400,
            ERROR_CODE_REQUEST_INVALID,
            format!("REQUEST:ARGUMENTS:{}", arg.name),
        )),
        None => {
            let class = if arg.class.is_empty() {
                CLASS_STRING.to_string()
            } else {
                arg.class.clone()
            };
            Ok((class.clone(), zero_value(&class)))
        }
    }
}

/// Pick a backend type for an undeclared argument from the shape of its raw
/// value. Strings are probed: integer, then float, then boolean.
pub fn infer_class(raw: &Value) -> &'static str {
    match raw {
        Value::Bool(_) => CLASS_BOOLEAN,
        Value::Number(n) if n.is_i64() || n.is_u64() => CLASS_LONG,
        Value::Number(_) => CLASS_DOUBLE,
        Value::Object(_) => CLASS_MAP,
        Value::Array(_) => CLASS_LIST,
        Value::String(s) => {
            if s.parse::<i64>().is_ok() {
                CLASS_LONG
            } else if s.parse::<f64>().is_ok() {
                CLASS_DOUBLE
            } else if s.parse::<bool>().is_ok() {
                CLASS_BOOLEAN
            } else {
                CLASS_STRING
            }
        }
        Value::Null => CLASS_STRING,
    }
}

/// Convert a raw looked-up value into the declared class. Fails with a
/// human-readable reason on mismatch.
pub fn coerce(class: &str, raw: Value) -> Result<Value, String> {
    match class {
        CLASS_STRING => Ok(match raw {
            Value::String(s) => Value::from(s),
            other => Value::from(other.to_string()),
        }),
        CLASS_LONG | "java.lang.Integer" | "java.lang.Short" => match raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("`{s}` is not an integer")),
            other => Err(format!("cannot coerce {other} to {class}")),
        },
        CLASS_DOUBLE | "java.lang.Float" => match raw {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("`{s}` is not a number")),
            other => Err(format!("cannot coerce {other} to {class}")),
        },
        CLASS_BOOLEAN => match raw {
            Value::Bool(b) => Ok(Value::from(b)),
            Value::String(s) => s
                .parse::<bool>()
                .map(Value::from)
                .map_err(|_| format!("`{s}` is not a boolean")),
            other => Err(format!("cannot coerce {other} to {class}")),
        },
        CLASS_MAP => match raw {
            Value::Object(m) => Ok(Value::Object(m)),
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .ok()
                .filter(Value::is_object)
                .ok_or_else(|| format!("`{s}` is not a JSON object")),
            other => Err(format!("cannot coerce {other} to {class}")),
        },
        CLASS_LIST => match raw {
            Value::Array(a) => Ok(Value::Array(a)),
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .ok()
                .filter(Value::is_array)
                .ok_or_else(|| format!("`{s}` is not a JSON array")),
            other => Err(format!("cannot coerce {other} to {class}")),
        },
        // Unknown backend classes pass the raw value through untouched.
        _ => Ok(raw),
    }
}

fn zero_value(class: &str) -> Value {
    match class {
        CLASS_LONG | "java.lang.Integer" | "java.lang.Short" => Value::from(0),
        CLASS_DOUBLE | "java.lang.Float" => Value::from(0.0),
        CLASS_BOOLEAN => Value::from(false),
        CLASS_MAP => Value::Object(Map::new()),
        CLASS_LIST => Value::Array(Vec::new()),
        _ => Value::from(""),
    }
}
