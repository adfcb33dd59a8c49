//! Global template functions

use minijinja::{Error, ErrorKind, State, Value};
use std::cell::Cell;

/// Nesting limit for `tpl` within a single render
const MAX_TPL_DEPTH: usize = 10;


/// Context variables forwarded to `tpl` when no explicit context is given
const CONTEXT_VARIABLES: [&str; 6] = [
    "Values",
    "Release",
    "Chart",
    "Capabilities",
    "Template",
    "Files",
];

thread_local! {
    // Nested renders get a fresh State, so depth is tracked per thread
    static TPL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// `{{ fail("replicas must be positive") }}`
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// `{{ dict("app", Chart.Name, "tier", "web") }}`
pub fn dict(args: Vec<Value>) -> Result<Value, Error> {
    if !args.len().is_multiple_of(2) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        let value = serde_json::to_value(&pair[1])
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        map.insert(key.to_string(), value);
    }

    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

/// `{{ list(1, 2, 3) }}`
pub fn list(args: Vec<Value>) -> Value {
    Value::from(args)
}

/// First argument that is neither undefined, none, nor an empty string
pub fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && arg.as_str().is_none_or(|s| !s.is_empty())
        })
        .unwrap_or(Value::UNDEFINED)
}

/// `{{ ternary("on", "off", Values.enabled) }}`
pub fn ternary(when_true: Value, when_false: Value, condition: Value) -> Value {
    if condition.is_true() { when_true } else { when_false }
}

/// Render a string as a template
///
/// Without an explicit context the caller's `Values`, `Release`, `Chart`,
/// `Capabilities`, `Template` and `Files` are forwarded.
pub fn tpl(state: &State, template: String, context: Option<Value>) -> Result<String, Error> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template);
    }

    let depth = TPL_DEPTH.with(|d| {
        d.set(d.get() + 1);
        d.get()
    });

    let result = if depth > MAX_TPL_DEPTH {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!(
                "tpl nesting exceeded {} levels; a value probably references itself",
                MAX_TPL_DEPTH
            ),
        ))
    } else {
        let context = context.unwrap_or_else(|| forwarded_context(state));
        state.env().render_str(&template, context).map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("tpl error (depth {}): {}", depth, e),
            )
        })
    };

    TPL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    result
}

fn forwarded_context(state: &State) -> Value {
    let mut ctx = serde_json::Map::new();
    for name in CONTEXT_VARIABLES {
        if let Some(value) = state.lookup(name).filter(|v| !v.is_undefined())
            && let Ok(json) = serde_json::to_value(&value)
        {
            ctx.insert(name.to_string(), json);
        }
    }
    Value::from_serialize(serde_json::Value::Object(ctx))
}

/// Cluster lookups are not available while rendering; always an empty map
pub fn lookup(api_version: String, kind: String, namespace: String, name: String) -> Value {
    tracing::debug!(%api_version, %kind, %namespace, %name, "lookup() returns empty during render");
    Value::from_serialize(serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::{Environment, context};

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        env.add_function("dict", dict);
        env.add_function("list", list);
        env.add_function("coalesce", coalesce);
        env.add_function("ternary", ternary);
        env.add_function("tpl", tpl);
        env.add_function("fail", fail);
        env.add_function("lookup", lookup);
        env.add_filter("toJson", crate::filters::to_json_filter);
        env
    }

    #[test]
    fn test_dict_and_list() {
        let out = env()
            .render_str("{{ dict('a', 1, 'b', list(2, 3)) | toJson }}", ())
            .unwrap();
        assert_eq!(out, r#"{"a":1,"b":[2,3]}"#);

        assert!(env().render_str("{{ dict('a') }}", ()).is_err());
    }

    #[test]
    fn test_coalesce_and_ternary() {
        let out = env()
            .render_str("{{ coalesce(none, '', 'x') }}-{{ ternary('y', 'n', false) }}", ())
            .unwrap();
        assert_eq!(out, "x-n");
    }

    #[test]
    fn test_tpl_forwards_context() {
        let out = env()
            .render_str(
                "{{ tpl(Values.greeting) }}",
                context! { Values => context! { greeting => "hi {{ Values.name }}", name => "web" } },
            )
            .unwrap();
        assert_eq!(out, "hi web");
    }

    #[test]
    fn test_tpl_depth_limit() {
        let err = env()
            .render_str(
                "{{ tpl(Values.loop) }}",
                context! { Values => context! { loop => "{{ tpl(Values.loop) }}" } },
            )
            .unwrap_err();
        assert!(format!("{:#}", err).contains("nesting exceeded"));
    }

    #[test]
    fn test_fail_and_lookup() {
        assert!(env().render_str("{{ fail('boom') }}", ()).is_err());
        let out = env()
            .render_str("{{ lookup('v1', 'Secret', 'ns', 'x') | length }}", ())
            .unwrap();
        assert_eq!(out, "0");
    }
}
