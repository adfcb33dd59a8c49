//! Helm-compatible template filters
//!
//! Registered under Helm's function names so chart authors can carry their
//! habits over: `{{ Values.labels | toYaml | nindent(4) }}`.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};
use semver::{Version, VersionReq};
use sha2::{Digest, Sha256};

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| invalid(e.to_string()))
}

/// `{{ Values.resources | toYaml }}`
pub fn to_yaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// `{{ Values.config | toJson }}`
pub fn to_json_filter(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))
}

/// `{{ Values.password | b64enc }}`
pub fn b64enc(value: Value) -> String {
    base64::engine::general_purpose::STANDARD.encode(display(&value).as_bytes())
}

/// `{{ encoded | b64dec }}`
pub fn b64dec(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

/// `{{ Values.name | quote }}`
pub fn quote(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return "\"\"".to_string();
    }
    format!(
        "\"{}\"",
        display(&value).replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// `{{ Values.name | squote }}`
pub fn squote(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return "''".to_string();
    }
    format!("'{}'", display(&value).replace('\'', "''"))
}

/// Newline followed by the indented text
///
/// `{{ Values.labels | toYaml | nindent(4) }}`
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// `{{ Values.script | indent(2) }}`
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fail rendering when the value is missing or empty
///
/// `{{ Values.image.repository | required("image.repository is required") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);

    if missing {
        Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ))
    } else {
        Ok(value)
    }
}

/// `{{ name | trunc(63) }}`
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

/// `{{ name | trimPrefix("v") }}`
pub fn trim_prefix(value: String, prefix: String) -> String {
    value
        .strip_prefix(prefix.as_str())
        .map(String::from)
        .unwrap_or(value)
}

/// `{{ name | trimSuffix("-") }}`
pub fn trim_suffix(value: String, suffix: String) -> String {
    value
        .strip_suffix(suffix.as_str())
        .map(String::from)
        .unwrap_or(value)
}

/// `{{ Values.config | toJson | sha256sum }}`
pub fn sha256sum(value: String) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Helm's `semverCompare`, with the version piped in
///
/// `{% if Capabilities.KubeVersion.Version | semverCompare(">=1.25.0-0") %}`
pub fn semver_compare(version: Value, constraint: String) -> Result<bool, Error> {
    let raw = version
        .as_str()
        .ok_or_else(|| invalid("version must be a string"))?;

    let parsed = parse_loose_version(raw)
        .ok_or_else(|| invalid(format!("invalid version '{}'", raw)))?;

    // Kubernetes-style "-0" suffixes opt pre-releases in; semver's
    // comparators already order pre-releases below the release.
    let req = VersionReq::parse(constraint.trim())
        .or_else(|_| VersionReq::parse(constraint.trim().trim_end_matches("-0")))
        .map_err(|e| invalid(format!("invalid constraint '{}': {}", constraint, e)))?;

    Ok(req.matches(&parsed) || req.matches(&Version::new(parsed.major, parsed.minor, parsed.patch)))
}

fn parse_loose_version(raw: &str) -> Option<Version> {
    let clean = raw.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(clean) {
        return Some(v);
    }

    let core = clean.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

fn display(value: &Value) -> String {
    value
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| value.to_string())
}
