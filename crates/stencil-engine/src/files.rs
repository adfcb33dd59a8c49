//! `Files` object exposed to templates
//!
//! ```jinja2
//! {{ Files.Get("config/nginx.conf") | nindent(4) }}
//! {% if Files.Exists("config/extra.yaml") %}...{% endif %}
//! {% for line in Files.Lines("hosts.txt") %}- {{ line }}{% endfor %}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind, State};

/// Auxiliary chart files, keyed by path relative to the chart root
#[derive(Debug, Default)]
pub struct FilesObject {
    files: BTreeMap<String, Vec<u8>>,
}

impl FilesObject {
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    fn read(&self, path: &str) -> Result<&[u8], Error> {
        self.files
            .get(path.trim_start_matches("./"))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("file '{}' not found in chart", path),
                )
            })
    }
}

impl Object for FilesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let path = path_arg(method, args)?;

        match method {
            "Get" => {
                let bytes = self.read(&path)?;
                Ok(Value::from(String::from_utf8_lossy(bytes).into_owned()))
            }
            "GetBytes" => Ok(Value::from(self.read(&path)?.to_vec())),
            "Lines" => {
                let content = String::from_utf8_lossy(self.read(&path)?).into_owned();
                Ok(Value::from(
                    content.lines().map(String::from).collect::<Vec<_>>(),
                ))
            }
            "Exists" => Ok(Value::from(
                self.files.contains_key(path.trim_start_matches("./")),
            )),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!(
                    "Files has no method '{}'; available: Get, GetBytes, Lines, Exists",
                    method
                ),
            )),
        }
    }
}

fn path_arg(method: &str, args: &[Value]) -> Result<String, Error> {
    match args {
        [path] => path.as_str().map(String::from).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("Files.{} expects a string path", method),
            )
        }),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("Files.{} takes exactly one argument", method),
        )),
    }
}
