//! Template engine based on MiniJinja

use minijinja::{Environment, UndefinedBehavior, Value};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::functions;

/// Directory holding a chart's manifest templates
pub const TEMPLATES_DIR: &str = "templates/";

const NOTES_FILE: &str = "NOTES.txt";

/// Result of rendering one chart's templates
#[derive(Debug, Default)]
pub struct RenderedTemplates {
    /// Non-empty manifests keyed by path relative to the chart root
    pub manifests: BTreeMap<String, String>,
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a configured MiniJinja environment
    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.strict_mode {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });

        env.add_filter("toYaml", filters::to_yaml);
        env.add_filter("toJson", filters::to_json_filter);
        env.add_filter("b64enc", filters::b64enc);
        env.add_filter("b64dec", filters::b64dec);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimPrefix", filters::trim_prefix);
        env.add_filter("trimSuffix", filters::trim_suffix);
        env.add_filter("sha256sum", filters::sha256sum);
        env.add_filter("semverCompare", filters::semver_compare);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tpl", functions::tpl);
        env.add_function("lookup", functions::lookup);

        env
    }

    /// Render a single template string
    pub fn render_string(&self, source: &str, context: &Value, name: &str) -> Result<String> {
        let env = self.create_environment();
        env.render_named_str(name, source, context)
            .map_err(|e| EngineError::Template(TemplateError::from_minijinja(e, name, source)))
    }

    /// Render every template of one chart
    ///
    /// `templates` is keyed by path relative to the chart root
    /// (`templates/deployment.yaml`). Inside the environment templates are
    /// named relative to `templates/`, so `{% import "_helpers.tpl" as h %}`
    /// works. `shared` templates are registered under their given names
    /// without being rendered. `context_for` builds the context for each
    /// rendered path.
    pub fn render_templates<F>(
        &self,
        templates: &BTreeMap<String, String>,
        shared: &BTreeMap<String, String>,
        context_for: F,
    ) -> Result<RenderedTemplates>
    where
        F: Fn(&str) -> Value,
    {
        let mut env = self.create_environment();

        for (name, source) in shared {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;
        }

        for (path, source) in templates {
            env.add_template_owned(env_name(path).to_string(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, path, source))?;
        }

        let mut result = RenderedTemplates::default();

        for (path, source) in templates {
            let name = env_name(path);
            if is_helper(name) || name == NOTES_FILE {
                continue;
            }

            let tmpl = env
                .get_template(name)
                .map_err(|e| TemplateError::from_minijinja(e, path, source))?;
            let rendered = tmpl
                .render(context_for(path))
                .map_err(|e| TemplateError::from_minijinja(e, path, source))?;

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                tracing::debug!(template = %path, "skipping empty output");
                continue;
            }

            result.manifests.insert(path.clone(), rendered);
        }

        Ok(result)
    }
}

/// Name of a chart template inside the environment
pub fn env_name(path: &str) -> &str {
    path.strip_prefix(TEMPLATES_DIR).unwrap_or(path)
}

/// Helper files start with `_` and never produce output
fn is_helper(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|file| file.starts_with('_'))
}
