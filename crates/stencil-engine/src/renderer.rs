//! Module manifest rendering
//!
//! Two paths share one entry point: charts are rendered template by template
//! with dependencies attached according to their conditions, and CRD-backed
//! templates produce a single custom resource carrying the module's values.

use minijinja::{Value, context};
use std::collections::BTreeMap;

use stencil_core::config::RenderConfig;
use stencil_core::{
    Capabilities, ChartInfo, CrdTarget, Module, ReleaseInfo, SourceType, Template, Values,
    ValuesValidator, condition_holds,
};

use crate::engine::{Engine, env_name};
use crate::error::{EngineError, Result};
use crate::files::FilesObject;

/// Renders a module's template into a multi-document manifest
#[derive(Debug, Clone)]
pub struct RenderEngine {
    engine: Engine,
    capabilities: Capabilities,
}

impl RenderEngine {
    pub fn new(config: &RenderConfig, capabilities: Capabilities) -> Self {
        Self {
            engine: Engine::builder().strict(config.strict).build(),
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Render the manifest for `module` from its loaded `template`
    ///
    /// Chart output is ordered by source path, each document preceded by a
    /// `# Source:` comment. Rendering the same inputs twice yields identical
    /// text.
    pub fn render_manifest(&self, module: &Module, template: &Template) -> Result<String> {
        if let Some(target) = &template.crd_target {
            return render_custom_resource(module, target);
        }
        if module.spec.template_ref.source_type == Some(SourceType::Crd) {
            return Err(EngineError::MissingCrdTarget {
                name: template.name.clone(),
            });
        }

        let release = ReleaseInfo::new(&module.name, module.effective_namespace());
        let values = Values::layered(
            template.schema.defaults(),
            &template.default_values,
            &module.spec.values,
        );

        let mut manifests = BTreeMap::new();
        self.render_chart(
            template,
            &template.name,
            &values,
            &values,
            &release,
            &mut manifests,
        )?;

        tracing::debug!(
            module = %module.name,
            chart = %template.name,
            documents = manifests.len(),
            "rendered chart"
        );

        Ok(join_manifests(&manifests))
    }

    /// Render one chart and, recursively, its enabled dependencies
    ///
    /// Output keys are prefixed with `prefix`, which is the chart name for
    /// the root and `<parent>/charts/<dependency>` below it. Conditions are
    /// evaluated against the root chart's values.
    fn render_chart(
        &self,
        chart: &Template,
        prefix: &str,
        values: &Values,
        root: &Values,
        release: &ReleaseInfo,
        out: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        if let Some(raw) = &chart.raw_schema {
            let violations = ValuesValidator::new(raw)?.validate(values);
            if !violations.is_empty() {
                return Err(EngineError::SchemaViolation {
                    chart: prefix.to_string(),
                    violations,
                });
            }
        }

        let is_library = chart.metadata.as_ref().is_some_and(|m| m.is_library());
        if !is_library {
            let chart_info = chart
                .metadata
                .as_ref()
                .map(ChartInfo::from)
                .unwrap_or_else(|| ChartInfo {
                    name: chart.name.clone(),
                    version: String::new(),
                    app_version: None,
                    description: None,
                });

            let base = context! {
                Values => values.inner(),
                Release => release,
                Chart => chart_info,
                Capabilities => &self.capabilities,
                Files => Value::from_object(FilesObject::new(chart.files.clone())),
            };

            let rendered = self.engine.render_templates(
                &chart.templates,
                &dependency_helpers(chart),
                |path| {
                    context! {
                        Template => context! {
                            Name => format!("{}/{}", prefix, path),
                            BasePath => format!("{}/templates", prefix),
                        },
                        ..base.clone()
                    }
                },
            )?;

            for (path, content) in rendered.manifests {
                out.insert(format!("{}/{}", prefix, path), content);
            }
        }

        for dep in &chart.dependencies {
            if !condition_holds(dep.condition.as_deref(), root) {
                tracing::debug!(
                    chart = %prefix,
                    dependency = %dep.name,
                    condition = ?dep.condition,
                    "dependency disabled"
                );
                continue;
            }

            let dep_values = Values::for_dependency(&dep.template.initial_values(), values, &dep.name);
            self.render_chart(
                &dep.template,
                &format!("{}/charts/{}", prefix, dep.name),
                &dep_values,
                root,
                release,
                out,
            )?;
        }

        Ok(())
    }
}

/// Helper files of direct dependencies, importable as `charts/<dep>/<file>`
fn dependency_helpers(chart: &Template) -> BTreeMap<String, String> {
    chart
        .dependencies
        .iter()
        .flat_map(|dep| {
            dep.template.templates.iter().filter_map(move |(path, source)| {
                let name = env_name(path);
                let file = name.rsplit('/').next().unwrap_or(name);
                file.starts_with('_')
                    .then(|| (format!("charts/{}/{}", dep.name, name), source.clone()))
            })
        })
        .collect()
}

fn join_manifests(manifests: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, content) in manifests {
        out.push_str("---\n# Source: ");
        out.push_str(path);
        out.push('\n');
        out.push_str(content.trim_start_matches('\n').trim_end());
        out.push('\n');
    }
    out
}

/// Single custom resource for CRD-backed templates
fn render_custom_resource(module: &Module, target: &CrdTarget) -> Result<String> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("name".into(), module.name.clone().into());
    if target.namespaced {
        metadata.insert("namespace".into(), module.effective_namespace().into());
    }

    let document = serde_json::json!({
        "apiVersion": target.api_version(),
        "kind": target.kind,
        "metadata": metadata,
        "spec": module.spec.values.inner(),
    });

    Ok(serde_yaml::to_string(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stencil_core::{ChartFiles, FileMap, TemplateDependency};

    fn chart(entries: &[(&str, &str)]) -> Template {
        let files: FileMap = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        Template::from_chart_files(&ChartFiles::partition(files).unwrap(), "test").unwrap()
    }

    fn module(yaml: &str) -> Module {
        Module::from_yaml(yaml).unwrap()
    }

    fn renderer() -> RenderEngine {
        RenderEngine::new(
            &RenderConfig::default(),
            Capabilities::new("v1.31.0", "v3.14.0"),
        )
    }

    fn web_chart() -> Template {
        chart(&[
            ("Chart.yaml", "name: web\nversion: 1.0.0\n"),
            ("values.yaml", "replicas: 1\n"),
            (
                "templates/service.yaml",
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: {{ Release.Name }}\n  namespace: {{ Release.Namespace }}\n",
            ),
            (
                "templates/deployment.yaml",
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ Release.Name }}\nspec:\n  replicas: {{ Values.replicas }}\n",
            ),
        ])
    }

    fn web_module() -> Module {
        module(
            "name: web\nspec:\n  templateRef:\n    url: https://charts.example.com\n    path: web\n  targetNamespace: prod\n  values:\n    replicas: 2\n",
        )
    }

    fn sub_chart() -> Arc<Template> {
        Arc::new(chart(&[
            ("Chart.yaml", "name: sub\nversion: 0.1.0\n"),
            ("values.yaml", "port: 6379\n"),
            (
                "templates/cm.yaml",
                "kind: ConfigMap\nport: {{ Values.port }}\nregion: {{ Values.global.region }}\n",
            ),
        ]))
    }

    fn with_sub(condition: Option<&str>) -> Template {
        let mut parent = web_chart();
        parent.dependencies.push(TemplateDependency {
            name: "sub".to_string(),
            condition: condition.map(String::from),
            template: sub_chart(),
        });
        parent
    }

    #[test]
    fn test_render_chart_in_path_order() {
        let manifest = renderer()
            .render_manifest(&web_module(), &web_chart())
            .unwrap();

        insta::assert_snapshot!(manifest, @r"
        ---
        # Source: web/templates/deployment.yaml
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: web
        spec:
          replicas: 2
        ---
        # Source: web/templates/service.yaml
        apiVersion: v1
        kind: Service
        metadata:
          name: web
          namespace: prod
        ");
    }

    #[test]
    fn test_render_is_deterministic() {
        let engine = renderer();
        let template = with_sub(None);
        let module = module(
            "name: web\nspec:\n  templateRef:\n    url: u\n  values:\n    global:\n      region: eu\n",
        );

        let first = engine.render_manifest(&module, &template).unwrap();
        let second = engine.render_manifest(&module, &template).unwrap();

        assert_eq!(first, second);
        let dep = first.find("web/charts/sub/templates/cm.yaml").unwrap();
        let own = first.find("web/templates/deployment.yaml").unwrap();
        assert!(dep < own);
    }

    #[test]
    fn test_dependency_condition() {
        let engine = renderer();
        let template = with_sub(Some("sub.enabled"));
        let render = |values: &str| {
            let m = module(&format!(
                "name: web\nspec:\n  templateRef:\n    url: u\n  values:\n{}",
                values
            ));
            engine.render_manifest(&m, &template).unwrap()
        };

        let enabled = render("    global:\n      region: eu\n    sub:\n      enabled: true\n      port: 7000\n");
        assert!(enabled.contains("# Source: web/charts/sub/templates/cm.yaml"));
        assert!(enabled.contains("port: 7000"));
        assert!(enabled.contains("region: eu"));

        let disabled = render("    sub:\n      enabled: false\n");
        assert!(!disabled.contains("charts/sub"));

        let missing = render("    replicas: 3\n");
        assert!(!missing.contains("charts/sub"));

        let not_bool = render("    sub:\n      enabled: \"yes\"\n");
        assert!(!not_bool.contains("charts/sub"));
    }

    #[test]
    fn test_dependency_helpers_importable() {
        let library = Arc::new(chart(&[
            ("Chart.yaml", "name: common\nversion: 1.0.0\ntype: library\n"),
            (
                "templates/_labels.tpl",
                "{% macro labels(name) %}app: {{ name }}{% endmacro %}",
            ),
        ]));
        let mut parent = chart(&[
            ("Chart.yaml", "name: web\nversion: 1.0.0\n"),
            (
                "templates/cm.yaml",
                "{% import 'charts/common/_labels.tpl' as common %}kind: ConfigMap\nmetadata:\n  labels:\n    {{ common.labels(Release.Name) }}\n",
            ),
        ]);
        parent.dependencies.push(TemplateDependency {
            name: "common".to_string(),
            condition: None,
            template: library,
        });

        let manifest = renderer().render_manifest(&web_module(), &parent).unwrap();

        assert!(manifest.contains("    app: web"));
        assert!(!manifest.contains("charts/common/templates"));
    }

    #[test]
    fn test_schema_violation() {
        let template = chart(&[
            ("Chart.yaml", "name: web\nversion: 1.0.0\n"),
            (
                "values.schema.json",
                r#"{"type":"object","properties":{"replicas":{"type":"integer","minimum":1}}}"#,
            ),
            ("templates/a.yaml", "replicas: {{ Values.replicas }}"),
        ]);
        let m = module("name: web\nspec:\n  templateRef:\n    url: u\n  values:\n    replicas: 0\n");

        let err = renderer().render_manifest(&m, &template).unwrap_err();

        match err {
            EngineError::SchemaViolation { chart, violations } => {
                assert_eq!(chart, "web");
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, "/replicas");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_exposes_chart_and_capabilities() {
        let template = chart(&[
            ("Chart.yaml", "name: web\nversion: 1.2.3\nappVersion: \"4.5\"\n"),
            ("config/app.conf", "level=debug\n"),
            (
                "templates/a.yaml",
                "chart: {{ Chart.Name }}-{{ Chart.Version }}\nkube: {{ Capabilities.KubeVersion.Minor }}\nself: {{ Template.Name }}\nconf: {{ Files.Get('config/app.conf') | trim }}\n",
            ),
        ]);

        let manifest = renderer().render_manifest(&web_module(), &template).unwrap();

        assert!(manifest.contains("chart: web-1.2.3"));
        assert!(manifest.contains("kube: 31"));
        assert!(manifest.contains("self: web/templates/a.yaml"));
        assert!(manifest.contains("conf: level=debug"));
    }

    #[test]
    fn test_render_error_propagates() {
        let template = chart(&[
            ("Chart.yaml", "name: web\nversion: 1.0.0\n"),
            ("templates/a.yaml", "image: {{ Values.image.repository }}"),
        ]);

        let err = renderer()
            .render_manifest(&web_module(), &template)
            .unwrap_err();

        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_crd_path() {
        let template = Template {
            name: "widgets.example.com".to_string(),
            crd_target: Some(CrdTarget {
                name: "widgets.example.com".to_string(),
                group: "example.com".to_string(),
                version: "v1".to_string(),
                kind: "Widget".to_string(),
                plural: "widgets".to_string(),
                namespaced: true,
            }),
            ..Default::default()
        };
        let m = module(
            "name: w1\nspec:\n  templateRef:\n    sourceType: crd\n    crdName: widgets.example.com\n  targetNamespace: apps\n  values:\n    size: 3\n",
        );

        let manifest = renderer().render_manifest(&m, &template).unwrap();
        let doc: serde_json::Value = serde_yaml::from_str(&manifest).unwrap();

        assert_eq!(doc["apiVersion"], "example.com/v1");
        assert_eq!(doc["kind"], "Widget");
        assert_eq!(doc["metadata"]["name"], "w1");
        assert_eq!(doc["metadata"]["namespace"], "apps");
        assert_eq!(doc["spec"]["size"], 3);
    }

    #[test]
    fn test_crd_source_without_target() {
        let m = module("name: w1\nspec:\n  templateRef:\n    sourceType: crd\n    crdName: x\n");

        let err = renderer()
            .render_manifest(&m, &Template::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::MissingCrdTarget { .. }));
    }
}
