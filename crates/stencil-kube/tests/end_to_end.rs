//! Module reconciliation from a git source into the in-memory cluster

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use stencil_core::{Module, ReconciliationState, StencilConfig, split_documents};
use stencil_kube::{ClusterContext, InMemoryStatusWriter, MockCluster, Reconciler};
use stencil_repo::{SourceContext, TemplateService};

const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ Release.Name }}
  labels:
    app: {{ Release.Name }}
spec:
  replicas: {{ Values.replicas }}
  selector:
    matchLabels:
      app: {{ Release.Name }}
  template:
    metadata:
      labels:
        app: {{ Release.Name }}
    spec:
      containers:
        - name: web
          image: "{{ Values.image }}"
"#;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=stencil", "-c", "user.email=stencil@example.com"])
        .args(args)
        .status()
        .expect("git is installed");
    assert!(status.success(), "git {:?} failed", args);
}

/// Git repository holding a `charts/web` chart, served over `file://`
fn chart_repository(dir: &Path) -> String {
    let chart = dir.join("charts/web");
    std::fs::create_dir_all(chart.join("templates")).unwrap();
    std::fs::write(chart.join("Chart.yaml"), "name: web\nversion: 1.0.0\n").unwrap();
    std::fs::write(chart.join("values.yaml"), "replicas: 1\nimage: nginx:1.27\n").unwrap();
    std::fs::write(chart.join("templates/deployment.yaml"), DEPLOYMENT).unwrap();

    git(dir, &["init", "--quiet"]);
    git(dir, &["config", "uploadpack.allowAnySHA1InWant", "true"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "--quiet", "-m", "web chart"]);

    format!("file://{}", dir.display())
}

fn module(url: &str, replicas: u32) -> Module {
    Module::from_yaml(&format!(
        "name: web\nnamespace: stencil\nspec:\n  templateRef:\n    url: {url}\n    path: charts/web\n    sourceType: git\n  targetNamespace: apps\n  values:\n    replicas: {replicas}\n"
    ))
    .unwrap()
}

fn reconciler(mock: Arc<MockCluster>, statuses: Arc<InMemoryStatusWriter>) -> Reconciler {
    let templates = TemplateService::new(SourceContext::new(StencilConfig::default()));
    let config = StencilConfig::default();
    Reconciler::new(
        templates,
        stencil_engine::RenderEngine::new(
            &config.render,
            stencil_core::Capabilities::new("v1.31.0", &config.render.templating_version),
        ),
        ClusterContext::from_cluster(mock),
        statuses,
        config.apply,
    )
}

#[tokio::test]
async fn test_git_module_applied_then_updated() {
    let repo = tempfile::tempdir().unwrap();
    let url = chart_repository(repo.path());

    let mock = Arc::new(MockCluster::new());
    let statuses = Arc::new(InMemoryStatusWriter::new());
    let reconciler = reconciler(mock.clone(), statuses.clone());

    let first = module(&url, 2);
    let status = reconciler.reconcile(&first).await.unwrap();
    assert_eq!(status.reconciliation_status.state, ReconciliationState::Succeeded);
    let commit = status.resolved_version.clone().unwrap();
    assert_eq!(commit.len(), 40);

    let deployments = mock.objects_of_kind("Deployment");
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].data["spec"]["replicas"], 2);
    assert_eq!(deployments[0].metadata.namespace.as_deref(), Some("apps"));

    let mut second = module(&url, 3);
    second.status = status;
    let (_, manifest) = reconciler.render(&second).await.unwrap();
    let documents = split_documents(&manifest);
    assert_eq!(documents.len(), 1);
    assert!(documents[0].contains("kind: Deployment"));

    let status = reconciler.reconcile(&second).await.unwrap();
    assert_eq!(status.resolved_version.as_deref(), Some(commit.as_str()));

    let deployments = mock.objects_of_kind("Deployment");
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].data["spec"]["replicas"], 3);

    let counts = mock.operation_counts();
    assert_eq!(counts.creates, 1);
    assert_eq!(counts.updates, 1);
    assert_eq!(counts.deletes, 0);

    assert_eq!(statuses.get("stencil", "web"), Some(status));
}

#[tokio::test]
async fn test_missing_repository_records_failure() {
    let repo = tempfile::tempdir().unwrap();
    let url = format!("file://{}", repo.path().join("absent").display());

    let mock = Arc::new(MockCluster::new());
    let statuses = Arc::new(InMemoryStatusWriter::new());
    let reconciler = reconciler(mock.clone(), statuses.clone());

    let err = reconciler.reconcile(&module(&url, 1)).await.unwrap_err();

    let recorded = statuses.get("stencil", "web").unwrap();
    assert_eq!(recorded.reconciliation_status.state, ReconciliationState::Failed);
    assert_eq!(recorded.reconciliation_status.reason, err.to_string());
    assert!(mock.objects_of_kind("Deployment").is_empty());
}
