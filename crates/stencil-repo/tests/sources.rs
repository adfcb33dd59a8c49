//! Chart repository and OCI registry loading against a mock HTTP server

use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use stencil_core::{SourceType, StencilConfig, TemplateRef, sha256_digest};
use stencil_repo::oci::media_types;
use stencil_repo::{
    CacheKey, Credentials, NoCredentials, RepoError, SourceContext, StaticCredentials,
    TemplateService, classify,
};
use tar::{Builder, Header};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tgz(root: &str, entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, content) in entries {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", root, name), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn web_chart(version: &str) -> Vec<u8> {
    tgz(
        "web",
        &[
            ("Chart.yaml", &format!("apiVersion: v2\nname: web\nversion: {}\n", version)),
            ("values.yaml", "replicas: 2\n"),
            (
                "values.schema.json",
                r#"{"type":"object","properties":{"port":{"type":"integer","default":8080}}}"#,
            ),
            ("templates/deployment.yaml", "kind: Deployment\n"),
        ],
    )
}

fn service() -> TemplateService {
    TemplateService::new(
        SourceContext::new(StencilConfig::default()).with_credentials(Arc::new(NoCredentials)),
    )
}

fn helm_ref(url: &str, chart: &str, version: &str) -> TemplateRef {
    TemplateRef {
        url: url.to_string(),
        path: chart.to_string(),
        version: version.to_string(),
        source_type: Some(SourceType::Helm),
        ..Default::default()
    }
}

/// Serve `index.yaml` and the archives it lists
async fn chart_repo(charts: &[(&str, &str, Vec<u8>)]) -> MockServer {
    let server = MockServer::start().await;

    let mut index = String::from("apiVersion: v1\nentries:\n");
    let mut names: Vec<&str> = charts.iter().map(|(n, _, _)| *n).collect();
    names.dedup();
    for name in names {
        index.push_str(&format!("  {}:\n", name));
        for (n, version, archive) in charts.iter().filter(|(n, _, _)| *n == name) {
            index.push_str(&format!(
                "    - name: {}\n      version: {}\n      urls: [{}-{}.tgz]\n      digest: {}\n",
                n,
                version,
                n,
                version,
                sha256_digest(archive)
            ));
        }
    }

    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;

    for (name, version, archive) in charts {
        Mock::given(method("GET"))
            .and(path(format!("/{}-{}.tgz", name, version)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
            .mount(&server)
            .await;
    }

    server
}

#[tokio::test]
async fn test_chart_repository_resolves_highest_match() {
    let server = chart_repo(&[
        ("web", "1.0.0", web_chart("1.0.0")),
        ("web", "1.2.0", web_chart("1.2.0")),
        ("web", "2.0.0", web_chart("2.0.0")),
    ])
    .await;
    let service = service();
    let r = helm_ref(&server.uri(), "web", "^1.0.0");

    let resolved = service.resolve(&r).await.unwrap();
    assert_eq!(resolved.resolved_version.as_deref(), Some("1.2.0"));

    let template = service.get_template(&r).await.unwrap();
    assert_eq!(template.name, "web");
    assert_eq!(template.version().as_deref(), Some("1.2.0"));
    assert!(template.templates.contains_key("templates/deployment.yaml"));

    let values = service.get_initial_values(&r).await.unwrap();
    assert_eq!(values.get("replicas"), Some(&serde_json::json!(2)));
    assert_eq!(values.get("port"), Some(&serde_json::json!(8080)));
}

#[tokio::test]
async fn test_unmatched_range_is_version_not_found() {
    let server = chart_repo(&[
        ("web", "1.0.0", web_chart("1.0.0")),
        ("web", "1.2.0", web_chart("1.2.0")),
    ])
    .await;

    let err = service()
        .get_template(&helm_ref(&server.uri(), "web", "2.x"))
        .await
        .unwrap_err();

    match err {
        RepoError::VersionNotFound { available, .. } => assert_eq!(available, "1.2.0, 1.0.0"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cache_hit_skips_download() {
    let server = MockServer::start().await;
    let archive = web_chart("1.0.0");
    let index = format!(
        "entries:\n  web:\n    - name: web\n      version: 1.0.0\n      urls: [web-1.0.0.tgz]\n      digest: {}\n",
        sha256_digest(&archive)
    );

    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let service = service();
    let r = helm_ref(&server.uri(), "web", "1.0.0");

    let first = service.get_template(&r).await.unwrap();
    let second = service.get_template(&r).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let key = CacheKey::new(server.uri(), "web", "1.0.0", SourceType::Helm);
    assert!(service.cache().get_template(&key).is_some());
}

#[tokio::test]
async fn test_digest_mismatch_is_rejected() {
    let server = MockServer::start().await;
    let index = "entries:\n  web:\n    - name: web\n      version: 1.0.0\n      urls: [web-1.0.0.tgz]\n      digest: 0000\n";

    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(web_chart("1.0.0")))
        .mount(&server)
        .await;

    let service = service();
    let r = helm_ref(&server.uri(), "web", "1.0.0");
    let err = service.get_template(&r).await.unwrap_err();

    assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
    assert!(service.cache().is_empty());
}

#[tokio::test]
async fn test_archive_without_templates_is_malformed() {
    let broken = tgz("web", &[("Chart.yaml", "name: web\nversion: 1.0.0\n")]);
    let server = chart_repo(&[("web", "1.0.0", broken)]).await;

    let err = service()
        .get_template(&helm_ref(&server.uri(), "web", "1.0.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::MalformedArtifact { .. }));
    assert!(err.hint().is_some());
}

#[tokio::test]
async fn test_credentials_sent_for_matching_prefix() {
    let server = MockServer::start().await;
    let archive = web_chart("1.0.0");

    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "entries:\n  web:\n    - name: web\n      version: 1.0.0\n      urls: [web-1.0.0.tgz]\n      digest: {}\n",
            sha256_digest(&archive)
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let r = helm_ref(&server.uri(), "web", "1.0.0");

    let err = service().get_template(&r).await.unwrap_err();
    assert!(matches!(err, RepoError::AuthRequired { .. }));

    let credentials = StaticCredentials::new().with(&server.uri(), Credentials::basic("user", "pass"));
    let authed = TemplateService::new(
        SourceContext::new(StencilConfig::default()).with_credentials(Arc::new(credentials)),
    );
    let template = authed.get_template(&r).await.unwrap();
    assert_eq!(template.name, "web");
}

#[tokio::test]
async fn test_remote_dependency_assembled_and_cached() {
    let server = MockServer::start().await;

    let app = tgz(
        "app",
        &[
            (
                "Chart.yaml",
                &format!(
                    "name: app\nversion: 1.0.0\ndependencies:\n  - name: db\n    version: ^1.0.0\n    repository: {}\n    condition: db.enabled\n",
                    server.uri()
                ),
            ),
            ("templates/cm.yaml", "kind: ConfigMap\n"),
        ],
    );
    let db = tgz(
        "db",
        &[
            ("Chart.yaml", "name: db\nversion: 1.1.0\n"),
            ("templates/sts.yaml", "kind: StatefulSet\n"),
        ],
    );

    let index = format!(
        "entries:\n  app:\n    - {{name: app, version: 1.0.0, urls: [app-1.0.0.tgz], digest: {}}}\n  db:\n    - {{name: db, version: 1.1.0, urls: [db-1.1.0.tgz], digest: {}}}\n",
        sha256_digest(&app),
        sha256_digest(&db)
    );
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(app))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/db-1.1.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(db))
        .mount(&server)
        .await;

    let service = service();
    let template = service
        .get_template(&helm_ref(&server.uri(), "app", "1.0.0"))
        .await
        .unwrap();

    assert_eq!(template.dependencies.len(), 1);
    let dep = &template.dependencies[0];
    assert_eq!(dep.name, "db");
    assert_eq!(dep.condition.as_deref(), Some("db.enabled"));
    assert_eq!(dep.template.version().as_deref(), Some("1.1.0"));

    let key = CacheKey::new(server.uri(), "db", "1.1.0", SourceType::Helm);
    assert!(service.cache().get_template(&key).is_some());
}

#[tokio::test]
async fn test_unresolvable_remote_dependency_names_parent() {
    let server = MockServer::start().await;

    let app = tgz(
        "app",
        &[
            (
                "Chart.yaml",
                &format!(
                    "name: app\nversion: 1.0.0\ndependencies:\n  - name: db\n    version: ^9.0.0\n    repository: {}\n",
                    server.uri()
                ),
            ),
            ("templates/cm.yaml", "kind: ConfigMap\n"),
        ],
    );
    let db = tgz(
        "db",
        &[
            ("Chart.yaml", "name: db\nversion: 1.0.0\n"),
            ("templates/sts.yaml", "kind: StatefulSet\n"),
        ],
    );

    let index = format!(
        "entries:\n  app:\n    - {{name: app, version: 1.0.0, urls: [app-1.0.0.tgz], digest: {}}}\n  db:\n    - {{name: db, version: 1.0.0, urls: [db-1.0.0.tgz], digest: {}}}\n",
        sha256_digest(&app),
        sha256_digest(&db)
    );
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app-1.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(app))
        .mount(&server)
        .await;

    let err = service()
        .get_template(&helm_ref(&server.uri(), "app", "1.0.0"))
        .await
        .unwrap_err();

    match err {
        RepoError::DependencyResolution { chart, message } => {
            assert_eq!(chart, "app");
            assert!(message.contains("db"), "{message}");
            assert!(message.contains("^9.0.0"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_oci_exact_version_skips_tag_listing() {
    let server = MockServer::start().await;
    let registry = server.uri().trim_start_matches("http://").to_string();

    Mock::given(method("GET"))
        .and(path("/v2/charts/web/tags/list"))
        .respond_with(ResponseTemplate::new(403))
        .expect(0)
        .mount(&server)
        .await;

    let service = service();
    let r = TemplateRef {
        url: format!("oci://{}/charts", registry),
        path: "web".into(),
        version: "1.2.0".into(),
        ..Default::default()
    };

    let resolved = service.resolve(&r).await.unwrap();
    assert_eq!(resolved.source_type, Some(SourceType::Oci));
    assert_eq!(resolved.resolved_version.as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_classify_probes_chart_repository() {
    let server = chart_repo(&[("web", "1.0.0", web_chart("1.0.0"))]).await;
    let service = service();

    let r = TemplateRef {
        url: server.uri(),
        path: "web".into(),
        ..Default::default()
    };
    assert_eq!(classify(&r, service.context()).await.unwrap(), SourceType::Helm);

    let unreachable = TemplateRef {
        url: "http://127.0.0.1:1".into(),
        path: "web".into(),
        ..Default::default()
    };
    let err = classify(&unreachable, service.context()).await.unwrap_err();
    assert!(matches!(err, RepoError::SourceUnreachable { .. }));
}

#[tokio::test]
async fn test_oci_pull_with_token_challenge() {
    let server = MockServer::start().await;
    let registry = server.uri().trim_start_matches("http://").to_string();
    let archive = web_chart("1.2.0");
    let layer_digest = format!("sha256:{}", sha256_digest(&archive));

    let challenge = format!(
        r#"Bearer realm="{}/token",service="registry.test",scope="repository:charts/web:pull""#,
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "registry.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "s3cret"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/charts/web/tags/list"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"name": "charts/web", "tags": ["1.0.0", "1.2.0", "2.0.0", "latest"]}),
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/charts/web/manifests/1.2.0"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", "sha256:feed")
                .set_body_json(serde_json::json!({
                    "schemaVersion": 2,
                    "mediaType": media_types::OCI_MANIFEST,
                    "config": {
                        "mediaType": "application/vnd.cncf.helm.config.v1+json",
                        "digest": "sha256:cafe",
                        "size": 2
                    },
                    "layers": [{
                        "mediaType": media_types::HELM_CONTENT,
                        "digest": layer_digest,
                        "size": archive.len()
                    }]
                })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/charts/web/blobs/{}", layer_digest)))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()))
        .with_priority(10)
        .mount(&server)
        .await;

    let service = service();
    let r = TemplateRef {
        url: format!("oci://{}/charts", registry),
        path: "web".into(),
        version: "^1.0.0".into(),
        ..Default::default()
    };

    let resolved = service.resolve(&r).await.unwrap();
    assert_eq!(resolved.source_type, Some(SourceType::Oci));
    assert_eq!(resolved.resolved_version.as_deref(), Some("1.2.0"));

    let template = service.get_template(&r).await.unwrap();
    assert_eq!(template.name, "web");
    assert_eq!(template.version().as_deref(), Some("1.2.0"));
}
