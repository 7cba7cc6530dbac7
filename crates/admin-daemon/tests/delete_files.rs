use std::{sync::Arc, time::Duration};

use admin_daemon::auth::UNAUTHORIZED_MESSAGE;
use admin_daemon::server::{build_router, AppState};
use admin_store::mock::{MemoryDeployer, MemoryObjectStore, MemoryRepository};
use admin_store::ContentLayout;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::Service;

const EDITOR: &str = "gho_editor";
const OUTSIDER: &str = "gho_outsider";

struct Harness {
    router: Router,
    repo: MemoryRepository,
    objects: MemoryObjectStore,
}

fn harness() -> Harness {
    let repo = MemoryRepository::new();
    repo.add_collaborator(EDITOR, "editor");
    repo.add_user(OUTSIDER, "outsider");
    let objects = MemoryObjectStore::new("atlas-files");

    let state = Arc::new(AppState::new(
        Arc::new(repo.clone()),
        Arc::new(objects.clone()),
        Arc::new(MemoryDeployer::new()),
        ContentLayout::default(),
        Duration::from_secs(900),
    ));
    Harness {
        router: build_router(state),
        repo,
        objects,
    }
}

fn files_param(names: &[&str]) -> String {
    let encoded = serde_json::to_string(names).expect("names");
    urlencoding::encode(&encoded).into_owned()
}

async fn delete(
    harness: &mut Harness,
    token: Option<&str>,
    names: &[&str],
    is_public: Option<&str>,
) -> (StatusCode, Vec<u8>) {
    let mut uri = format!("/api/v1/files/delete?files={}", files_param(names));
    if let Some(flag) = is_public {
        uri.push_str("&isPublic=");
        uri.push_str(flag);
    }

    let mut builder = Request::builder().method("DELETE").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    let response = harness
        .router
        .call(builder.body(Body::empty()).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

#[tokio::test]
async fn non_collaborator_gets_fixed_401_whatever_the_payload() {
    let mut h = harness();
    h.objects.add_object("pfiles/a.png", vec![1]);

    for token in [None, Some(OUTSIDER), Some("gho_unknown")] {
        let (status, body) = delete(&mut h, token, &["a.png"], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, UNAUTHORIZED_MESSAGE.as_bytes());
    }

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/files/delete?files=%7Bbroken")
        .header("authorization", OUTSIDER)
        .body(Body::empty())
        .expect("request");
    let response = h.router.call(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(h.objects.exists("pfiles/a.png"));
    assert!(h.objects.delete_requests().is_empty());
}

async fn delete_raw(harness: &mut Harness, token: &str, query: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/files/delete?{query}"))
        .header("authorization", token)
        .body(Body::empty())
        .expect("request");
    let response = harness.router.call(request).await.expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

#[tokio::test]
async fn unparseable_query_string_is_checked_after_the_gate() {
    let mut h = harness();
    h.objects.add_object("pfiles/a", vec![1]);
    let files = files_param(&["a"]);
    let queries = [
        format!("files={files}&files={}", files_param(&["b"])),
        format!("files={files}&isPublic=true&isPublic=false"),
    ];

    for query in &queries {
        let (status, body) = delete_raw(&mut h, OUTSIDER, query).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{query}");
        assert_eq!(body, UNAUTHORIZED_MESSAGE.as_bytes());

        let (status, _) = delete_raw(&mut h, EDITOR, query).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
    }

    assert!(h.objects.exists("pfiles/a"));
    assert!(h.objects.delete_requests().is_empty());
}

#[tokio::test]
async fn names_outside_the_namespace_are_rejected() {
    let mut h = harness();
    h.objects.add_object("pfiles/", Vec::new());
    h.objects.add_object("files/x", vec![1]);

    for names in [&[""][..], &["/etc"], &["../files/x"]] {
        let (status, _) = delete(&mut h, Some(EDITOR), names, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{names:?}");
    }

    assert!(h.objects.exists("pfiles/"));
    assert!(h.objects.exists("files/x"));
    assert!(h.objects.delete_requests().is_empty());
}

#[tokio::test]
async fn repository_outage_is_reported_as_unauthorized() {
    let mut h = harness();
    h.repo.set_unreachable(true);

    let (status, body) = delete(&mut h, Some(EDITOR), &["a.png"], Some("true")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, UNAUTHORIZED_MESSAGE.as_bytes());
}

#[tokio::test]
async fn collaborator_deletes_existing_files() {
    let mut h = harness();
    h.objects.add_object("pfiles/a.png", vec![1]);
    h.objects.add_object("pfiles/tiles/z1.pbf", vec![2]);
    h.objects.add_object("pfiles/keep.png", vec![3]);

    let (status, body) = delete(&mut h, Some(EDITOR), &["a.png", "tiles/z1.pbf"], None).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());
    assert_eq!(h.objects.keys(), vec!["pfiles/keep.png"]);
}

#[tokio::test]
async fn visibility_flag_selects_prefix() {
    let mut h = harness();
    for flag in ["true", "TRUE", "True"] {
        h.objects.add_object("files/a.png", vec![1]);
        h.objects.add_object("pfiles/a.png", vec![1]);

        let (status, _) = delete(&mut h, Some(EDITOR), &["a.png"], Some(flag)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!h.objects.exists("files/a.png"), "isPublic={flag}");
        assert!(h.objects.exists("pfiles/a.png"), "isPublic={flag}");
    }

    for flag in [None, Some("false"), Some("yes"), Some("1")] {
        h.objects.add_object("files/a.png", vec![1]);
        h.objects.add_object("pfiles/a.png", vec![1]);

        let (status, _) = delete(&mut h, Some(EDITOR), &["a.png"], flag).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(h.objects.exists("files/a.png"), "isPublic={flag:?}");
        assert!(!h.objects.exists("pfiles/a.png"), "isPublic={flag:?}");
    }
}

#[tokio::test]
async fn partial_failure_returns_store_records_in_order() {
    let mut h = harness();
    for name in ["a.png", "b.png", "c.png", "d.png"] {
        h.objects.add_object(format!("files/{name}"), vec![1]);
    }
    h.objects.deny_delete("files/d.png");
    h.objects.deny_delete("files/b.png");

    let (status, body) = delete(
        &mut h,
        Some(EDITOR),
        &["a.png", "b.png", "c.png", "d.png"],
        Some("true"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    let records: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(
        records,
        json!([
            {"Key": "files/b.png", "Code": "AccessDenied", "Message": "Access Denied"},
            {"Key": "files/d.png", "Code": "AccessDenied", "Message": "Access Denied"}
        ])
    );
    assert!(!h.objects.exists("files/a.png"));
    assert!(!h.objects.exists("files/c.png"));
    assert!(h.objects.exists("files/b.png"));
    assert!(h.objects.exists("files/d.png"));
}

#[tokio::test]
async fn nonexistent_files_count_as_deleted() {
    let mut h = harness();

    let (status, body) = delete(&mut h, Some(EDITOR), &["ghost.png", "phantom.png"], None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn transport_failure_surfaces_raw_error() {
    let mut h = harness();
    h.objects.add_object("pfiles/a.png", vec![1]);
    h.objects.fail_transport("dispatch failure: connection refused");

    let (status, body) = delete(&mut h, Some(EDITOR), &["a.png"], None).await;

    assert!(![
        StatusCode::UNAUTHORIZED,
        StatusCode::NOT_ACCEPTABLE,
        StatusCode::CREATED
    ]
    .contains(&status));
    let error: Value = serde_json::from_slice(&body).expect("json");
    assert!(error["error"]
        .as_str()
        .expect("error text")
        .contains("connection refused"));
    assert!(h.objects.exists("pfiles/a.png"));
}

#[tokio::test]
async fn duplicate_names_behave_like_one() {
    let mut h = harness();
    h.objects.add_object("files/a.png", vec![1]);

    let (status, body) = delete(&mut h, Some(EDITOR), &["a.png", "a.png"], Some("true")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());
    assert!(!h.objects.exists("files/a.png"));
}

#[tokio::test]
async fn each_request_issues_one_bulk_call_and_one_membership_check() {
    let mut h = harness();
    let names = ["a.png", "b.png", "c.png"];
    for name in names {
        h.objects.add_object(format!("pfiles/{name}"), vec![1]);
    }

    delete(&mut h, Some(EDITOR), &names, None).await;
    delete(&mut h, Some(EDITOR), &names, None).await;

    assert_eq!(
        h.objects.delete_requests(),
        vec![
            vec!["pfiles/a.png", "pfiles/b.png", "pfiles/c.png"],
            vec!["pfiles/a.png", "pfiles/b.png", "pfiles/c.png"],
        ]
    );
    assert_eq!(h.repo.collaborator_checks(), 2);
}
