use axum::{body::Body, http::Request, http::StatusCode};
use tower::ServiceExt;

#[tokio::test]
async fn livez_healthy_and_approvals_require_auth() {
    let state = sophia_api::test_state("test-key");
    let app = sophia_api::create_router(state);

    let livez_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/livez")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(livez_response.status(), StatusCode::OK);

    let unauthorized = app
        .oneshot(
            Request::builder()
                .uri("/api/approvals")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn candidates_accept_the_configured_api_key() {
    let state = sophia_api::test_state("test-key");
    let app = sophia_api::create_router(state);

    // A bad key must be rejected before the handler touches the database.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/candidates")
                .header("x-api-key", "wrong-key")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
