//! End-to-end tests driving the router in-process.

#![cfg(test)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{AppState, create_router};
use crate::access::AccessChecker;
use crate::auth::{AccessClaims, AuthService, REFRESH_COOKIE};
use crate::config::AuthConfig;
use crate::db::schema::{CourseRecord, DepartmentRecord, GroupRecord};
use crate::db::{DatabaseConfig, Db, QueryBuilder, create_connection, ensure_schema};

struct TestApp {
    router: Router,
    db: Db,
    state: AppState,
}

/// Departments 1 (admin) and 2, groups 5 and 9 in department 2, and course
/// 100 owned by teacher 7 with group 5 enrolled.
async fn setup_app() -> TestApp {
    let config = DatabaseConfig {
        url: "memory".to_string(),
        ..Default::default()
    };
    let db = create_connection(config).await.unwrap();
    ensure_schema(&db).await.unwrap();

    for (uid, name) in [(1, "Administration"), (2, "Mathematics")] {
        QueryBuilder::create_department(
            &db,
            &DepartmentRecord {
                uid,
                name: name.to_string(),
            },
        )
        .await
        .unwrap();
    }
    for uid in [5, 9] {
        QueryBuilder::create_group(
            &db,
            &GroupRecord {
                uid,
                name: format!("M-{}", uid),
                dep_id: 2,
            },
        )
        .await
        .unwrap();
    }
    QueryBuilder::create_course(
        &db,
        &CourseRecord {
            uid: 100,
            name: "Linear Algebra".to_string(),
            term: 1,
            teacher_id: 7,
            dep_id: 2,
        },
    )
    .await
    .unwrap();
    QueryBuilder::link_group_course(&db, 5, 100).await.unwrap();

    let auth = AuthService::new(db.clone(), AuthConfig::with_secret("api-test-secret"));
    let state = AppState::new(auth, AccessChecker::new(db.clone()));
    TestApp {
        router: create_router(state.clone()),
        db,
        state,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get_with_token(&self, uri: &str, token: &str) -> Response {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn sign_up(&self, email: &str, group_id: i64) {
        let response = self
            .post_json("/api/users/signup", sign_up_body(email, group_id))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn sign_in(&self, email: &str) -> Value {
        let response = self
            .post_json(
                "/api/users/signin",
                json!({ "email": email, "password": "secret-pass" }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }
}

fn sign_up_body(email: &str, group_id: i64) -> Value {
    json!({
        "email": email,
        "password": "secret-pass",
        "name": "Olga",
        "patronymic": "Nikolaevna",
        "surname": "Smirnova",
        "dep_id": 2,
        "group_id": group_id,
    })
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookie(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health() {
    let app = setup_app().await;
    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_sign_up_forces_student_role() {
    let app = setup_app().await;
    let mut body = sign_up_body("forced@example.com", 5);
    body["role_id"] = json!(3);

    let response = app.post_json("/api/users/signup", body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let role_ids: Vec<i64> = app
        .db
        .query("SELECT VALUE role_id FROM user WHERE email = 'forced@example.com'")
        .await
        .unwrap()
        .take(0)
        .unwrap();
    assert_eq!(role_ids, vec![1]);
}

#[tokio::test]
async fn test_sign_up_errors() {
    let app = setup_app().await;
    app.sign_up("taken@example.com", 5).await;

    let response = app.post_json("/api/users/signup", sign_up_body("taken@example.com", 5)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        json_body(response).await,
        json!({ "Error": "user with this email already exists" })
    );

    let mut body = sign_up_body("admin@example.com", 5);
    body["dep_id"] = json!(1);
    let response = app.post_json("/api/users/signup", body).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.post_json("/api/users/signup", sign_up_body("nogroup@example.com", 77)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut body = sign_up_body("short@example.com", 5);
    body["password"] = json!("short");
    let response = app.post_json("/api/users/signup", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body() {
    let app = setup_app().await;
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/users/signin")
                .body(Body::from("{\"email\":"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, json!({ "Error": "unable to unmarshal body" }));
}

#[tokio::test]
async fn test_wrong_method() {
    let app = setup_app().await;
    let response = app
        .send(
            Request::builder()
                .method(Method::GET)
                .uri("/api/users/signin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_body(response).await, json!({ "Error": "method not allowed" }));
}

#[tokio::test]
async fn test_sign_in_claims_match_stored_user() {
    let app = setup_app().await;
    app.sign_up("claims@example.com", 5).await;

    let response = app
        .post_json(
            "/api/users/signin",
            json!({ "email": "claims@example.com", "password": "secret-pass" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with(&format!("{}=", REFRESH_COOKIE)));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));

    let body = json_body(response).await;
    let refresh = body["refresh_token"].as_str().unwrap();
    assert!(cookie.contains(refresh));

    let claims = app
        .state
        .auth
        .authenticate(body["access_token"].as_str().unwrap())
        .unwrap();
    let user = app.state.auth.users().find_by_id(claims.user_id).await.unwrap().unwrap();
    assert_eq!(user.email.as_str(), "claims@example.com");
    assert_eq!(claims.role_id, user.role_id);
    assert_eq!(claims.group_id, user.group_id);
}

#[tokio::test]
async fn test_sign_in_unknown_user() {
    let app = setup_app().await;
    let response = app
        .post_json(
            "/api/users/signin",
            json!({ "email": "ghost@example.com", "password": "secret-pass" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_with_cookie_rotates() {
    let app = setup_app().await;
    app.sign_up("rotate@example.com", 5).await;
    let first = app.sign_in("rotate@example.com").await;
    let old = first["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/refresh")
                .header(header::COOKIE, format!("{}={}", REFRESH_COOKIE, old))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await;
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    // Old token is dead
    let response = app
        .post_json("/api/auth/refresh", json!({ "refresh_token": old }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // New token works through the body fallback
    let response = app
        .post_json("/api/auth/refresh", json!({ "refresh_token": second["refresh_token"] }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_without_token() {
    let app = setup_app().await;
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({ "Error": "token not provided" }));
}

#[tokio::test]
async fn test_logout_clears_cookie_and_is_idempotent() {
    let app = setup_app().await;
    app.sign_up("bye@example.com", 5).await;
    let pair = app.sign_in("bye@example.com").await;
    let body = json!({ "refresh_token": pair["refresh_token"] });

    let response = app.post_json("/api/auth/logout", body.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).contains("Max-Age=0"));

    let response = app.post_json("/api/auth/logout", body.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.post_json("/api/auth/refresh", body).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_body_token_without_cookie() {
    let app = setup_app().await;
    app.sign_up("nocookie@example.com", 5).await;
    let pair = app.sign_in("nocookie@example.com").await;
    let claims = app
        .state
        .auth
        .authenticate(pair["access_token"].as_str().unwrap())
        .unwrap();

    let response = app
        .post_json("/api/auth/refresh", json!({ "refresh_token": pair["refresh_token"] }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response);
    let rotated = json_body(response).await;
    let new_token = rotated["refresh_token"].as_str().unwrap();
    assert_ne!(rotated["refresh_token"], pair["refresh_token"]);
    assert!(cookie.contains(new_token));

    let response = app
        .post_json("/api/auth/logout", json!({ "refresh_token": new_token }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).contains("Max-Age=0"));
    assert_eq!(
        app.state.auth.sessions().count_for_user(claims.user_id).await.unwrap(),
        0
    );

    let response = app
        .post_json("/api/auth/refresh", json!({ "refresh_token": new_token }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_bearer() {
    let app = setup_app().await;
    app.sign_up("me@example.com", 5).await;
    let pair = app.sign_in("me@example.com").await;

    let response = app
        .get_with_token("/api/auth/me", pair["access_token"].as_str().unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let claims: AccessClaims = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(claims.group_id, 5);

    let response = app
        .send(Request::builder().uri("/api/auth/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get_with_token("/api/auth/me", "garbage").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({ "Error": "invalid token" }));
}

#[tokio::test]
async fn test_access_endpoint() {
    let app = setup_app().await;
    let codec = app.state.auth.codec();

    let teacher = codec.mint(7, 2, 9).unwrap();
    let member = codec.mint(20, 1, 5).unwrap();
    let stranger = codec.mint(21, 1, 9).unwrap();

    for (token, expected) in [(&teacher, 2), (&member, 1), (&stranger, 0)] {
        let response = app.get_with_token("/api/access/course/100", token).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "access": expected }));
    }

    let response = app.get_with_token("/api/access/course/404", &member).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get_with_token("/api/access/grades/100", &member).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get_with_token("/api/access/course/abc", &member).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_force_logout_endpoint() {
    let app = setup_app().await;
    app.sign_up("target@example.com", 5).await;
    let pair = app.sign_in("target@example.com").await;
    let target = app
        .state
        .auth
        .authenticate(pair["access_token"].as_str().unwrap())
        .unwrap()
        .user_id;
    let codec = app.state.auth.codec();

    let student = codec.mint(30, 1, 5).unwrap();
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/sessions/revoke")
                .header(header::AUTHORIZATION, format!("Bearer {}", student))
                .body(Body::from(json!({ "user_id": target }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = codec.mint(31, 3, 5).unwrap();
    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/sessions/revoke")
                .header(header::AUTHORIZATION, format!("Bearer {}", admin))
                .body(Body::from(json!({ "user_id": target }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["revoked"], 1);

    let response = app
        .post_json("/api/auth/refresh", json!({ "refresh_token": pair["refresh_token"] }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
