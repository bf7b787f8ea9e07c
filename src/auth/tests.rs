use super::*;
use crate::{
    audit::tests::CapturingDelegate,
    model::{AuditEntry, MemoryUsersRepo},
};
use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderValue, Method, Request,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};
use tower::ServiceExt;

struct Harness {
    repo: Arc<MemoryUsersRepo>,
    delegate: Arc<CapturingDelegate>,
    auth: Arc<AuthService>,
    hits: Arc<AtomicUsize>,
}

fn harness_with(config: AuthConfig) -> Harness {
    let repo = Arc::new(MemoryUsersRepo::new());
    let delegate = Arc::new(CapturingDelegate::default());
    let audit = Logger::new(repo.clone(), delegate.clone());
    let auth = Arc::new(AuthService::new(
        config,
        SecureCookie::new(b"0123456789abcdef0123456789abcdef"),
        repo.clone(),
        audit,
    ));
    Harness {
        repo,
        delegate,
        auth,
        hits: Arc::new(AtomicUsize::new(0)),
    }
}

fn harness() -> Harness {
    harness_with(AuthConfig::default())
}

impl Harness {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Handler that counts invocations and echoes the session username.
    fn counting(&self) -> axum::routing::MethodRouter {
        let hits = self.hits.clone();
        get(move |request: Request<Body>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                session_user(request.extensions())
                    .map(|d| d.username.clone())
                    .unwrap_or_default()
            }
        })
    }

    fn session_router(&self) -> Router {
        Router::new()
            .route("/", self.counting())
            .route_layer(from_fn_with_state(self.auth.clone(), require_session))
    }

    fn admin_router(&self) -> Router {
        Router::new()
            .route("/admin", self.counting())
            .route_layer(from_fn_with_state(self.auth.clone(), require_admin))
            .route_layer(from_fn_with_state(self.auth.clone(), require_session))
    }

    fn grant_router(&self, grant: &str) -> Router {
        Router::new()
            .route("/reports", self.counting())
            .route_layer(from_fn_with_state(
                GrantGuard::new(self.auth.clone(), grant),
                require_grant,
            ))
            .route_layer(from_fn_with_state(self.auth.clone(), require_session))
    }

    fn csrf_router(&self) -> Router {
        let hits = self.hits.clone();
        let form = Router::new()
            .route(
                "/form",
                get(|request: Request<Body>| async move {
                    csrf_token(request.extensions())
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default()
                }),
            )
            .route_layer(from_fn_with_state(self.auth.clone(), set_csrf));
        let submit = Router::new()
            .route(
                "/submit",
                post(move |body: String| {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        body
                    }
                }),
            )
            .route_layer(from_fn_with_state(self.auth.clone(), require_csrf));
        form.merge(submit)
    }

    /// `/submit` behind `require_session` then `require_csrf`.
    fn authenticated_submit_router(&self) -> Router {
        let hits = self.hits.clone();
        Router::new()
            .route(
                "/submit",
                post(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .route_layer(from_fn_with_state(self.auth.clone(), require_csrf))
            .route_layer(from_fn_with_state(self.auth.clone(), require_session))
    }

    fn session_cookie(&self, session_key: &str) -> Result<String> {
        let token = self
            .auth
            .cookies()
            .encode_with_ttl(SESSION_COOKIE, &session_key.to_string(), 1800)?;
        Ok(format!("{SESSION_COOKIE}={token}"))
    }

    async fn bob(&self, admin: bool) -> i64 {
        let user_id = self.repo.add_user("bob", "pw", admin).await;
        self.repo.add_session("abc", user_id).await;
        user_id
    }

    async fn actions(&self) -> Vec<String> {
        self.repo
            .audit_entries()
            .await
            .into_iter()
            .map(|e: AuditEntry| format!("{}: {}", e.username, e.action))
            .collect()
    }
}

fn get_request(uri: &str, cookie: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
}

async fn body_string(response: Response) -> Result<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Minimal browser cookie jar driven by `Set-Cookie` headers.
#[derive(Default)]
struct Jar(BTreeMap<String, String>);

impl Jar {
    fn absorb(&mut self, response: &Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let pair = value.split(';').next().unwrap_or_default();
            let Some((name, val)) = pair.split_once('=') else {
                continue;
            };
            if val.is_empty() || value.contains("Max-Age=0") {
                self.0.remove(name);
            } else {
                self.0.insert(name.to_string(), val.to_string());
            }
        }
    }

    fn header(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn submit_request(jar: &Jar, token: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri("/submit")
        .header(COOKIE, jar.header())
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("{CSRF_FIELD}={token}&note=hi")))?)
}

#[tokio::test]
async fn missing_session_cookie_redirects_without_repository_calls() -> Result<()> {
    let h = harness();
    let response = h.session_router().oneshot(get_request("/", None)?).await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));
    assert_eq!(h.hits(), 0);
    assert_eq!(h.repo.calls().await, crate::model::CallCounts::default());
    Ok(())
}

#[tokio::test]
async fn undecodable_session_cookie_redirects() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some("JSESSIONID=abc"))?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(h.repo.calls().await.get_session_user, 0);
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_session_redirects_and_audits_anonymously() -> Result<()> {
    let h = harness();
    let cookie = h.session_cookie("nope")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));
    let calls = h.repo.calls().await;
    assert_eq!(calls.get_session_user, 1);
    assert_eq!(calls.update_session_liveness, 0);
    assert_eq!(calls.user_authorizations, 0);
    assert_eq!(h.hits(), 0);
    assert_eq!(
        h.actions().await,
        vec!["<anonymous>: Failed to get user details for session".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn expired_session_redirects() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    h.repo.expire_session("abc").await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(h.repo.calls().await.update_session_liveness, 0);
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn session_lookup_error_redirects() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    h.repo.fail_get_session_user(true).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn valid_session_reaches_handler_once() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await?, "bob");
    let calls = h.repo.calls().await;
    assert_eq!(calls.get_session_user, 1);
    assert_eq!(calls.update_session_liveness, 1);
    assert_eq!(calls.user_authorizations, 1);
    assert_eq!(h.hits(), 1);
    assert_eq!(h.actions().await, vec!["bob: GET /".to_string()]);
    Ok(())
}

#[tokio::test]
async fn liveness_failure_is_a_server_error() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    h.repo.fail_update_session_liveness(true).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await?, "Session management error");
    assert_eq!(h.repo.calls().await.user_authorizations, 0);
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn authorization_failure_is_a_server_error() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    h.repo.fail_user_authorizations(true).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn audit_failure_never_fails_the_request() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    h.repo.fail_insert_audit_log(true).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .session_router()
        .oneshot(get_request("/", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits(), 1);
    assert_eq!(h.delegate.errors().len(), 1);
    Ok(())
}

#[tokio::test]
async fn redirects_respect_the_url_prefix() -> Result<()> {
    let h = harness_with(AuthConfig::new(UrlPrefix::new("app/")));
    let response = h.session_router().oneshot(get_request("/", None)?).await?;

    assert_eq!(location(&response), Some("/app/login"));
    Ok(())
}

#[tokio::test]
async fn non_admin_is_denied_and_audited() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .admin_router()
        .oneshot(get_request("/admin", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/unauthorized"));
    assert_eq!(h.hits(), 0);
    assert!(h
        .actions()
        .await
        .contains(&"bob: Attempted to access GET /admin, not admin".to_string()));
    Ok(())
}

#[tokio::test]
async fn admin_passes_the_admin_guard() -> Result<()> {
    let h = harness();
    h.bob(true).await;
    let cookie = h.session_cookie("abc")?;
    let response = h
        .admin_router()
        .oneshot(get_request("/admin", Some(&cookie))?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits(), 1);
    Ok(())
}

#[tokio::test]
async fn grant_guard_matches_case_insensitively() -> Result<()> {
    let h = harness();
    let user_id = h.bob(false).await;
    h.repo.add_authorization("Admin").await;
    h.repo.grant_auth(user_id, "Admin").await?;
    let cookie = h.session_cookie("abc")?;

    let response = h
        .grant_router("admin")
        .oneshot(get_request("/reports", Some(&cookie))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .grant_router("billing")
        .oneshot(get_request("/reports", Some(&cookie))?)
        .await?;
    assert_eq!(location(&response), Some("/unauthorized"));
    assert!(h.actions().await.contains(
        &"bob: Attempted to access GET /reports, not granted auth billing".to_string()
    ));
    assert_eq!(h.hits(), 1);
    Ok(())
}

#[tokio::test]
async fn guard_without_session_redirects_to_login() -> Result<()> {
    let h = harness();
    let app = Router::new()
        .route("/admin", h.counting())
        .route_layer(from_fn_with_state(h.auth.clone(), require_admin));
    let response = app.oneshot(get_request("/admin", None)?).await?;

    assert_eq!(location(&response), Some("/login"));
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn csrf_token_validates_once() -> Result<()> {
    let h = harness();
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    jar.absorb(&response);
    let token = body_string(response).await?;
    assert_eq!(token.len(), 32);
    assert!(jar.0.contains_key(CSRF_COOKIE));

    let response = app.clone().oneshot(submit_request(&jar, &token)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    jar.absorb(&response);
    // The handler still sees the full form body.
    assert_eq!(
        body_string(response).await?,
        format!("{CSRF_FIELD}={token}&note=hi")
    );
    assert!(!jar.0.contains_key(CSRF_COOKIE));

    let response = app.oneshot(submit_request(&jar, &token)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.hits(), 1);
    assert_eq!(
        h.actions().await,
        vec![
            "<anonymous>: Valid CSRF token".to_string(),
            "<anonymous>: missing CSRF token".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn altered_csrf_token_is_rejected() -> Result<()> {
    let h = harness();
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;
    let mut altered: Vec<char> = token.chars().collect();
    altered[0] = if altered[0] == 'a' { 'b' } else { 'a' };
    let altered: String = altered.into_iter().collect();

    let response = app.oneshot(submit_request(&jar, &altered)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.hits(), 0);
    assert_eq!(
        h.actions().await,
        vec!["<anonymous>: mismatched CSRF token".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn csrf_token_in_query_string_is_accepted() -> Result<()> {
    let h = harness();
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/submit?{CSRF_FIELD}={token}"))
        .header(COOKIE, jar.header())
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_csrf_token_cannot_be_retried() -> Result<()> {
    let h = harness();
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;

    let response = app
        .clone()
        .oneshot(submit_request(&jar, "not-the-token")?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    jar.absorb(&response);
    assert!(!jar.0.contains_key(CSRF_COOKIE));

    let response = app.oneshot(submit_request(&jar, &token)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.hits(), 0);
    assert_eq!(
        h.actions().await,
        vec![
            "<anonymous>: mismatched CSRF token".to_string(),
            "<anonymous>: missing CSRF token".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn oversized_form_body_burns_the_token() -> Result<()> {
    let h = harness_with(AuthConfig::default().with_max_form_bytes(16));
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;

    // The token alone already exceeds the 16 byte limit.
    let response = app.oneshot(submit_request(&jar, &token)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    jar.absorb(&response);
    assert!(!jar.0.contains_key(CSRF_COOKIE));
    assert_eq!(h.hits(), 0);
    Ok(())
}

#[tokio::test]
async fn csrf_token_in_multipart_form_is_accepted() -> Result<()> {
    let h = harness();
    let app = h.csrf_router();
    let mut jar = Jar::default();

    let response = app.clone().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;

    let body = format!(
        "--XyZ\r\nContent-Disposition: form-data; name=\"{CSRF_FIELD}\"\r\n\r\n{token}\r\n--XyZ--\r\n"
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/submit")
        .header(COOKIE, jar.header())
        .header(CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
        .body(Body::from(body.clone()))?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits(), 1);
    // The handler receives the untouched multipart body.
    assert_eq!(body_string(response).await?, body);
    Ok(())
}

#[tokio::test]
async fn unrepresentable_csrf_ttl_is_a_server_error() -> Result<()> {
    let h = harness_with(AuthConfig::default().with_csrf_ttl_seconds(i64::MAX));
    let response = h.csrf_router().oneshot(get_request("/form", None)?).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(SET_COOKIE).is_none());
    Ok(())
}

#[tokio::test]
async fn csrf_audit_is_attributed_to_the_session_user() -> Result<()> {
    let h = harness();
    h.bob(false).await;
    let mut jar = Jar::default();

    let response = h.csrf_router().oneshot(get_request("/form", None)?).await?;
    jar.absorb(&response);
    let token = body_string(response).await?;
    let session = h.session_cookie("abc")?;
    let Some((name, value)) = session.split_once('=') else {
        anyhow::bail!("malformed session cookie");
    };
    jar.0.insert(name.to_string(), value.to_string());

    let response = h
        .authenticated_submit_router()
        .oneshot(submit_request(&jar, &token)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.hits(), 1);
    assert_eq!(
        h.actions().await,
        vec![
            "bob: POST /submit".to_string(),
            "bob: Valid CSRF token".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn set_csrf_cookie_carries_security_attributes() -> Result<()> {
    let h = harness();
    let response = h.csrf_router().oneshot(get_request("/form", None)?).await?;
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .map(HeaderValue::to_str)
        .transpose()?
        .unwrap_or_default()
        .to_string();

    assert!(cookie.starts_with("_csrf="));
    assert!(cookie.contains("Max-Age=300"));
    assert!(cookie.contains("HttpOnly; Secure; SameSite=Lax"));
    Ok(())
}

#[tokio::test]
async fn set_authenticated_session_attaches_details() -> Result<()> {
    let h = harness();
    let user_id = h.repo.add_user("alice", "pw", true).await;
    h.repo.add_authorization("reports").await;
    h.repo.grant_auth(user_id, "reports").await?;

    let mut extensions = Extensions::new();
    let cookie = set_authenticated_session(&h.auth, &mut extensions, "alice").await?;

    let details = session_user(&extensions).cloned();
    let Some(details) = details else {
        anyhow::bail!("details not attached");
    };
    assert_eq!(details.username, "alice");
    assert!(details.admin);
    assert!(details.has_auth("REPORTS"));
    assert!(h.repo.has_session(&details.session_key).await);

    let cookie = cookie.to_str()?;
    assert!(cookie.starts_with("JSESSIONID="));
    assert!(cookie.contains("Max-Age=1800"));
    let token = cookie
        .trim_start_matches("JSESSIONID=")
        .split(';')
        .next()
        .unwrap_or_default();
    let key: String = h.auth.cookies().decode(SESSION_COOKIE, token)?;
    assert_eq!(key, details.session_key);
    Ok(())
}

#[tokio::test]
async fn failed_authentication_leaves_no_details() {
    let h = harness();
    let mut extensions = Extensions::new();
    assert!(set_authenticated_session(&h.auth, &mut extensions, "ghost")
        .await
        .is_err());
    assert!(session_user(&extensions).is_none());

    h.repo.add_user("alice", "pw", false).await;
    h.repo.fail_user_authorizations(true).await;
    assert!(set_authenticated_session(&h.auth, &mut extensions, "alice")
        .await
        .is_err());
    assert!(session_user(&extensions).is_none());
}

#[tokio::test]
async fn invalidate_without_identity_is_a_no_op() -> Result<()> {
    let h = harness();
    invalidate_session(&h.auth, &Extensions::new()).await?;
    assert_eq!(h.repo.calls().await.invalidate_session, 0);
    Ok(())
}

#[tokio::test]
async fn invalidate_removes_the_session() -> Result<()> {
    let h = harness();
    h.repo.add_user("alice", "pw", false).await;
    let mut extensions = Extensions::new();
    set_authenticated_session(&h.auth, &mut extensions, "alice").await?;
    assert_eq!(h.repo.session_count().await, 1);

    invalidate_session(&h.auth, &extensions).await?;
    assert_eq!(h.repo.session_count().await, 0);
    // A second logout with the same identity stays harmless.
    invalidate_session(&h.auth, &extensions).await?;
    Ok(())
}

#[test]
fn has_auth_ignores_case() {
    let details = Details {
        user_id: 1,
        username: "bob".to_string(),
        admin: false,
        session_key: "abc".to_string(),
        authorizations: vec![Grant {
            id: 1,
            auth: "Admin".to_string(),
            granted: chrono::Utc::now(),
            revoked: None,
        }],
    };
    assert!(details.has_auth("admin"));
    assert!(details.has_auth("ADMIN"));
    assert!(!details.has_auth("billing"));
}
