use chrono::{Duration as ChronoDuration, Utc};
use crewbook_api::config::AppConfig;
use crewbook_auth::JwtClaims;
use crewbook_core::{CompanyId, ProfileId};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let config = AppConfig::from_lookup(|key| match key {
            "APP_ENV" => Some("test".to_string()),
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            _ => None,
        })
        .expect("test config");
        let app = crewbook_api::app::build_app(&config)
            .await
            .expect("failed to build app");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap();
        read(res).await
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    /// Create a company owned by `owner`; returns its id.
    async fn company(&self, owner: &str, name: &str) -> String {
        let (status, body) = self.post(owner, "/companies", json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn add_employee(&self, owner: &str, company: &str, profile: ProfileId) {
        let (status, _) = self
            .post(
                owner,
                &format!("/companies/{company}/employees"),
                json!({ "profile_id": profile }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let text = res.text().await.unwrap();
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, body)
}

fn mint_jwt(profile: ProfileId) -> String {
    let claims = JwtClaims::new(profile, Utc::now(), ChronoDuration::minutes(10));
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn profile() -> (ProfileId, String) {
    let id = ProfileId::new();
    (id, mint_jwt(id))
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/approvals"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn whoami_reports_profile_and_active_context() {
    let srv = TestServer::spawn().await;
    let (id, token) = profile();

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile_id"].as_str().unwrap(), id.to_string());
    assert!(body["active_context"].is_null());

    let company = srv.company(&token, "Fixit Plumbing").await;
    let (status, _) = srv
        .put(&token, "/context", json!({ "company_id": company, "role": "owner" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = srv.get(&token, "/whoami").await;
    assert_eq!(body["active_context"]["company_id"].as_str().unwrap(), company);
    assert_eq!(body["active_context"]["role"], "owner");
}

#[tokio::test]
async fn active_context_requires_matching_membership() {
    let srv = TestServer::spawn().await;
    let (_, owner) = profile();
    let (employee_id, employee) = profile();
    let company = srv.company(&owner, "Fixit Plumbing").await;
    srv.add_employee(&owner, &company, employee_id).await;

    // Wrong role for an existing membership.
    let (status, body) = srv
        .put(&employee, "/context", json!({ "company_id": company, "role": "owner" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    // Company the profile does not belong to.
    let (status, _) = srv
        .put(
            &employee,
            "/context",
            json!({ "company_id": CompanyId::new(), "role": "employee" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = srv
        .put(&employee, "/context", json!({ "company_id": company, "role": "employee" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Unknown role is a validation error, not an authorization one.
    let (status, body) = srv
        .put(&employee, "/context", json!({ "company_id": company, "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "role");

    let res = srv
        .client
        .delete(srv.url("/context"))
        .bearer_auth(&employee)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let (_, body) = srv.get(&employee, "/context").await;
    assert!(body["active_context"].is_null());
    assert_eq!(body["memberships"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn owner_addition_then_removal_lifecycle() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let (bob_id, bob) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;
    srv.add_employee(&alice, &company, bob_id).await;

    // Sole owner may approve their own request.
    let (status, created) = srv
        .post(
            &alice,
            "/approvals",
            json!({
                "company_id": company,
                "kind": "owner_addition",
                "target_ref": bob_id,
                "reason": "co-founder",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let addition = created["id"].as_str().unwrap().to_string();

    let (status, approved) = srv
        .post(&alice, &format!("/approvals/{addition}/approve"), json!({ "comment": "welcome" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "applied");

    let (_, decisions) = srv.get(&alice, &format!("/approvals/{addition}/decisions")).await;
    assert_eq!(decisions["items"].as_array().unwrap().len(), 1);
    assert_eq!(decisions["items"][0]["decision"], "approve");

    // Bob is now an owner and can act as one.
    let (status, _) = srv
        .put(&bob, "/context", json!({ "company_id": company, "role": "owner" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Bob asks to remove himself; with two owners he cannot approve his own request.
    let (status, created) = srv
        .post(&bob, "/approvals", json!({ "kind": "owner_removal", "target_ref": bob_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "company falls back to the active context");
    assert_eq!(created["company_id"].as_str().unwrap(), company);
    let removal = created["id"].as_str().unwrap().to_string();

    let (status, _) = srv.post(&bob, &format!("/approvals/{removal}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, applied) = srv.post(&alice, &format!("/approvals/{removal}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied["status"], "applied");
    assert!(applied["resolved_at"].is_string());

    // The removal took effect: Bob's owner context is gone.
    let (_, body) = srv.get(&bob, "/whoami").await;
    assert!(body["active_context"].is_null());
}

#[tokio::test]
async fn unrelated_company_cannot_decide() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let (_, mallory) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;
    srv.company(&mallory, "Elsewhere Ltd").await;

    let (_, created) = srv
        .post(
            &alice,
            "/approvals",
            json!({ "company_id": company, "kind": "sign_off", "target_ref": "invoice 42" }),
        )
        .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = srv.post(&mallory, &format!("/approvals/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Reads are scoped too.
    let (status, _) = srv.get(&mallory, &format!("/approvals/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = srv.get(&mallory, &format!("/approvals?company_id={company}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = srv.get(&alice, &format!("/approvals/{id}")).await;
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn deciding_twice_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;

    let (_, created) = srv
        .post(
            &alice,
            "/approvals",
            json!({ "company_id": company, "kind": "sign_off", "target_ref": "invoice 42" }),
        )
        .await;
    let id = created["id"].as_str().unwrap().to_string();

    // No body at all is accepted for decisions.
    let res = srv
        .client
        .post(srv.url(&format!("/approvals/{id}/reject")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "rejected");

    let (status, body) = srv.post(&alice, &format!("/approvals/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (_, body) = srv.get(&alice, &format!("/approvals/{id}")).await;
    assert_eq!(body["status"], "rejected");
}

#[tokio::test]
async fn list_filters_by_status_and_company() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let first = srv.company(&alice, "Fixit Plumbing").await;
    let second = srv.company(&alice, "Fixit Heating").await;

    let mut ids = Vec::new();
    for (company, target) in [(&first, "invoice 1"), (&first, "invoice 2"), (&second, "invoice 3")] {
        let (_, created) = srv
            .post(
                &alice,
                "/approvals",
                json!({ "company_id": company, "kind": "sign_off", "target_ref": target }),
            )
            .await;
        ids.push(created["id"].as_str().unwrap().to_string());
    }
    let (status, _) = srv.post(&alice, &format!("/approvals/{}/approve", ids[0]), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, page) = srv
        .get(&alice, &format!("/approvals?status=pending&company_id={first}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"].as_str().unwrap(), ids[1]);
    assert!(items
        .iter()
        .all(|r| r["status"] == "pending" && r["company_id"].as_str().unwrap() == first));

    let (_, page) = srv.get(&alice, &format!("/approvals?company_id={first}&limit=1")).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["limit"], 1);

    let (status, body) = srv.get(&alice, "/approvals?status=done&company_id=nope").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"].as_array().unwrap().len(), 2);

    // Without a company or an active context there is nothing to scope to.
    let (status, _) = srv.get(&alice, "/approvals").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn employees_only_see_their_own_requests() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let (bob_id, bob) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;
    srv.add_employee(&alice, &company, bob_id).await;

    srv.post(
        &alice,
        "/approvals",
        json!({ "company_id": company, "kind": "sign_off", "target_ref": "invoice 42" }),
    )
    .await;

    // Employees cannot open requests.
    let (status, _) = srv
        .post(
            &bob,
            "/approvals",
            json!({ "company_id": company, "kind": "sign_off", "target_ref": "invoice 43" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, page) = srv.get(&bob, &format!("/approvals?company_id={company}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn only_the_requester_cancels_pending_requests() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let (bob_id, bob) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;
    srv.add_employee(&alice, &company, bob_id).await;

    let (_, created) = srv
        .post(
            &alice,
            "/approvals",
            json!({ "company_id": company, "kind": "sign_off", "target_ref": "invoice 42" }),
        )
        .await;
    let id = created["id"].as_str().unwrap().to_string();

    // Bob cannot even see Alice's request.
    let (status, _) = srv.post(&bob, &format!("/approvals/{id}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = srv.post(&alice, &format!("/approvals/{id}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = srv.post(&alice, &format!("/approvals/{id}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = srv.post(&alice, &format!("/approvals/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_input_is_rejected() {
    let srv = TestServer::spawn().await;
    let (_, alice) = profile();
    let company = srv.company(&alice, "Fixit Plumbing").await;

    let res = srv
        .client
        .post(srv.url("/approvals"))
        .bearer_auth(&alice)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "invalid_json");

    let (status, body) = srv.get(&alice, "/approvals/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_id");

    let (status, _) = srv.get(&alice, &format!("/approvals/{}", ProfileId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = srv
        .post(
            &alice,
            "/approvals",
            json!({ "company_id": company, "kind": "owner_removal", "target_ref": "bob" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["details"][0]["field"], "target_ref");

    let (status, body) = srv.post(&alice, "/companies", json!({ "name": "   " })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "name");
}

#[tokio::test]
async fn unknown_routes_pass_through_request_logging() {
    let srv = TestServer::spawn().await;
    let (_, token) = profile();

    let res = srv
        .client
        .get(srv.url("/no-such-route"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
