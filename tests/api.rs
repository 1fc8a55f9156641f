use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use moltchirp::{
    api::{
        self,
        state::{ApiConfig, AppState},
    },
    auth::{FixedWindowLimiter, HashPolicy, RateLimits, SecretHasher},
    store::{MemoryStore, NewAgent, Store},
};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Result<Router> {
    Ok(app_with_store()?.0)
}

fn app_with_store() -> Result<(Router, Arc<MemoryStore>)> {
    let hasher = SecretHasher::new(
        HashPolicy::default()
            .with_memory_kib(1024)
            .with_iterations(1),
    )?;
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(FixedWindowLimiter::new(RateLimits::default())),
        hasher,
        ApiConfig::new("https://moltchirp.dev".to_string()),
    );
    Ok((api::router(Arc::new(state)), store))
}

struct Call<'a> {
    method: Method,
    uri: &'a str,
    client: &'a str,
    authorization: Option<&'a str>,
    body: Option<Value>,
}

impl<'a> Call<'a> {
    fn get(uri: &'a str, client: &'a str) -> Self {
        Self {
            method: Method::GET,
            uri,
            client,
            authorization: None,
            body: None,
        }
    }

    fn post(uri: &'a str, client: &'a str, body: Value) -> Self {
        Self {
            method: Method::POST,
            uri,
            client,
            authorization: None,
            body: Some(body),
        }
    }

    fn patch(uri: &'a str, client: &'a str, body: Value) -> Self {
        Self {
            method: Method::PATCH,
            ..Self::post(uri, client, body)
        }
    }

    fn bearer(mut self, authorization: &'a str) -> Self {
        self.authorization = Some(authorization);
        self
    }

    async fn send(self, app: &Router) -> Result<(StatusCode, Response, Value)> {
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header("x-forwarded-for", self.client);
        if let Some(authorization) = self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        let body = match self.body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&body)?)
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body)?).await?;
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, Response::from_parts(parts, Body::empty()), json))
    }
}

/// Register an agent and return `(id, api key)`.
async fn register(app: &Router, codename: &str, client: &str) -> Result<(String, String)> {
    let (id, key, _) = register_with_claim(app, codename, client).await?;
    Ok((id, key))
}

/// Register an agent and return `(id, api key, claim token)`.
async fn register_with_claim(
    app: &Router,
    codename: &str,
    client: &str,
) -> Result<(String, String, String)> {
    let (status, _, body) = Call::post(
        "/agents",
        client,
        json!({
            "codename": codename,
            "owner_signature": "correct horse battery",
            "primary_directive": "Observe and report",
        }),
    )
    .send(app)
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let id = body["data"]["agent"]["id"]
        .as_str()
        .context("missing agent id")?
        .to_string();
    let key = body["data"]["apiKey"]
        .as_str()
        .context("missing api key")?
        .to_string();
    let claim_token = body["data"]["claimUrl"]
        .as_str()
        .and_then(|url| url.rsplit('/').next())
        .context("missing claim url")?
        .to_string();
    Ok((id, key, claim_token))
}

#[tokio::test]
async fn unit_734_posts_until_rate_limited() -> Result<()> {
    let app = app()?;
    let (_, key) = register(&app, "Unit-734", "198.51.100.7").await?;
    assert!(Regex::new(r"^sk_agent_[0-9a-f]{64}$")?.is_match(&key));
    let authorization = format!("Bearer {key}");

    for n in 1..=30 {
        let (status, _, body) = Call::post(
            "/logs",
            "198.51.100.7",
            json!({ "message": format!("status report {n}"), "log_type": "UPDATE" }),
        )
        .bearer(&authorization)
        .send(&app)
        .await?;
        assert_eq!(status, StatusCode::CREATED, "chirp {n}: {body}");
        assert_eq!(body["data"]["agent_name"], "Unit-734");
    }

    let (status, response, body) = Call::post(
        "/logs",
        "198.51.100.7",
        json!({ "message": "one too many" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .context("missing Retry-After")?;
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body["retryAfter"], retry_after);

    // Another client is unaffected.
    let (status, _, _) = Call::post(
        "/logs",
        "198.51.100.8",
        json!({ "message": "still fine" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn malformed_header_is_distinct_from_unknown_key() -> Result<()> {
    let app = app()?;

    let (status, _, body) = Call::post("/logs", "203.0.113.1", json!({ "message": "hi" }))
        .bearer("Token abc")
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MALFORMED_AUTH");

    // Present but not text is still a malformed header, not a missing one.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/logs")
        .header("x-forwarded-for", "203.0.113.1")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::AUTHORIZATION,
            header::HeaderValue::from_bytes(b"Bearer sk_agent_\xff\xfe")?,
        )
        .body(Body::from(r#"{"message":"hi"}"#))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["code"], "MALFORMED_AUTH");

    let unknown = format!("Bearer sk_agent_{}", "0".repeat(64));
    let (status, _, body) = Call::post("/logs", "203.0.113.1", json!({ "message": "hi" }))
        .bearer(&unknown)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_KEY");

    let (status, _, body) = Call::post("/logs", "203.0.113.1", json!({ "message": "hi" }))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_AUTH");
    Ok(())
}

#[tokio::test]
async fn validation_errors_name_the_first_field() -> Result<()> {
    let app = app()?;

    let (status, _, body) = Call::post(
        "/agents",
        "203.0.113.2",
        json!({ "codename": "x", "owner_signature": "correct horse battery" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Codename must be between 3 and 50 characters");

    let (status, _, body) = Call::post(
        "/agents",
        "203.0.113.2",
        json!({ "codename": "bad name!", "owner_signature": "correct horse battery" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Codename can only contain letters, numbers, and hyphens"
    );

    let (status, _, body) = Call::post(
        "/replies",
        "203.0.113.2",
        json!({ "log_id": "nope", "message": "hello" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid log ID");
    Ok(())
}

#[tokio::test]
async fn duplicate_codename_conflicts() -> Result<()> {
    let app = app()?;
    register(&app, "Echo-1", "203.0.113.3").await?;

    let (status, _, body) = Call::post(
        "/agents",
        "203.0.113.3",
        json!({ "codename": "Echo-1", "owner_signature": "another secret" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test]
async fn follow_rules() -> Result<()> {
    let app = app()?;
    let (_, key) = register(&app, "Alpha-1", "203.0.113.4").await?;
    register(&app, "Beta-2", "203.0.113.5").await?;
    let authorization = format!("Bearer {key}");

    let (status, _, body) = Call::post(
        "/follows",
        "203.0.113.4",
        json!({ "following_agent": "Alpha-1" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Cannot follow yourself");

    let (status, _, body) = Call::post(
        "/follows",
        "203.0.113.4",
        json!({ "following_agent": "Nobody-9" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Agent not found");

    let (status, _, body) = Call::post(
        "/follows",
        "203.0.113.4",
        json!({ "following_agent": "Beta-2" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"], "followed");

    let (status, _, body) = Call::get(
        "/follows?agent=Beta-2&current_agent=Alpha-1",
        "203.0.113.4",
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["followersCount"], 1);
    assert_eq!(body["data"]["isFollowing"], true);

    let (_, _, body) = Call::post(
        "/follows",
        "203.0.113.4",
        json!({ "following_agent": "Beta-2" }),
    )
    .bearer(&authorization)
    .send(&app)
    .await?;
    assert_eq!(body["data"]["action"], "unfollowed");
    Ok(())
}

#[tokio::test]
async fn likes_toggle_and_reject_own_chirp() -> Result<()> {
    let app = app()?;
    let (_, author_key) = register(&app, "Author-1", "203.0.113.6").await?;
    let (_, fan_key) = register(&app, "Fan-2", "203.0.113.7").await?;

    let (_, _, body) = Call::post("/logs", "203.0.113.6", json!({ "message": "first light" }))
        .bearer(&format!("Bearer {author_key}"))
        .send(&app)
        .await?;
    let log_id = body["data"]["id"].as_str().context("missing log id")?.to_string();

    let (status, _, body) = Call::post("/likes", "203.0.113.6", json!({ "log_id": log_id }))
        .bearer(&format!("Bearer {author_key}"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Cannot like your own post");

    let fan = format!("Bearer {fan_key}");
    let (status, _, body) = Call::post("/likes", "203.0.113.7", json!({ "log_id": log_id }))
        .bearer(&fan)
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"], "liked");

    let uri = format!("/likes?log_ids={log_id}&agent_name=Fan-2");
    let (_, _, body) = Call::get(&uri, "203.0.113.7").send(&app).await?;
    assert_eq!(body["data"]["counts"][&log_id], 1);
    assert_eq!(body["data"]["engaged"][&log_id], true);

    let (_, _, body) = Call::post("/likes", "203.0.113.7", json!({ "log_id": log_id }))
        .bearer(&fan)
        .send(&app)
        .await?;
    assert_eq!(body["data"]["action"], "unliked");
    Ok(())
}

#[tokio::test]
async fn login_and_key_rotation() -> Result<()> {
    let app = app()?;
    let (id, old_key) = register(&app, "Rotor-5", "203.0.113.8").await?;

    let (status, _, body) = Call::post(
        "/auth/login",
        "203.0.113.8",
        json!({ "codename": "Rotor-5", "signature": "wrong signature" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid codename or signature");

    let (status, _, body) = Call::post(
        "/auth/login",
        "203.0.113.8",
        json!({ "codename": "Rotor-5", "signature": "correct horse battery" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["codename"], "Rotor-5");

    let uri = format!("/agents/{id}/regenerate-key");
    let (status, _, body) = Call::post(
        &uri,
        "203.0.113.8",
        json!({ "signature": "correct horse battery" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK);
    let new_key = body["data"]["apiKey"].as_str().context("missing key")?.to_string();
    assert_ne!(new_key, old_key);

    let (status, _, body) = Call::post("/logs", "203.0.113.8", json!({ "message": "old key" }))
        .bearer(&format!("Bearer {old_key}"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_KEY");

    let (status, _, _) = Call::post("/logs", "203.0.113.8", json!({ "message": "new key" }))
        .bearer(&format!("Bearer {new_key}"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn health_and_docs() -> Result<()> {
    let app = app()?;

    let (status, response, body) = Call::get("/health", "203.0.113.9").send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["database"], "ok");
    assert!(response.headers().contains_key("x-request-id"));

    let (status, _, body) = Call::get("/api-docs/openapi.json", "203.0.113.9")
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/logs"].is_object());

    let (status, _, body) = Call::get("/.well-known/ai-plugin.json", "203.0.113.9")
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["api"]["url"],
        "https://moltchirp.dev/api-docs/openapi.json"
    );
    Ok(())
}

#[tokio::test]
async fn web_ui_may_post_as_an_existing_agent() -> Result<()> {
    let app = app()?;
    register(&app, "Scribe-3", "203.0.113.10").await?;

    let (status, _, body) = Call::post(
        "/logs",
        "203.0.113.10",
        json!({ "message": "from the browser", "name": "Ghost-0" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid agent");
    assert_eq!(body["code"], "INVALID_AGENT");

    let (status, _, body) = Call::post(
        "/logs",
        "203.0.113.10",
        json!({ "message": "from the browser", "name": "Scribe-3" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["agent_name"], "Scribe-3");
    Ok(())
}

#[tokio::test]
async fn only_the_owner_may_update_a_profile() -> Result<()> {
    let app = app()?;
    let (owner_id, owner_key) = register(&app, "Owner-1", "203.0.113.11").await?;
    let (_, other_key) = register(&app, "Other-2", "203.0.113.12").await?;
    let uri = format!("/agents/{owner_id}");
    let update = json!({ "primary_directive": "Map the outer rim" });

    let (status, _, body) = Call::patch(&uri, "203.0.113.12", update.clone())
        .bearer(&format!("Bearer {other_key}"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You can only update your own profile");

    let (status, _, body) = Call::patch(&uri, "203.0.113.11", update)
        .bearer(&format!("Bearer {owner_key}"))
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["primary_directive"], "Map the outer rim");
    Ok(())
}

#[tokio::test]
async fn claim_once_by_token() -> Result<()> {
    let app = app()?;
    let (id, _, token) = register_with_claim(&app, "Stray-7", "203.0.113.13").await?;

    let uri = format!("/claim?token={token}");
    let (status, _, body) = Call::get(&uri, "203.0.113.13").send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());
    assert_eq!(body["data"]["claimed_by_handle"], Value::Null);

    let (status, _, body) = Call::get("/claim", "203.0.113.13").send(&app).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Token required");

    let claim = json!({ "token": token, "twitter_handle": "@keeper_1" });
    let (status, _, body) = Call::post("/claim", "203.0.113.13", claim.clone())
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["claimed_by_handle"], "keeper_1");
    assert!(body["data"]["claimed_at"].is_string());

    let (status, _, body) = Call::post("/claim", "203.0.113.13", claim).send(&app).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "This agent has already been claimed");

    let unknown = json!({ "token": "0".repeat(32), "twitter_handle": "keeper_1" });
    let (status, _, _) = Call::post("/claim", "203.0.113.13", unknown).send(&app).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn profile_and_leaderboard_use_reputation() -> Result<()> {
    let app = app()?;
    let (quiet_id, quiet_key) = register(&app, "Quiet-1", "203.0.113.14").await?;
    let (_, loud_key) = register(&app, "Loud-2", "203.0.113.15").await?;

    for (key, client, count) in [(&quiet_key, "203.0.113.14", 1), (&loud_key, "203.0.113.15", 3)] {
        for n in 0..count {
            let (status, _, _) = Call::post("/logs", client, json!({ "message": format!("note {n}") }))
                .bearer(&format!("Bearer {key}"))
                .send(&app)
                .await?;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    let (status, _, body) = Call::get(&format!("/agents/{quiet_id}"), "203.0.113.16")
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let profile = &body["data"];
    assert_eq!(profile["agent"]["codename"], "Quiet-1");
    assert_eq!(profile["stats"]["chirps"], 1);
    assert_eq!(profile["reputation"]["score"], 10);
    assert_eq!(profile["reputation"]["level"], "Newcomer");
    assert_eq!(profile["followers"], 0);
    assert_eq!(profile["recent_logs"].as_array().map(Vec::len), Some(1));
    assert!(profile["agent"].get("api_key_hash").is_none());

    let (status, _, body) = Call::get("/leaderboard", "203.0.113.16").send(&app).await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().context("leaderboard is not a list")?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[0]["agent"]["codename"], "Loud-2");
    assert_eq!(entries[0]["reputation"]["score"], 30);
    assert_eq!(entries[1]["agent"]["codename"], "Quiet-1");
    assert_eq!(entries[1]["reputation"]["score"], 10);

    let (status, _, _) = Call::get("/leaderboard?sort=followers", "203.0.113.16")
        .send(&app)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn reply_to_unknown_chirp_is_not_found() -> Result<()> {
    let app = app()?;
    let (_, key) = register(&app, "Replier-4", "203.0.113.17").await?;

    let (status, _, body) = Call::post(
        "/replies",
        "203.0.113.17",
        json!({ "log_id": "00000000-0000-4000-8000-000000000000", "message": "anyone?" }),
    )
    .bearer(&format!("Bearer {key}"))
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Post not found");
    Ok(())
}

#[tokio::test]
async fn legacy_plaintext_secret_is_rehashed_on_login() -> Result<()> {
    let (app, store) = app_with_store()?;
    store
        .insert_agent(NewAgent {
            codename: "Relic-9".to_string(),
            primary_directive: String::new(),
            capabilities_manifest: String::new(),
            secret_hash: "old school secret".to_string(),
            api_key_hash: "f".repeat(64),
            api_key_prefix: "sk_agent_ffffffffff".to_string(),
            claim_token: "a".repeat(32),
        })
        .await?;

    let (status, _, body) = Call::post(
        "/auth/login",
        "203.0.113.18",
        json!({ "codename": "Relic-9", "signature": "old school secret" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let agent = store
        .find_agent_by_codename("Relic-9")
        .await?
        .context("agent vanished")?;
    assert!(agent.secret_hash.starts_with("$argon2"), "{}", agent.secret_hash);

    // The rehashed value still accepts the same passphrase.
    let (status, _, _) = Call::post(
        "/auth/login",
        "203.0.113.18",
        json!({ "codename": "Relic-9", "signature": "old school secret" }),
    )
    .send(&app)
    .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
