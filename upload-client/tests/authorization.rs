mod common;

use common::{CannedCode, app, credential, store_with, tiktok, token_body};
use jiff::SignedDuration;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use resumable_upload::{
    AuthError, AuthorizationManager, Environment, NonInteractive, Platform, Timeouts, http_client,
};

const TOKEN_PATH: &str = "/v2/oauth/token/";

fn manager<C: resumable_upload::AuthorizationCodeProvider>(
    server: &mockito::ServerGuard,
    store: resumable_upload::CredentialStore,
    codes: C,
) -> AuthorizationManager<resumable_upload::TikTok, C> {
    AuthorizationManager::new(
        tiktok(server),
        app(),
        Environment::Sandbox,
        store,
        codes,
        http_client(&Timeouts::default()).unwrap(),
    )
}

#[tokio::test]
async fn cached_credential_is_used_without_network() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let cached = credential(Platform::TikTok, SignedDuration::from_mins(30), Some("rft.1"));
    let (_dir, store) = store_with(Some(&cached)).await;
    let codes = CannedCode::new("unused");
    let auth = manager(&server, store, &codes);

    let got = auth.obtain().await.unwrap();
    assert_eq!(got.access_token.secret(), "act.cached");
    assert_eq!(got.expires_at, cached.expires_at);
    assert_eq!(codes.calls(), 0);

    token.assert_async().await;
}

#[tokio::test]
async fn expired_credential_is_refreshed_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "rft.1".into()),
            Matcher::UrlEncoded("client_key".into(), "awtestkey".into()),
            Matcher::UrlEncoded("client_secret".into(), "test-secret".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("act.refreshed", None))
        .expect(1)
        .create_async()
        .await;

    let stale = credential(Platform::TikTok, SignedDuration::from_mins(-1), Some("rft.1"));
    let (_dir, store) = store_with(Some(&stale)).await;
    let codes = CannedCode::new("unused");
    let auth = manager(&server, store.clone(), &codes);

    let got = auth.obtain().await.unwrap();
    assert_eq!(codes.calls(), 0, "refresh must not prompt");
    assert_eq!(got.access_token.secret(), "act.refreshed");
    // the response carried no refresh token, so the old one is kept
    assert_eq!(got.refresh_token.as_ref().unwrap().secret(), "rft.1");
    assert!(got.is_valid());

    let persisted = store
        .load(Platform::TikTok, Environment::Sandbox)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.access_token.secret(), "act.refreshed");

    // a second call is served from the cache
    let again = auth.obtain().await.unwrap();
    assert_eq!(again.access_token.secret(), "act.refreshed");

    refresh.assert_async().await;
}

#[tokio::test]
async fn rejected_refresh_falls_through_to_interactive_flow() {
    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "invalid_grant", "error_description": "Refresh token is invalid or expired."}"#)
        .expect(1)
        .create_async()
        .await;
    let exchange = server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "fresh-code".into()),
            Matcher::UrlEncoded("redirect_uri".into(), "https://example.github.io/callback".into()),
            Matcher::Regex("code_verifier=[A-Za-z0-9_-]{43}".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("act.new", Some("rft.new")))
        .expect(1)
        .create_async()
        .await;

    let stale = credential(Platform::TikTok, SignedDuration::from_hours(-2), Some("rft.dead"));
    let (_dir, store) = store_with(Some(&stale)).await;
    let codes = CannedCode::new("fresh-code");
    let auth = manager(&server, store, &codes);

    let got = auth.obtain().await.unwrap();
    assert_eq!(codes.calls(), 1);
    assert_eq!(got.access_token.secret(), "act.new");
    assert_eq!(got.refresh_token.as_ref().unwrap().secret(), "rft.new");

    refresh.assert_async().await;
    exchange.assert_async().await;
}

#[tokio::test]
async fn interactive_flow_presents_pkce_authorization_url() {
    let mut server = mockito::Server::new_async().await;
    let exchange = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("act.first", Some("rft.first")))
        .expect(1)
        .create_async()
        .await;

    let (_dir, store) = store_with(None).await;
    let codes = CannedCode::new("c0de");
    let auth = manager(&server, store.clone(), &codes);
    let got = auth.obtain().await.unwrap();
    assert_eq!(got.access_token.secret(), "act.first");

    let url: reqwest::Url = codes.last_url().unwrap().parse().unwrap();
    assert_eq!(url.host_str(), Some("www.tiktok.com"));
    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["client_key"], "awtestkey");
    assert_eq!(query["scope"], "user.info.basic,video.upload,video.publish");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["code_challenge"].len(), 43);
    assert!(!query["state"].is_empty());

    // persisted before being returned
    assert!(
        store
            .load(Platform::TikTok, Environment::Sandbox)
            .await
            .unwrap()
            .is_some()
    );

    exchange.assert_async().await;
}

#[tokio::test]
async fn operator_declining_without_cache_is_denied() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (_dir, store) = store_with(None).await;
    let err = manager(&server, store, NonInteractive)
        .obtain()
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Denied { platform: Platform::TikTok, .. }), "{err:?}");

    token.assert_async().await;
}

#[tokio::test]
async fn stale_credential_without_refresh_token_is_expired() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let stale = credential(Platform::TikTok, SignedDuration::from_mins(-5), None);
    let (_dir, store) = store_with(Some(&stale)).await;
    let codes = CannedCode::declining();
    let auth = manager(&server, store, &codes);

    let err = auth.obtain().await.unwrap_err();
    assert_eq!(codes.calls(), 1);
    assert!(matches!(err, AuthError::Expired { platform: Platform::TikTok }), "{err:?}");

    token.assert_async().await;
}

#[tokio::test]
async fn unreachable_token_endpoint_is_transient() {
    // bind and immediately drop a listener to find a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let adapter = resumable_upload::TikTok::new()
        .with_api_base(format!("http://127.0.0.1:{port}").parse().unwrap());

    let stale = credential(Platform::TikTok, SignedDuration::from_mins(-5), Some("rft.1"));
    let (_dir, store) = store_with(Some(&stale)).await;
    let codes = CannedCode::new("never-used");
    let auth = AuthorizationManager::new(
        adapter,
        app(),
        Environment::Sandbox,
        store,
        codes,
        http_client(&Timeouts::default()).unwrap(),
    );

    let err = auth.obtain().await.unwrap_err();
    assert!(matches!(err, AuthError::Transient { .. }), "{err:?}");
}

#[tokio::test]
async fn revoke_calls_platform_and_forgets_credential() {
    let mut server = mockito::Server::new_async().await;
    let revoke = server
        .mock("POST", "/v2/oauth/revoke/")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("client_key".into(), "awtestkey".into()),
            Matcher::UrlEncoded("token".into(), "act.cached".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let cached = credential(Platform::TikTok, SignedDuration::from_mins(30), Some("rft.1"));
    let (_dir, store) = store_with(Some(&cached)).await;
    let auth = manager(&server, store.clone(), NonInteractive);

    assert!(auth.revoke().await.unwrap());
    assert!(
        store
            .load(Platform::TikTok, Environment::Sandbox)
            .await
            .unwrap()
            .is_none()
    );
    // nothing left to revoke
    assert!(!auth.revoke().await.unwrap());

    revoke.assert_async().await;
}
