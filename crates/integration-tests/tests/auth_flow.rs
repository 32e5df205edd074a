//! Integration tests for the session lifecycle.
//!
//! Every test drives the auth store and router of a full app over the
//! in-memory backend.

use pipecrm_client::router::RouteName;
use pipecrm_client::store::MFA_PENDING_KEY;
use pipecrm_client::supabase::{IS_AUTHENTICATED_KEY, RemoteError, SessionStorage};
use pipecrm_client::testing::{AUTHORIZE_URL, DEFAULT_OTP_CODE};
use pipecrm_core::{AppErrorCode, ErrorOrigin};
use pipecrm_integration_tests::{PASSWORD, SITE_URL, TestContext};

const EMAIL: &str = "ana@pipecrm.dev";

fn flag(ctx: &TestContext, key: &str) -> Option<String> {
    ctx.storage.flag(key).expect("flag")
}

// ============================================================================
// Password Sign-In
// ============================================================================

#[tokio::test]
async fn test_sign_in_survives_reload() {
    let ctx = TestContext::new();
    let user = ctx.signed_in(EMAIL).await;

    assert_eq!(user.email, EMAIL);
    assert!(!user.is_admin);
    assert_eq!(flag(&ctx, IS_AUTHENTICATED_KEY).as_deref(), Some("1"));

    let reloaded = ctx.reload();
    let navigation = reloaded
        .app
        .router()
        .navigate("/dashboard")
        .await
        .expect("navigate");

    assert!(!navigation.was_redirected());
    assert_eq!(navigation.route.name, RouteName::Dashboard);
    assert_eq!(reloaded.app.store().user(), Some(user));
}

#[tokio::test]
async fn test_wrong_password_is_auth_error() {
    let ctx = TestContext::new();
    ctx.register(EMAIL);

    ctx.app.store().sign_in(EMAIL, "wrong-password").await;

    let store = ctx.app.store();
    let error = store.error().expect("error");
    assert_eq!(error.code(), AppErrorCode::Auth);
    assert_eq!(error.origin(), ErrorOrigin::Remote);
    assert_eq!(error.message(), "Invalid email or password.");
    assert!(!store.is_authenticated());
    assert!(!store.loading());
    assert_eq!(ctx.sink.contexts(), vec!["auth.signIn".to_string()]);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_backend() {
    let ctx = TestContext::new();

    ctx.app.store().sign_in("not-an-email", "123").await;

    let error = ctx.app.store().error().expect("error");
    assert_eq!(error.code(), AppErrorCode::Validation);
    assert!(ctx.backend.auth_calls().is_empty());
}

// ============================================================================
// Emailed One-Time Code
// ============================================================================

#[tokio::test]
async fn test_email_otp_flow() {
    let ctx = TestContext::with_email_otp();
    ctx.register(EMAIL);
    let store = ctx.app.store();

    store.sign_in(EMAIL, PASSWORD).await;

    assert!(store.requires_mfa());
    assert!(!store.is_authenticated());
    assert_eq!(ctx.backend.sent_codes(), vec![EMAIL.to_string()]);
    assert_eq!(flag(&ctx, MFA_PENDING_KEY).as_deref(), Some("1"));

    let navigation = ctx.app.router().navigate("/auth/mfa").await.expect("navigate");
    assert!(!navigation.was_redirected());

    store.verify_mfa("000000").await;
    assert!(store.error().is_some());
    assert!(store.requires_mfa());
    assert!(!store.is_authenticated());

    store.verify_mfa(DEFAULT_OTP_CODE).await;
    assert!(store.error().is_none());
    assert!(!store.requires_mfa());
    assert_eq!(store.user().map(|u| u.email).as_deref(), Some(EMAIL));
    assert_eq!(flag(&ctx, MFA_PENDING_KEY).as_deref(), Some("0"));

    let navigation = ctx.app.router().navigate("/pipeline").await.expect("navigate");
    assert!(!navigation.was_redirected());
}

#[tokio::test]
async fn test_malformed_code_is_rejected_locally() {
    let ctx = TestContext::with_email_otp();
    ctx.register(EMAIL);
    ctx.app.store().sign_in(EMAIL, PASSWORD).await;
    let calls_before = ctx.backend.auth_calls().len();

    ctx.app.store().verify_mfa("12ab").await;

    let error = ctx.app.store().error().expect("error");
    assert_eq!(error.code(), AppErrorCode::Validation);
    assert_eq!(ctx.backend.auth_calls().len(), calls_before);
}

#[tokio::test]
async fn test_reload_during_mfa_does_not_skip_code() {
    let ctx = TestContext::with_email_otp();
    ctx.register(EMAIL);
    ctx.app.store().sign_in(EMAIL, PASSWORD).await;

    // The backend holds a session from the password step.
    assert!(ctx.backend.session().is_some());

    let reloaded = ctx.reload();
    let navigation = reloaded
        .app
        .router()
        .navigate("/dashboard")
        .await
        .expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert_eq!(navigation.route.full_path, "/auth/login?redirect=%2Fdashboard");
    assert!(reloaded.app.store().requires_mfa());

    let navigation = reloaded
        .app
        .router()
        .navigate("/auth/mfa")
        .await
        .expect("navigate");
    assert!(!navigation.was_redirected());

    reloaded.app.store().verify_mfa(DEFAULT_OTP_CODE).await;
    assert!(reloaded.app.store().is_authenticated());
}

#[tokio::test]
async fn test_bare_callback_does_not_skip_code() {
    let ctx = TestContext::with_email_otp();
    ctx.register(EMAIL);
    let store = ctx.app.store();
    store.sign_in(EMAIL, PASSWORD).await;
    assert!(store.requires_mfa());

    let bare = url::Url::parse(&format!("{SITE_URL}/auth/callback")).expect("url");
    store.handle_auth_callback(Some(&bare)).await;

    assert!(!store.is_authenticated());
    assert!(store.requires_mfa());
    assert_eq!(flag(&ctx, MFA_PENDING_KEY).as_deref(), Some("1"));

    let navigation = ctx
        .app
        .router()
        .navigate("/dashboard")
        .await
        .expect("navigate");
    assert_eq!(navigation.route.name, RouteName::Login);
}

#[tokio::test]
async fn test_unsent_code_does_not_sign_in_after_reload() {
    let ctx = TestContext::with_email_otp();
    ctx.register(EMAIL);
    ctx.backend
        .fail_auth_call("send_email_otp", RemoteError::auth(429, "Too many requests"));

    ctx.app.store().sign_in(EMAIL, PASSWORD).await;

    assert!(ctx.app.store().error().is_some());
    assert!(!ctx.app.store().is_authenticated());
    assert!(ctx.backend.sent_codes().is_empty());

    let reloaded = ctx.reload();
    let navigation = reloaded
        .app
        .router()
        .navigate("/dashboard")
        .await
        .expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert!(!reloaded.app.store().is_authenticated());
}

// ============================================================================
// Google Sign-In
// ============================================================================

#[tokio::test]
async fn test_google_sign_in_through_callback() {
    let ctx = TestContext::new();
    ctx.register(EMAIL);
    let store = ctx.app.store();

    let redirect = store.sign_in_with_google().expect("redirect");
    assert!(redirect.url.as_str().starts_with(AUTHORIZE_URL));
    assert_eq!(
        ctx.backend.redirects(),
        vec![format!("{SITE_URL}/auth/callback")]
    );
    assert!(!store.is_authenticated());

    let callback = ctx
        .backend
        .callback_url(SITE_URL, EMAIL)
        .expect("callback url");
    let navigation = ctx
        .app
        .router()
        .navigate("/auth/callback")
        .await
        .expect("navigate");
    assert!(!navigation.was_redirected());

    store.handle_auth_callback(Some(&callback)).await;

    assert!(store.error().is_none());
    assert_eq!(store.user().map(|u| u.email).as_deref(), Some(EMAIL));

    // The callback page stays reachable once signed in.
    let navigation = ctx
        .app
        .router()
        .navigate("/auth/callback")
        .await
        .expect("navigate");
    assert!(!navigation.was_redirected());
}

#[tokio::test]
async fn test_callback_with_unknown_token_fails() {
    let ctx = TestContext::new();
    let forged = url::Url::parse(&format!(
        "{SITE_URL}/auth/callback#access_token=forged&refresh_token=x"
    ))
    .expect("url");

    ctx.app.store().handle_auth_callback(Some(&forged)).await;

    assert!(ctx.app.store().error().is_some());
    assert!(!ctx.app.store().is_authenticated());
    assert_eq!(
        ctx.sink.contexts(),
        vec!["auth.handleAuthCallback".to_string()]
    );
}

// ============================================================================
// Account Lifecycle
// ============================================================================

#[tokio::test]
async fn test_sign_up_does_not_sign_in() {
    let ctx = TestContext::new();
    let store = ctx.app.store();

    store.sign_up(EMAIL, PASSWORD, PASSWORD).await;

    assert!(store.error().is_none());
    assert!(!store.is_authenticated());
    assert_eq!(ctx.backend.password_of(EMAIL).as_deref(), Some(PASSWORD));
    assert_eq!(
        ctx.backend.redirects(),
        vec![format!("{SITE_URL}/auth/callback")]
    );
}

#[tokio::test]
async fn test_sign_up_mismatch_is_validation_error() {
    let ctx = TestContext::new();

    ctx.app
        .store()
        .sign_up(EMAIL, PASSWORD, "something-else")
        .await;

    let error = ctx.app.store().error().expect("error");
    assert_eq!(error.code(), AppErrorCode::Validation);
    assert!(ctx.backend.auth_calls().is_empty());
}

#[tokio::test]
async fn test_password_recovery() {
    let ctx = TestContext::new();
    ctx.register(EMAIL);
    let store = ctx.app.store();

    store.forgot_password(EMAIL).await;
    assert!(store.error().is_none());
    assert_eq!(
        ctx.backend.redirects(),
        vec![format!("{SITE_URL}/auth/reset-password")]
    );

    // Following the emailed link establishes a recovery session.
    ctx.backend.sign_in_as(EMAIL).expect("account");
    store.initialize_session().await;
    store.reset_password("brand-new-pass", "brand-new-pass").await;

    assert!(store.error().is_none());
    assert_eq!(
        ctx.backend.password_of(EMAIL).as_deref(),
        Some("brand-new-pass")
    );
}

#[tokio::test]
async fn test_sign_out_locks_protected_routes() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;
    let store = ctx.app.store();

    store.sign_out().await;

    assert!(!store.is_authenticated());
    assert!(ctx.backend.session().is_none());
    assert_eq!(flag(&ctx, IS_AUTHENTICATED_KEY).as_deref(), Some("0"));

    let navigation = ctx.app.router().navigate("/deals").await.expect("navigate");
    assert_eq!(navigation.route.full_path, "/auth/login?redirect=%2Fdeals");
}

#[tokio::test]
async fn test_failed_sign_out_keeps_user() {
    let ctx = TestContext::new();
    let user = ctx.signed_in(EMAIL).await;
    ctx.backend
        .fail_next_auth(RemoteError::Transport("connection reset".into()));

    ctx.app.store().sign_out().await;

    let store = ctx.app.store();
    assert_eq!(store.user(), Some(user));
    assert_eq!(store.error().map(|e| e.code()), Some(AppErrorCode::Network));
}

#[tokio::test]
async fn test_offline_restore_is_reported() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    let reloaded = ctx.reload();
    reloaded
        .backend
        .fail_next_auth(RemoteError::Transport("offline".into()));
    let navigation = reloaded
        .app
        .router()
        .navigate("/contacts")
        .await
        .expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert!(!reloaded.app.store().is_authenticated());
    assert_eq!(
        reloaded.sink.captured(),
        vec![(AppErrorCode::Network, "auth.initializeSession".to_string())]
    );
}
