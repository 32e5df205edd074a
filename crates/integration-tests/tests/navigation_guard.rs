//! Integration tests for guarded navigation.
//!
//! The router restores the session once, then every navigation goes
//! through the guard with the store's current state.

use pipecrm_client::RouterError;
use pipecrm_client::router::{BootstrapState, RouteName};
use pipecrm_core::{AppError, AppErrorCode, DealId, ErrorOrigin};
use pipecrm_integration_tests::TestContext;

const EMAIL: &str = "bruno@pipecrm.dev";

// ============================================================================
// Route Resolution
// ============================================================================

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let ctx = TestContext::new();

    let error = ctx
        .app
        .router()
        .navigate("/reports")
        .await
        .expect_err("no such route");
    assert_eq!(error, RouterError::NotFound("/reports".into()));

    let app_error = AppError::from(error);
    assert_eq!(app_error.code(), AppErrorCode::NotFound);
    assert_eq!(app_error.origin(), ErrorOrigin::Ui);
}

#[tokio::test]
async fn test_relative_path_is_invalid() {
    let ctx = TestContext::new();

    let error = ctx
        .app
        .router()
        .navigate("deals")
        .await
        .expect_err("relative path");
    assert!(matches!(error, RouterError::InvalidPath(_)));
}

#[tokio::test]
async fn test_deal_detail_params_and_query() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;
    let id = DealId::random();

    let navigation = ctx
        .app
        .router()
        .navigate(&format!("/deals/{id}?tab=notes"))
        .await
        .expect("navigate");

    assert!(!navigation.was_redirected());
    assert_eq!(navigation.route.name, RouteName::DealDetail);
    assert_eq!(navigation.route.param("id"), Some(id.to_string().as_str()));
    assert_eq!(navigation.route.query_value("tab"), Some("notes"));
}

#[tokio::test]
async fn test_trailing_slash_is_ignored() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    let navigation = ctx.app.router().navigate("/deals/").await.expect("navigate");
    assert_eq!(navigation.route.name, RouteName::Deals);
    assert_eq!(navigation.route.path, "/deals");
}

// ============================================================================
// Protected and Public Routes
// ============================================================================

#[tokio::test]
async fn test_root_redirects_home_then_to_login() {
    let ctx = TestContext::new();

    let navigation = ctx.app.router().navigate("/").await.expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert_eq!(navigation.route.query_value("redirect"), Some("/dashboard"));
    assert_eq!(
        navigation.redirected_from,
        vec!["/".to_string(), "/dashboard".to_string()]
    );
}

#[tokio::test]
async fn test_root_lands_on_dashboard_when_signed_in() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    let navigation = ctx.app.router().navigate("/").await.expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Dashboard);
    assert_eq!(navigation.redirected_from, vec!["/".to_string()]);
}

#[tokio::test]
async fn test_login_redirect_keeps_full_path() {
    let ctx = TestContext::new();

    let navigation = ctx
        .app
        .router()
        .navigate("/activities?type=call")
        .await
        .expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert_eq!(
        navigation.route.query_value("redirect"),
        Some("/activities?type=call")
    );
}

#[tokio::test]
async fn test_auth_pages_send_signed_in_users_home() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    for path in ["/auth/login", "/auth/register", "/auth/forgot-password"] {
        let navigation = ctx.app.router().navigate(path).await.expect("navigate");
        assert_eq!(navigation.route.name, RouteName::Dashboard, "{path}");
    }
}

#[tokio::test]
async fn test_callback_is_reachable_when_signed_in() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    let navigation = ctx
        .app
        .router()
        .navigate("/auth/callback?code=abc")
        .await
        .expect("navigate");

    assert!(!navigation.was_redirected());
    assert_eq!(navigation.route.name, RouteName::AuthCallback);
}

#[tokio::test]
async fn test_sign_out_then_protected_route() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;
    let router = ctx.app.router();

    let before = router.navigate("/companies").await.expect("navigate");
    assert!(!before.was_redirected());

    ctx.app.store().sign_out().await;

    let after = router.navigate("/companies").await.expect("navigate");
    assert_eq!(after.route.name, RouteName::Login);
    assert_eq!(after.route.query_value("redirect"), Some("/companies"));
}

// ============================================================================
// MFA Step and Admin
// ============================================================================

#[tokio::test]
async fn test_mfa_step_without_challenge() {
    let ctx = TestContext::new();

    let navigation = ctx.app.router().navigate("/auth/mfa").await.expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Login);
    assert_eq!(navigation.route.full_path, "/auth/login?mfa=invalid");
}

#[tokio::test]
async fn test_mfa_step_when_signed_in() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;

    let navigation = ctx.app.router().navigate("/auth/mfa").await.expect("navigate");

    assert_eq!(navigation.route.name, RouteName::Dashboard);
}

#[tokio::test]
async fn test_admin_route() {
    let ctx = TestContext::new();

    let signed_out = ctx.app.router().navigate("/admin").await.expect("navigate");
    assert_eq!(signed_out.route.full_path, "/auth/login?redirect=%2Fadmin");

    ctx.signed_in(EMAIL).await;
    let signed_in = ctx.app.router().navigate("/admin").await.expect("navigate");
    assert_eq!(signed_in.route.name, RouteName::Dashboard);
}

// ============================================================================
// Session Bootstrap
// ============================================================================

#[tokio::test]
async fn test_session_restored_once() {
    let ctx = TestContext::new();
    ctx.signed_in(EMAIL).await;
    let reloaded = ctx.reload();
    let router = reloaded.app.router();

    assert_eq!(router.bootstrap_state(), BootstrapState::Uninitialized);

    let (first, second) = futures::join!(router.navigate("/dashboard"), router.navigate("/deals"));
    assert!(!first.expect("navigate").was_redirected());
    assert!(!second.expect("navigate").was_redirected());

    router.navigate("/contacts").await.expect("navigate");

    let restores = reloaded
        .backend
        .auth_calls()
        .into_iter()
        .filter(|call| *call == "restore_session")
        .count();
    assert_eq!(restores, 1);
    assert_eq!(router.bootstrap_state(), BootstrapState::Ready);
}

#[tokio::test]
async fn test_navigation_clears_store_error() {
    let ctx = TestContext::new();
    ctx.register(EMAIL);
    ctx.app.store().sign_in(EMAIL, "wrong-password").await;
    assert!(ctx.app.store().error().is_some());

    ctx.app.router().navigate("/auth/login").await.expect("navigate");

    assert!(ctx.app.store().error().is_none());
}
