//! Navigation guard.

use url::form_urlencoded;

use super::routes::{HOME_PATH, LOGIN_PATH, ResolvedRoute};
use crate::store::AuthStoreState;

/// Outcome of guarding one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteGuardDecision {
    Proceed,
    /// Sign in first, then come back to `redirect`.
    RedirectToLogin { redirect: String },
    RedirectHome,
    /// The MFA step was opened without a pending challenge.
    RedirectToLoginMfaInvalid,
}

impl RouteGuardDecision {
    /// Path to navigate to instead, `None` for [`RouteGuardDecision::Proceed`].
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Proceed => None,
            Self::RedirectToLogin { redirect } => Some(login_with("redirect", redirect)),
            Self::RedirectHome => Some(HOME_PATH.to_string()),
            Self::RedirectToLoginMfaInvalid => Some(login_with("mfa", "invalid")),
        }
    }
}

fn login_with(key: &str, value: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish();
    format!("{LOGIN_PATH}?{query}")
}

/// Decide a navigation to `to` from the current auth state.
///
/// Rules, first match wins:
///
/// 1. The MFA step needs a pending challenge (else login, MFA invalid) and
///    sends already signed-in users home.
/// 2. Public routes send signed-in users home, except the OAuth callback.
/// 3. Protected routes send signed-out users to login, remembering `to`.
/// 4. Admin routes send non-admins home.
#[must_use]
pub fn decide(to: &ResolvedRoute, auth: &AuthStoreState) -> RouteGuardDecision {
    let authenticated = auth.user.is_some();

    if to.is_mfa_step() {
        if !auth.requires_mfa {
            return RouteGuardDecision::RedirectToLoginMfaInvalid;
        }
        if authenticated {
            return RouteGuardDecision::RedirectHome;
        }
        return RouteGuardDecision::Proceed;
    }

    if to.meta.public && authenticated && !to.is_oauth_callback() {
        return RouteGuardDecision::RedirectHome;
    }

    if to.meta.requires_auth && !authenticated {
        return RouteGuardDecision::RedirectToLogin {
            redirect: to.full_path.clone(),
        };
    }

    let is_admin = auth.user.as_ref().is_some_and(|u| u.is_admin);
    if to.meta.requires_admin && !is_admin {
        return RouteGuardDecision::RedirectHome;
    }

    RouteGuardDecision::Proceed
}
