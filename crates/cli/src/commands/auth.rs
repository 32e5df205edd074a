//! Session commands.
//!
//! The session persists in the session file, so `login` in one run and
//! `dashboard` in the next share it.

use std::io::Write;

use pipecrm_client::AppContext;
use pipecrm_client::supabase::{AuthApi, DataApi};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use super::{CliError, enter, store_outcome};
use crate::output::Output;

/// Sign in with email and password, asking for the emailed code when the
/// account needs one.
pub async fn login<B>(
    ctx: &AppContext<B>,
    out: &Output,
    email: &str,
    password: &str,
) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/login").await?;

    let store = ctx.store();
    store.sign_in(email, password).await;
    store_outcome(ctx)?;

    if store.requires_mfa() {
        out.message("A sign-in code was sent to your email. Enter it below:")?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await? {
            Some(code) if !code.trim().is_empty() => return mfa(ctx, out, code.trim()).await,
            _ => return out.message("No code entered. Finish with `pipecrm mfa <CODE>`."),
        }
    }

    whoami(ctx, out).await
}

/// Complete a pending sign-in with the emailed code.
pub async fn mfa<B>(ctx: &AppContext<B>, out: &Output, code: &str) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/mfa").await?;

    ctx.store().verify_mfa(code).await;
    store_outcome(ctx)?;

    whoami(ctx, out).await
}

pub async fn signup<B>(
    ctx: &AppContext<B>,
    out: &Output,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/register").await?;

    ctx.store().sign_up(email, password, confirm_password).await;
    store_outcome(ctx)?;

    out.message("Account created. Check your email to confirm it, then sign in.")
}

/// Print the provider URL that starts a Google sign-in.
pub async fn google<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/login").await?;

    let Some(redirect) = ctx.store().sign_in_with_google() else {
        store_outcome(ctx)?;
        return Ok(());
    };

    out.show(&redirect.url, |w, url| {
        writeln!(w, "Open this URL in a browser:")?;
        writeln!(w, "{url}")?;
        writeln!(
            w,
            "Then run `pipecrm callback <URL>` with the address the browser lands on."
        )
    })
}

/// Finish a redirect-based sign-in from the URL the browser landed on.
pub async fn callback<B>(ctx: &AppContext<B>, out: &Output, url: &Url) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/callback").await?;

    ctx.store().handle_auth_callback(Some(url)).await;
    store_outcome(ctx)?;

    whoami(ctx, out).await
}

pub async fn forgot<B>(ctx: &AppContext<B>, out: &Output, email: &str) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/auth/forgot-password").await?;

    ctx.store().forgot_password(email).await;
    store_outcome(ctx)?;

    out.message("If the account exists, a recovery link is on its way.")
}

/// Set a new password.
///
/// Runs without navigating: the recovery session a reset needs already
/// counts as signed in, and the reset page is public.
pub async fn reset<B>(
    ctx: &AppContext<B>,
    out: &Output,
    password: &str,
    confirm_password: &str,
) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let store = ctx.store();
    store.initialize_session().await;
    store.reset_password(password, confirm_password).await;
    store_outcome(ctx)?;

    out.message("Password updated.")
}

pub async fn logout<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let store = ctx.store();
    store.initialize_session().await;
    store.sign_out().await;
    store_outcome(ctx)?;

    out.message("Signed out.")
}

/// Show the signed-in user.
pub async fn whoami<B>(ctx: &AppContext<B>, out: &Output) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    enter(ctx, "/dashboard").await?;

    let state = ctx.store().snapshot();
    out.show(&state, |w, state| match &state.user {
        Some(user) => writeln!(w, "Signed in as {} ({})", user.email, user.id),
        None => writeln!(w, "Not signed in"),
    })
}

/// Navigate to `path` and report where the guard lands.
pub async fn open<B>(ctx: &AppContext<B>, out: &Output, path: &str) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let navigation = ctx.router().navigate(path).await?;

    let report = serde_json::json!({
        "path": navigation.route.full_path,
        "route": format!("{:?}", navigation.route.name),
        "redirectedFrom": navigation.redirected_from,
    });
    out.show(&report, |w, _| {
        for hop in &navigation.redirected_from {
            writeln!(w, "{hop} ->")?;
        }
        writeln!(w, "{} ({:?})", navigation.route.full_path, navigation.route.name)
    })
}
