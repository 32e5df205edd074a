//! GoTrue endpoints.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::AuthErrorBody;
use super::{
    AuthApi, AuthResponse, OAuthProvider, OtpType, RemoteError, RemoteUser, Session,
    SupabaseClient, now,
};

impl SupabaseClient {
    /// The in-memory session, falling back to storage, refreshed if expired.
    pub(super) async fn fresh_session(&self) -> Result<Option<Session>, RemoteError> {
        let held = self.current_session();
        let session = match held {
            Some(session) => session,
            None => match self.inner.storage.load_session()? {
                Some(session) => session,
                None => return Ok(None),
            },
        };

        if !session.is_expired(now()) {
            self.keep_in_memory(&session);
            return Ok(Some(session));
        }

        debug!(user_id = %session.user.id, "Access token expired, refreshing");
        let refreshed = self.refresh(&session.refresh_token).await?;
        self.store_session(refreshed.clone())?;
        Ok(Some(refreshed))
    }

    fn keep_in_memory(&self, session: &Session) {
        let mut held = self
            .inner
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if held.is_none() {
            *held = Some(session.clone());
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let mut url = self.endpoint("auth", "/token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");

        let response = self
            .inner
            .http
            .post(url)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let session: Session = handle_auth_response(response).await?;
        Ok(session.anchored(now()))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<RemoteUser, RemoteError> {
        let response = self
            .inner
            .http
            .get(self.endpoint("auth", "/user")?)
            .bearer_auth(access_token)
            .send()
            .await?;
        handle_auth_response(response).await
    }

    fn with_redirect(&self, path: &str, redirect_to: &str) -> Result<Url, RemoteError> {
        let mut url = self.endpoint("auth", path)?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    /// Send a JSON body and expect an empty (or ignorable) success response.
    async fn post_unit(&self, url: Url, body: &Value) -> Result<(), RemoteError> {
        let response = self.inner.http.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(parse_auth_error(response).await)
    }
}

impl AuthApi for SupabaseClient {
    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, RemoteError> {
        let mut url = self.endpoint("auth", "/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .inner
            .http
            .post(url)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session: Session = handle_auth_response(response).await?;
        let session = session.anchored(now());
        let user = session.user.clone();
        self.store_session(session.clone())?;

        debug!(user_id = %user.id, "Password sign-in succeeded");
        Ok(AuthResponse {
            session: Some(session),
            user: Some(user),
        })
    }

    #[instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<AuthResponse, RemoteError> {
        let url = self.with_redirect("/signup", redirect_to)?;
        let response = self
            .inner
            .http
            .post(url)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        // Autoconfirm projects answer with a session, the others with a user.
        let body: Value = handle_auth_response(response).await?;
        if body.get("access_token").is_some() {
            let session: Session = serde_json::from_value(body)
                .map_err(|e| RemoteError::Decode(e.to_string()))?;
            let user = session.user.clone();
            return Ok(AuthResponse {
                session: Some(session.anchored(now())),
                user: Some(user),
            });
        }

        let user: RemoteUser =
            serde_json::from_value(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(AuthResponse {
            session: None,
            user: Some(user),
        })
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<Url, RemoteError> {
        let mut url = self.endpoint("auth", "/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    #[instrument(skip_all)]
    async fn session_from_redirect(&self, callback: &Url) -> Result<Option<Session>, RemoteError> {
        let params = RedirectParams::from_url(callback);

        if let Some(error) = params.error {
            return Err(RemoteError::Auth {
                status: 400,
                code: params.error_code.or_else(|| Some(error.clone())),
                message: params.error_description.unwrap_or(error),
            });
        }

        let (Some(access_token), Some(refresh_token)) = (params.access_token, params.refresh_token)
        else {
            debug!("Redirect carries no session tokens");
            return Ok(None);
        };

        let user = self.fetch_user(&access_token).await?;
        let expires_at = params.expires_at.or_else(|| jwt_expiry(&access_token));
        let session = Session {
            expires_at,
            access_token,
            refresh_token,
            token_type: params.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_in: params.expires_in,
            user,
        }
        .anchored(now());

        self.store_session(session.clone())?;
        Ok(Some(session))
    }

    #[instrument(skip(self))]
    async fn get_user(&self) -> Result<Option<RemoteUser>, RemoteError> {
        let Some(session) = self.fresh_session().await? else {
            return Ok(None);
        };
        self.fetch_user(&session.access_token).await.map(Some)
    }

    #[instrument(skip(self))]
    async fn send_email_otp(&self, email: &str) -> Result<(), RemoteError> {
        let url = self.endpoint("auth", "/otp")?;
        self.post_unit(url, &json!({ "email": email, "create_user": false }))
            .await
    }

    #[instrument(skip(self, token))]
    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpType,
    ) -> Result<AuthResponse, RemoteError> {
        let response = self
            .inner
            .http
            .post(self.endpoint("auth", "/verify")?)
            .json(&json!({ "email": email, "token": token, "type": kind }))
            .send()
            .await?;

        let session: Session = handle_auth_response(response).await?;
        let session = session.anchored(now());
        let user = session.user.clone();
        self.store_session(session.clone())?;

        Ok(AuthResponse {
            session: Some(session),
            user: Some(user),
        })
    }

    #[instrument(skip(self))]
    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), RemoteError> {
        let url = self.with_redirect("/recover", redirect_to)?;
        self.post_unit(url, &json!({ "email": email })).await
    }

    #[instrument(skip_all)]
    async fn update_password(&self, password: &str) -> Result<RemoteUser, RemoteError> {
        let Some(session) = self.fresh_session().await? else {
            return Err(RemoteError::auth(401, "Auth session missing!"));
        };

        let response = self
            .inner
            .http
            .put(self.endpoint("auth", "/user")?)
            .bearer_auth(&session.access_token)
            .json(&json!({ "password": password }))
            .send()
            .await?;

        let user: RemoteUser = handle_auth_response(response).await?;
        self.store_session(Session {
            user: user.clone(),
            ..session
        })?;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), RemoteError> {
        let held = match self.current_session() {
            Some(session) => Some(session),
            None => self.inner.storage.load_session().unwrap_or_else(|e| {
                warn!(error = %e, "Stored session unreadable, signing out locally");
                None
            }),
        };
        let Some(session) = held else {
            return self.drop_session();
        };

        let response = self
            .inner
            .http
            .post(self.endpoint("auth", "/logout")?)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        // 401/403/404: the session is already gone server side.
        if response.status().is_success() || matches!(status, 401 | 403 | 404) {
            return self.drop_session();
        }

        Err(parse_auth_error(response).await)
    }

    #[instrument(skip(self))]
    async fn restore_session(&self) -> Result<Option<Session>, RemoteError> {
        match self.fresh_session().await {
            Ok(session) => Ok(session),
            Err(error @ RemoteError::Auth { .. }) => {
                warn!(error = %error, "Stored session rejected, discarding it");
                self.drop_session()?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

/// Parameters GoTrue appends to redirect URLs, in the fragment (implicit
/// flow) or the query string (errors).
#[derive(Debug, Default)]
struct RedirectParams {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    error: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
}

impl RedirectParams {
    fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        let fragment = url.fragment().unwrap_or_default();
        let pairs = url
            .query_pairs()
            .chain(url::form_urlencoded::parse(fragment.as_bytes()));

        for (key, value) in pairs {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => params.access_token = Some(value),
                "refresh_token" => params.refresh_token = Some(value),
                "token_type" => params.token_type = Some(value),
                "expires_in" => params.expires_in = value.parse().ok(),
                "expires_at" => params.expires_at = value.parse().ok(),
                "error" => params.error = Some(value),
                "error_code" => params.error_code = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }

        params
    }
}

/// `exp` claim of a JWT, without verifying the signature.
fn jwt_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok().map(|c| c.exp)
}

/// Handle an auth API response and parse JSON.
async fn handle_auth_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    if response.status().is_success() {
        return response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()));
    }

    Err(parse_auth_error(response).await)
}

/// Parse an error response from the auth API.
async fn parse_auth_error(response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<AuthErrorBody>(&body)
        .unwrap_or_default()
        .into_error(status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_params_from_fragment() {
        let url = Url::parse(
            "http://localhost:5173/auth/callback#access_token=abc&refresh_token=def&expires_in=3600&expires_at=1700000000&token_type=bearer&type=signup",
        )
        .unwrap();
        let params = RedirectParams::from_url(&url);
        assert_eq!(params.access_token.as_deref(), Some("abc"));
        assert_eq!(params.refresh_token.as_deref(), Some("def"));
        assert_eq!(params.expires_in, Some(3600));
        assert_eq!(params.expires_at, Some(1_700_000_000));
        assert!(params.error.is_none());
    }

    #[test]
    fn test_redirect_params_error_in_query() {
        let url = Url::parse(
            "http://localhost:5173/auth/callback?error=access_denied&error_code=otp_expired&error_description=Email+link+is+invalid+or+has+expired",
        )
        .unwrap();
        let params = RedirectParams::from_url(&url);
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_code.as_deref(), Some("otp_expired"));
        assert_eq!(
            params.error_description.as_deref(),
            Some("Email link is invalid or has expired")
        );
    }

    #[test]
    fn test_jwt_expiry() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u","exp":1700000123}"#);
        let token = format!("header.{payload}.signature");
        assert_eq!(jwt_expiry(&token), Some(1_700_000_123));
        assert_eq!(jwt_expiry("not-a-jwt"), None);
    }
}
