//! In-memory backend for tests.
//!
//! [`InMemoryBackend`] implements both [`AuthApi`] and [`DataApi`] over
//! plain maps: accounts with passwords, one active session, and tables of
//! JSON rows. Failures can be scripted per call or per table, and every
//! call is counted so tests can prove that no remote call was made.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! other crates.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use pipecrm_core::{AppError, AppErrorCode, UserId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::models::AuthUser;
use crate::supabase::{
    AuthApi, AuthResponse, DataApi, OAuthProvider, OtpType, Query, RemoteError, RemoteUser,
    Session,
};
use crate::tracking::ErrorSink;

/// One-time code accepted by default.
pub const DEFAULT_OTP_CODE: &str = "123456";

/// Authorize endpoint used by [`AuthApi::authorize_url`].
pub const AUTHORIZE_URL: &str = "https://auth.pipecrm.test/auth/v1/authorize";

struct Account {
    user: RemoteUser,
    password: String,
}

struct BackendState {
    accounts: Vec<Account>,
    session: Option<Session>,
    /// Sessions carried by callback URLs, keyed by access token.
    pending_redirects: HashMap<String, Session>,
    tables: HashMap<String, Vec<Value>>,
    auth_failures: VecDeque<RemoteError>,
    /// One-shot failures for a named auth call.
    call_failures: HashMap<&'static str, RemoteError>,
    /// Next password sign-in answers without session or user.
    omit_identity: bool,
    table_failures: HashMap<String, RemoteError>,
    write_failures: HashMap<String, RemoteError>,
    auth_calls: Vec<&'static str>,
    data_calls: usize,
    sent_codes: Vec<String>,
    redirects: Vec<String>,
    otp_code: String,
    issued: u64,
    clock: DateTime<Utc>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            session: None,
            pending_redirects: HashMap::new(),
            tables: HashMap::new(),
            auth_failures: VecDeque::new(),
            call_failures: HashMap::new(),
            omit_identity: false,
            table_failures: HashMap::new(),
            write_failures: HashMap::new(),
            auth_calls: Vec::new(),
            data_calls: 0,
            sent_codes: Vec::new(),
            redirects: Vec::new(),
            otp_code: DEFAULT_OTP_CODE.to_string(),
            issued: 0,
            clock: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl BackendState {
    fn account(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.user.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
    }

    /// Record an auth call and pop the next scripted failure.
    fn auth_call(&mut self, name: &'static str) -> Result<(), RemoteError> {
        self.auth_calls.push(name);
        if let Some(error) = self.call_failures.remove(name) {
            return Err(error);
        }
        self.auth_failures.pop_front().map_or(Ok(()), Err)
    }

    /// Record a data call and apply the table's scripted failures.
    fn data_call(&mut self, table: &str, write: bool) -> Result<(), RemoteError> {
        self.data_calls += 1;
        if let Some(error) = self.table_failures.get(table) {
            return Err(error.clone());
        }
        match self.write_failures.get(table) {
            Some(error) if write => Err(error.clone()),
            _ => Ok(()),
        }
    }

    fn issue_session(&mut self, user: RemoteUser) -> Session {
        self.issued += 1;
        let now = Utc::now().timestamp();
        Session {
            access_token: format!("access-{}-{}", user.id, self.issued),
            refresh_token: format!("refresh-{}-{}", user.id, self.issued),
            token_type: "bearer".to_string(),
            expires_in: Some(3600),
            expires_at: Some(now + 3600),
            user,
        }
    }

    /// Strictly increasing timestamps, so insertion order is also
    /// `created_at` order.
    fn tick(&mut self) -> String {
        let now = Utc::now();
        self.clock = if now > self.clock {
            now
        } else {
            self.clock + TimeDelta::microseconds(1)
        };
        self.clock.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn matching(&self, query: &Query) -> Vec<Value> {
        let rows = self
            .tables
            .get(query.table_name())
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filters(row, query.filters()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut rows = rows;
        for order in query.ordering().iter().rev() {
            rows.sort_by(|a, b| {
                let ordering = compare(&a[order.column.as_str()], &b[order.column.as_str()]);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }

        for (alias, table) in query.embeds() {
            for row in &mut rows {
                let embedded = self.embedded(row, &alias, &table);
                if let Some(object) = row.as_object_mut() {
                    object.insert(alias.clone(), embedded);
                }
            }
        }
        rows
    }

    /// The `table` row referenced by `row` through `<alias>_id` (or the
    /// singular of `alias`).
    fn embedded(&self, row: &Value, alias: &str, table: &str) -> Value {
        let singular = alias.strip_suffix('s').unwrap_or(alias);
        let key = row
            .get(format!("{alias}_id"))
            .or_else(|| row.get(format!("{singular}_id")));

        key.and_then(|key| {
            self.tables
                .get(table)?
                .iter()
                .find(|candidate| candidate.get("id") == Some(key))
                .cloned()
        })
        .unwrap_or(Value::Null)
    }

    fn insert_row(&mut self, table: &str, row: Value) -> Result<Value, RemoteError> {
        let Value::Object(mut object) = row else {
            return Err(RemoteError::api(400, "PGRST102", "Row must be a JSON object"));
        };

        let stamp = self.tick();
        object
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(stamp.clone()));
        object
            .entry("updated_at")
            .or_insert_with(|| Value::String(stamp));

        let row = Value::Object(object);
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_filters(row: &Value, filters: &[(String, String)]) -> bool {
    filters
        .iter()
        .all(|(column, expected)| row.get(column).is_some_and(|v| render(v) == *expected))
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => render(a).cmp(&render(b)),
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, RemoteError> {
    serde_json::from_value(row).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn encode<B: Serialize>(row: &B) -> Result<Value, RemoteError> {
    serde_json::to_value(row).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn no_single_row() -> RemoteError {
    RemoteError::api(
        406,
        "PGRST116",
        "JSON object requested, multiple (or no) rows returned",
    )
}

fn invalid_credentials() -> RemoteError {
    RemoteError::auth(400, "Invalid login credentials")
}

/// Shared in-memory backend. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend").finish_non_exhaustive()
    }
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Accounts and sessions
    // =========================================================================

    /// Create a confirmed account.
    pub fn register_user(&self, email: &str, password: &str) -> RemoteUser {
        let user = RemoteUser {
            id: UserId::random(),
            email: Some(email.to_string()),
            app_metadata: Map::new(),
            user_metadata: Map::new(),
        };
        self.state().accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    /// Make `email`'s account the signed-in one, without an auth call.
    ///
    /// Returns `None` for unknown accounts.
    pub fn sign_in_as(&self, email: &str) -> Option<AuthUser> {
        let mut state = self.state();
        let user = state.account(email)?.user.clone();
        let session = state.issue_session(user);
        let auth_user = AuthUser::from_remote(&session.user, email);
        state.session = Some(session);
        Some(auth_user)
    }

    /// Drop the active session, as if it expired and could not be refreshed.
    pub fn expire_session(&self) {
        self.state().session = None;
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.state().session.clone()
    }

    #[must_use]
    pub fn password_of(&self, email: &str) -> Option<String> {
        self.state().account(email).map(|a| a.password.clone())
    }

    /// A provider callback URL carrying a fresh session for `email`, with
    /// the tokens in the fragment.
    ///
    /// Returns `None` for unknown accounts.
    pub fn callback_url(&self, site_url: &str, email: &str) -> Option<Url> {
        let mut state = self.state();
        let user = state.account(email)?.user.clone();
        let session = state.issue_session(user);

        let fragment = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("access_token", &session.access_token)
            .append_pair("refresh_token", &session.refresh_token)
            .append_pair("token_type", "bearer")
            .append_pair("expires_in", "3600")
            .finish();
        state
            .pending_redirects
            .insert(session.access_token.clone(), session);

        let mut url = Url::parse(site_url).ok()?.join("/auth/callback").ok()?;
        url.set_fragment(Some(&fragment));
        Some(url)
    }

    /// Accept `code` as the one-time code from now on.
    pub fn set_otp_code(&self, code: &str) {
        code.clone_into(&mut self.state().otp_code);
    }

    /// Emails one-time codes were sent to.
    #[must_use]
    pub fn sent_codes(&self) -> Vec<String> {
        self.state().sent_codes.clone()
    }

    /// Redirect URLs passed to sign-up, recovery and OAuth calls.
    #[must_use]
    pub fn redirects(&self) -> Vec<String> {
        self.state().redirects.clone()
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Add a row as is, filling `id`, `created_at` and `updated_at` when
    /// missing. Returns the stored row.
    pub fn seed(&self, table: &str, row: Value) -> Value {
        self.state()
            .insert_row(table, row)
            .unwrap_or(Value::Null)
    }

    /// Rows of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    // =========================================================================
    // Scripted failures and call counts
    // =========================================================================

    /// Fail the next auth call with `error`. Queued failures apply in order.
    pub fn fail_next_auth(&self, error: RemoteError) {
        self.state().auth_failures.push_back(error);
    }

    /// Fail the next call to the auth method `name` (e.g. `"send_email_otp"`)
    /// with `error`; other calls are unaffected.
    pub fn fail_auth_call(&self, name: &'static str, error: RemoteError) {
        self.state().call_failures.insert(name, error);
    }

    /// Make the next accepted password sign-in answer without an identity.
    pub fn omit_next_identity(&self) {
        self.state().omit_identity = true;
    }

    /// Fail every call on `table` with `error`.
    pub fn fail_table(&self, table: &str, error: RemoteError) {
        self.state().table_failures.insert(table.to_string(), error);
    }

    /// Fail every insert, update, upsert and delete on `table` with `error`.
    pub fn fail_writes(&self, table: &str, error: RemoteError) {
        self.state().write_failures.insert(table.to_string(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.auth_failures.clear();
        state.call_failures.clear();
        state.table_failures.clear();
        state.write_failures.clear();
    }

    /// Names of the auth calls made, in order.
    #[must_use]
    pub fn auth_calls(&self) -> Vec<&'static str> {
        self.state().auth_calls.clone()
    }

    #[must_use]
    pub fn data_calls(&self) -> usize {
        self.state().data_calls
    }
}

impl AuthApi for InMemoryBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, RemoteError> {
        let mut state = self.state();
        state.auth_call("sign_in_with_password")?;

        let user = match state.account(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(invalid_credentials()),
        };
        if std::mem::take(&mut state.omit_identity) {
            return Ok(AuthResponse {
                session: None,
                user: None,
            });
        }
        let session = state.issue_session(user.clone());
        state.session = Some(session.clone());

        Ok(AuthResponse {
            session: Some(session),
            user: Some(user),
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<AuthResponse, RemoteError> {
        let mut state = self.state();
        state.auth_call("sign_up")?;
        state.redirects.push(redirect_to.to_string());

        if state.account(email).is_some() {
            return Err(RemoteError::auth(422, "User already registered"));
        }
        drop(state);

        let user = self.register_user(email, password);
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
        let mut state = self.state();
        state.auth_call("authorize_url")?;
        state.redirects.push(redirect_to.to_string());

        let mut url =
            Url::parse(AUTHORIZE_URL).map_err(|e| RemoteError::Transport(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    async fn session_from_redirect(&self, callback: &Url) -> Result<Option<Session>, RemoteError> {
        let mut state = self.state();
        state.auth_call("session_from_redirect")?;

        let params = callback
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_else(|| callback.query_pairs().into_owned().collect::<Vec<_>>());
        let Some((_, token)) = params.into_iter().find(|(key, _)| key == "access_token") else {
            return Ok(None);
        };

        let session = state
            .pending_redirects
            .remove(&token)
            .ok_or_else(|| RemoteError::auth(401, "Invalid token"))?;
        state.session = Some(session.clone());
        Ok(Some(session))
    }

    async fn get_user(&self) -> Result<Option<RemoteUser>, RemoteError> {
        let mut state = self.state();
        state.auth_call("get_user")?;
        Ok(state.session.as_ref().map(|s| s.user.clone()))
    }

    async fn send_email_otp(&self, email: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.auth_call("send_email_otp")?;
        if state.account(email).is_none() {
            return Err(RemoteError::auth(422, "Signups not allowed for otp"));
        }
        state.sent_codes.push(email.to_string());
        Ok(())
    }

    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        _kind: OtpType,
    ) -> Result<AuthResponse, RemoteError> {
        let mut state = self.state();
        state.auth_call("verify_otp")?;

        let user = match state.account(email) {
            Some(account) if token == state.otp_code => account.user.clone(),
            _ => return Err(RemoteError::auth(403, "Token has expired or is invalid")),
        };
        let session = state.issue_session(user.clone());
        state.session = Some(session.clone());

        Ok(AuthResponse {
            session: Some(session),
            user: Some(user),
        })
    }

    async fn reset_password_for_email(
        &self,
        _email: &str,
        redirect_to: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.auth_call("reset_password_for_email")?;
        state.redirects.push(redirect_to.to_string());
        Ok(())
    }

    async fn update_password(&self, password: &str) -> Result<RemoteUser, RemoteError> {
        let mut state = self.state();
        state.auth_call("update_password")?;

        let user = state
            .session
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or_else(|| RemoteError::auth(401, "Auth session missing!"))?;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.user.id == user.id) {
            password.clone_into(&mut account.password);
        }
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.auth_call("sign_out")?;
        state.session = None;
        Ok(())
    }

    async fn restore_session(&self) -> Result<Option<Session>, RemoteError> {
        let mut state = self.state();
        state.auth_call("restore_session")?;
        Ok(state.session.clone())
    }
}

impl DataApi for InMemoryBackend {
    async fn select<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<Vec<T>, RemoteError> {
        let rows = {
            let mut state = self.state();
            state.data_call(query.table_name(), false)?;
            state.matching(query)
        };
        rows.into_iter().map(decode).collect()
    }

    async fn select_single<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<T, RemoteError> {
        let mut rows = {
            let mut state = self.state();
            state.data_call(query.table_name(), false)?;
            state.matching(query)
        };
        match (rows.pop(), rows.is_empty()) {
            (Some(row), true) => decode(row),
            _ => Err(no_single_row()),
        }
    }

    async fn insert<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<T, RemoteError> {
        let row = encode(row)?;
        let stored = {
            let mut state = self.state();
            state.data_call(table, true)?;
            state.insert_row(table, row)?
        };
        decode(stored)
    }

    async fn insert_many<B: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[B],
    ) -> Result<(), RemoteError> {
        let rows = rows.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        let mut state = self.state();
        state.data_call(table, true)?;
        for row in rows {
            state.insert_row(table, row)?;
        }
        Ok(())
    }

    async fn update<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        query: &Query,
        patch: &B,
    ) -> Result<T, RemoteError> {
        let Value::Object(patch) = encode(patch)? else {
            return Err(RemoteError::api(400, "PGRST102", "Patch must be a JSON object"));
        };

        let updated = {
            let mut state = self.state();
            state.data_call(query.table_name(), true)?;
            let stamp = state.tick();

            let rows = state
                .tables
                .entry(query.table_name().to_string())
                .or_default();
            let mut updated = rows
                .iter_mut()
                .filter(|row| matches_filters(row, query.filters()));
            let (Some(row), None) = (updated.next(), updated.next()) else {
                return Err(no_single_row());
            };
            let Some(object) = row.as_object_mut() else {
                return Err(no_single_row());
            };
            for (key, value) in patch {
                object.insert(key, value);
            }
            object.insert("updated_at".to_string(), Value::String(stamp));
            Value::Object(object.clone())
        };
        decode(updated)
    }

    async fn delete(&self, query: &Query) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.data_call(query.table_name(), true)?;
        if let Some(rows) = state.tables.get_mut(query.table_name()) {
            rows.retain(|row| !matches_filters(row, query.filters()));
        }
        Ok(())
    }

    async fn upsert<B: Serialize + Sync>(
        &self,
        table: &str,
        row: &B,
        on_conflict: &str,
    ) -> Result<(), RemoteError> {
        let Value::Object(incoming) = encode(row)? else {
            return Err(RemoteError::api(400, "PGRST102", "Row must be a JSON object"));
        };

        let mut state = self.state();
        state.data_call(table, true)?;

        let position = incoming.get(on_conflict).and_then(|key| {
            state
                .tables
                .get(table)?
                .iter()
                .position(|r| r.get(on_conflict) == Some(key))
        });

        let existing = position.and_then(|i| {
            state
                .tables
                .get_mut(table)?
                .get_mut(i)?
                .as_object_mut()
        });
        match existing {
            Some(object) => {
                for (k, v) in incoming {
                    object.insert(k, v);
                }
            }
            None => {
                state.insert_row(table, Value::Object(incoming))?;
            }
        }
        Ok(())
    }
}

/// Error sink that records what it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    errors: Mutex<Vec<(AppError, String)>>,
    users: Mutex<Vec<Option<String>>>,
}

impl RecordingSink {
    /// Contexts of the captured errors, in order.
    #[must_use]
    pub fn contexts(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, context)| context.clone())
            .collect()
    }

    /// Codes and contexts of the captured errors, in order.
    #[must_use]
    pub fn captured(&self) -> Vec<(AppErrorCode, String)> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(error, context)| (error.code(), context.clone()))
            .collect()
    }

    /// Emails of the identified users (`None` for a cleared user), in order.
    #[must_use]
    pub fn users(&self) -> Vec<Option<String>> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorSink for RecordingSink {
    fn capture(&self, error: &AppError, context: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((error.clone(), context.to_string()));
    }

    fn set_user(&self, user: Option<&AuthUser>) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user.map(|u| u.email.clone()));
    }
}
