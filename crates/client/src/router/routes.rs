//! Route table.

use url::Url;

use super::RouterError;

/// Where guard redirects to send an unauthenticated user.
pub const LOGIN_PATH: &str = "/auth/login";

/// Where guard redirects to send an authenticated user.
pub const HOME_PATH: &str = "/dashboard";

/// Every screen of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteName {
    Login,
    Register,
    ForgotPassword,
    ResetPassword,
    AuthCallback,
    Mfa,
    Root,
    Dashboard,
    Pipeline,
    Deals,
    DealDetail,
    Contacts,
    Companies,
    Activities,
    Admin,
}

/// Access rules of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteMeta {
    /// Part of the signed-out flow; signed-in users are sent home.
    pub public: bool,
    pub requires_auth: bool,
    pub requires_admin: bool,
}

impl RouteMeta {
    const PUBLIC: Self = Self {
        public: true,
        requires_auth: false,
        requires_admin: false,
    };

    const PROTECTED: Self = Self {
        public: false,
        requires_auth: true,
        requires_admin: false,
    };

    const ADMIN: Self = Self {
        public: false,
        requires_auth: true,
        requires_admin: true,
    };
}

/// One entry of the route table.
#[derive(Debug, Clone, Copy)]
pub struct RouteDef {
    pub name: RouteName,
    /// Path with `:param` segments.
    pub pattern: &'static str,
    pub meta: RouteMeta,
    /// Static redirect, followed before any guard runs.
    pub redirect: Option<&'static str>,
}

const fn route(name: RouteName, pattern: &'static str, meta: RouteMeta) -> RouteDef {
    RouteDef {
        name,
        pattern,
        meta,
        redirect: None,
    }
}

/// The route table, matched in order.
pub const ROUTES: &[RouteDef] = &[
    route(RouteName::Login, "/auth/login", RouteMeta::PUBLIC),
    route(RouteName::Register, "/auth/register", RouteMeta::PUBLIC),
    route(RouteName::ForgotPassword, "/auth/forgot-password", RouteMeta::PUBLIC),
    route(RouteName::ResetPassword, "/auth/reset-password", RouteMeta::PUBLIC),
    route(RouteName::AuthCallback, "/auth/callback", RouteMeta::PUBLIC),
    route(RouteName::Mfa, "/auth/mfa", RouteMeta::PUBLIC),
    RouteDef {
        name: RouteName::Root,
        pattern: "/",
        meta: RouteMeta::PROTECTED,
        redirect: Some(HOME_PATH),
    },
    route(RouteName::Dashboard, "/dashboard", RouteMeta::PROTECTED),
    route(RouteName::Pipeline, "/pipeline", RouteMeta::PROTECTED),
    route(RouteName::Deals, "/deals", RouteMeta::PROTECTED),
    route(RouteName::DealDetail, "/deals/:id", RouteMeta::PROTECTED),
    route(RouteName::Contacts, "/contacts", RouteMeta::PROTECTED),
    route(RouteName::Companies, "/companies", RouteMeta::PROTECTED),
    route(RouteName::Activities, "/activities", RouteMeta::PROTECTED),
    route(RouteName::Admin, "/admin", RouteMeta::ADMIN),
];

/// A navigation target matched against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: RouteName,
    pub meta: RouteMeta,
    pub redirect: Option<&'static str>,
    /// Path without query or fragment.
    pub path: String,
    /// Path with query and fragment, as navigated to.
    pub full_path: String,
    /// Values of `:param` segments.
    pub params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl ResolvedRoute {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        lookup(&self.params, name)
    }

    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    #[must_use]
    pub fn is_oauth_callback(&self) -> bool {
        self.name == RouteName::AuthCallback
    }

    #[must_use]
    pub fn is_mfa_step(&self) -> bool {
        self.name == RouteName::Mfa
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Match `target` (a path with optional query and fragment) against
/// [`ROUTES`].
///
/// # Errors
///
/// `InvalidPath` if `target` is not an absolute app path, `NotFound` if no
/// route matches.
pub fn resolve(target: &str) -> Result<ResolvedRoute, RouterError> {
    if !target.starts_with('/') || target.starts_with("//") {
        return Err(RouterError::InvalidPath(target.to_string()));
    }

    let url = Url::parse("app://pipecrm")
        .and_then(|base| base.join(target))
        .map_err(|_| RouterError::InvalidPath(target.to_string()))?;

    let path = match url.path() {
        "" => "/".to_string(),
        p if p.len() > 1 => p.trim_end_matches('/').to_string(),
        p => p.to_string(),
    };

    let (def, params) = ROUTES
        .iter()
        .find_map(|def| match_pattern(def.pattern, &path).map(|params| (def, params)))
        .ok_or_else(|| RouterError::NotFound(path.clone()))?;

    let mut full_path = path.clone();
    if let Some(query) = url.query() {
        full_path.push('?');
        full_path.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        full_path.push('#');
        full_path.push_str(fragment);
    }

    Ok(ResolvedRoute {
        name: def.name,
        meta: def.meta,
        redirect: def.redirect,
        path,
        full_path,
        params,
        query: url.query_pairs().into_owned().collect(),
    })
}

fn match_pattern(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
    let expected: Vec<&str> = pattern.split('/').collect();
    let actual: Vec<&str> = path.split('/').collect();
    if expected.len() != actual.len() {
        return None;
    }

    let mut params = Vec::new();
    for (want, got) in expected.iter().zip(&actual) {
        match want.strip_prefix(':') {
            Some(name) if !got.is_empty() => params.push((name.to_string(), (*got).to_string())),
            Some(_) => return None,
            None if want == got => {}
            None => return None,
        }
    }
    Some(params)
}
