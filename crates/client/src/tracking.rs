//! Error tracking.
//!
//! Services report every normalized failure once, with a method-qualified
//! context such as `auth.signIn`. Expected validation failures (marked
//! user-friendly) are never reported.

use std::sync::Arc;

use pipecrm_core::AppError;

use crate::config::SentryConfig;
use crate::models::AuthUser;

/// Destination of tracked errors. Fire-and-forget: implementations must not
/// fail or block.
pub trait ErrorSink: Send + Sync {
    /// Report one error.
    fn capture(&self, error: &AppError, context: &str);

    /// Attach (or clear) the user reported with later errors.
    fn set_user(&self, user: Option<&AuthUser>);
}

/// Reports to Sentry through the process-wide hub.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentrySink;

impl ErrorSink for SentrySink {
    fn capture(&self, error: &AppError, context: &str) {
        let event_id = sentry::with_scope(
            |scope| {
                scope.set_tag("origin", error.origin().as_str());
                scope.set_tag("code", error.code().as_str());
                scope.set_tag("context", context);
                if let Some(details) = error.details() {
                    for (key, value) in details {
                        scope.set_extra(key, value.clone());
                    }
                }
            },
            || sentry::capture_error(error),
        );

        // Below error level: tracing layers forward errors to Sentry too.
        tracing::info!(
            error = %error,
            code = %error.code(),
            origin = %error.origin(),
            context,
            sentry_event_id = %event_id,
            "Tracked application error"
        );
    }

    fn set_user(&self, user: Option<&AuthUser>) {
        match user {
            Some(user) => set_sentry_user(user),
            None => clear_sentry_user(),
        }
    }
}

/// Drops everything. Used when no DSN is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ErrorSink for NoopSink {
    fn capture(&self, _error: &AppError, _context: &str) {}

    fn set_user(&self, _user: Option<&AuthUser>) {}
}

/// Front door for error reporting, shared by services and the store.
#[derive(Clone)]
pub struct ErrorTracker {
    sink: Arc<dyn ErrorSink>,
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker").finish_non_exhaustive()
    }
}

impl ErrorTracker {
    #[must_use]
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    /// Report to Sentry when `config` has a DSN, otherwise drop reports.
    #[must_use]
    pub fn from_config(config: &SentryConfig) -> Self {
        if config.dsn.is_some() {
            Self::new(Arc::new(SentrySink))
        } else {
            Self::disabled()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Report `error` unless it is an expected validation failure.
    pub fn track(&self, error: &AppError, context: &str) {
        if error.is_expected_validation() {
            tracing::debug!(context, message = error.message(), "Validation failure not tracked");
            return;
        }
        self.sink.capture(error, context);
    }

    /// Identify the user attached to later reports.
    pub fn identify(&self, user: Option<&AuthUser>) {
        self.sink.set_user(user);
    }
}

/// Initialize Sentry. Returns `None` (reporting disabled) without a DSN.
///
/// The guard must be held for the life of the process so queued events are
/// flushed on exit.
#[must_use]
pub fn init_sentry(config: &SentryConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sample_rate,
            traces_sample_rate: config.traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Set the Sentry user context for error tracking.
pub fn set_sentry_user(user: &AuthUser) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user.id.to_string()),
            email: Some(user.email.clone()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pipecrm_core::{AppErrorCode, ErrorOrigin, ValidationErrors, map_validation_errors};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        errors: Mutex<Vec<(AppErrorCode, String)>>,
        users: Mutex<Vec<Option<String>>>,
    }

    impl ErrorSink for Captured {
        fn capture(&self, error: &AppError, context: &str) {
            self.errors
                .lock()
                .unwrap()
                .push((error.code(), context.to_string()));
        }

        fn set_user(&self, user: Option<&AuthUser>) {
            self.users
                .lock()
                .unwrap()
                .push(user.map(|u| u.email.clone()));
        }
    }

    #[test]
    fn test_user_friendly_validation_not_tracked() {
        let sink = Arc::new(Captured::default());
        let tracker = ErrorTracker::new(sink.clone());

        let mut issues = ValidationErrors::new();
        issues.push("email", "Invalid email");
        tracker.track(&map_validation_errors(&issues), "auth.signIn");

        assert!(sink.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_other_errors_tracked_with_context() {
        let sink = Arc::new(Captured::default());
        let tracker = ErrorTracker::new(sink.clone());

        tracker.track(&AppError::auth(ErrorOrigin::Remote, "bad"), "auth.signIn");
        // Validation errors not marked user-friendly are still reported.
        tracker.track(
            &AppError::new(AppErrorCode::Validation, ErrorOrigin::Ui, "odd"),
            "ui.form",
        );

        let errors = sink.errors.lock().unwrap();
        assert_eq!(
            *errors,
            vec![
                (AppErrorCode::Auth, "auth.signIn".to_string()),
                (AppErrorCode::Validation, "ui.form".to_string()),
            ]
        );
    }

    #[test]
    fn test_identify_forwards_user() {
        let sink = Arc::new(Captured::default());
        let tracker = ErrorTracker::new(sink.clone());
        let user = AuthUser {
            id: pipecrm_core::UserId::random(),
            email: "ana@pipecrm.dev".into(),
            is_admin: false,
        };

        tracker.identify(Some(&user));
        tracker.identify(None);

        assert_eq!(
            *sink.users.lock().unwrap(),
            vec![Some("ana@pipecrm.dev".to_string()), None]
        );
    }

    #[test]
    fn test_sentry_sink_reports_once() {
        use sentry::integrations::tracing as sentry_tracing;
        use tracing_subscriber::layer::SubscriberExt;

        let events = sentry::test::with_captured_events(|| {
            let subscriber = tracing_subscriber::registry().with(
                sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
                    tracing::Level::ERROR | tracing::Level::WARN => {
                        sentry_tracing::EventFilter::Event
                    }
                    _ => sentry_tracing::EventFilter::Breadcrumb,
                }),
            );
            let _guard = tracing::subscriber::set_default(subscriber);

            SentrySink.capture(
                &AppError::server(ErrorOrigin::Remote, "Error communicating with the server."),
                "deals.list",
            );
        });

        assert_eq!(events.len(), 1);
        let tags = &events[0].tags;
        assert_eq!(tags.get("context").map(String::as_str), Some("deals.list"));
        assert_eq!(tags.get("code").map(String::as_str), Some("SERVER_ERROR"));
    }

    #[test]
    fn test_from_config_without_dsn_is_disabled() {
        // Must not panic or require a Sentry hub.
        let tracker = ErrorTracker::from_config(&SentryConfig::default());
        tracker.track(&AppError::server(ErrorOrigin::Remote, "x"), "test");
    }
}
