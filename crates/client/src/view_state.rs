//! Loading / error / data state around remote calls.
//!
//! Front-ends render from these wrappers instead of awaiting services
//! directly: every failure is mapped with
//! [`map_data_error`](crate::services::map_data_error), reported once under
//! the wrapper's context, and kept for display.

use std::future::Future;

use pipecrm_core::AppError;

use crate::services::map_data_error;
use crate::supabase::RemoteError;
use crate::tracking::ErrorTracker;

/// Map and report a data API outcome.
///
/// # Errors
///
/// Returns the mapped error after reporting it under `context`.
pub fn settle<T>(
    outcome: Result<T, RemoteError>,
    tracker: &ErrorTracker,
    context: &str,
) -> Result<T, AppError> {
    outcome.map_err(|e| {
        let error = map_data_error(&e);
        tracker.track(&error, context);
        error
    })
}

/// State of one remote resource.
#[derive(Debug)]
pub struct ResourceState<T> {
    tracker: ErrorTracker,
    context: String,
    loading: bool,
    error: Option<AppError>,
    data: Option<T>,
}

impl<T> ResourceState<T> {
    /// Empty state reporting failures under `context`, e.g. `contacts.list`.
    #[must_use]
    pub fn new(tracker: ErrorTracker, context: impl Into<String>) -> Self {
        Self {
            tracker,
            context: context.into(),
            loading: false,
            error: None,
            data: None,
        }
    }

    /// Run `call`, replacing the data on success and the error on failure.
    ///
    /// Previous data is kept when the call fails.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept in the state.
    pub async fn load<F>(&mut self, call: F) -> Result<&T, AppError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        self.loading = true;
        self.error = None;

        let outcome = settle(call.await, &self.tracker, &self.context);
        self.loading = false;

        match outcome {
            Ok(data) => Ok(&*self.data.insert(data)),
            Err(error) => {
                self.error = Some(error.clone());
                Err(error)
            }
        }
    }

    #[must_use]
    pub const fn loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub const fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(AppError::message)
    }

    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
