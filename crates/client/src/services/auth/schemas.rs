//! Input validation for the auth forms.
//!
//! Every rule runs before the identity provider is contacted; all issues
//! are collected, in field order.

use pipecrm_core::{Email, EmailError, ValidationErrors};
use secrecy::{ExposeSecret, SecretString};

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Length of an emailed one-time code.
pub const MFA_CODE_LENGTH: usize = 6;

/// Validated sign-in form.
#[derive(Debug)]
pub struct SignInPayload {
    pub email: Email,
    pub password: SecretString,
}

/// Validated registration form.
#[derive(Debug)]
pub struct SignUpPayload {
    pub email: Email,
    pub password: SecretString,
}

/// Validated password reset form.
#[derive(Debug)]
pub struct ResetPasswordPayload {
    pub password: SecretString,
}

/// Validate the sign-in form.
///
/// # Errors
///
/// Returns every failed rule.
pub fn sign_in(email: &str, password: &str) -> Result<SignInPayload, ValidationErrors> {
    let mut issues = ValidationErrors::new();
    let email = check_email(email, &mut issues);
    check_password("password", password, &mut issues);

    match email {
        Some(email) => issues.finish(SignInPayload {
            email,
            password: secret(password),
        }),
        None => Err(issues),
    }
}

/// Validate the registration form.
///
/// # Errors
///
/// Returns every failed rule.
pub fn sign_up(
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<SignUpPayload, ValidationErrors> {
    let mut issues = ValidationErrors::new();
    let email = check_email(email, &mut issues);
    check_password("password", password, &mut issues);
    check_password("confirmPassword", confirm_password, &mut issues);
    check_match(password, confirm_password, &mut issues);

    match email {
        Some(email) => issues.finish(SignUpPayload {
            email,
            password: secret(password),
        }),
        None => Err(issues),
    }
}

/// Validate the forgot-password form.
///
/// # Errors
///
/// Returns the email issue.
pub fn forgot_password(email: &str) -> Result<Email, ValidationErrors> {
    let mut issues = ValidationErrors::new();
    check_email(email, &mut issues).ok_or(issues)
}

/// Validate the password reset form.
///
/// # Errors
///
/// Returns every failed rule.
pub fn reset_password(
    password: &str,
    confirm_password: &str,
) -> Result<ResetPasswordPayload, ValidationErrors> {
    let mut issues = ValidationErrors::new();
    check_password("password", password, &mut issues);
    check_password("confirmPassword", confirm_password, &mut issues);
    check_match(password, confirm_password, &mut issues);

    issues.finish(ResetPasswordPayload {
        password: secret(password),
    })
}

/// Validate an emailed one-time code: exactly six ASCII digits.
///
/// # Errors
///
/// Returns every failed rule.
pub fn mfa_code(code: &str) -> Result<String, ValidationErrors> {
    let mut issues = ValidationErrors::new();

    if code.chars().count() != MFA_CODE_LENGTH {
        issues.push("code", format!("Code must have {MFA_CODE_LENGTH} digits"));
    }
    if !code.chars().all(|c| c.is_ascii_digit()) || code.is_empty() {
        issues.push("code", "Code must contain only digits");
    }

    issues.finish(code.to_string())
}

fn check_email(email: &str, issues: &mut ValidationErrors) -> Option<Email> {
    match Email::parse(email) {
        Ok(email) => Some(email),
        Err(EmailError::Empty) => {
            issues.push("email", "Email is required");
            None
        }
        Err(_) => {
            issues.push("email", "Invalid email");
            None
        }
    }
}

fn check_password(field: &str, password: &str, issues: &mut ValidationErrors) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        issues.push(
            field,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        );
    }
}

fn check_match(password: &str, confirm_password: &str, issues: &mut ValidationErrors) {
    if password != confirm_password {
        issues.push("confirmPassword", "Passwords do not match");
    }
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

/// Borrow the plain text of a validated secret for the remote call.
pub(crate) fn expose(secret: &SecretString) -> &str {
    secret.expose_secret()
}
