//! Field validation for the registration wizard.
//! Errors are field-level and stay inside the wizard; they never reach session code.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::role::Role;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\+\d{1,3})?\s?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$").expect("phone regex"));

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFields {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub company_name: Option<String>,
}

/// Field name -> message. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(pub BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn get(&self, field: &str) -> Option<&str> { self.0.get(field).map(String::as_str) }

    fn add(&mut self, field: &'static str, msg: &str) {
        self.0.entry(field).or_insert_with(|| msg.to_string());
    }
}

pub trait AccountValidator: Send + Sync {
    fn validate_account(&self, fields: &AccountFields) -> FieldErrors;

    fn validate_profile(&self, role: Role, fields: &ProfileFields) -> FieldErrors;
}

/// How the company-name field is presented for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompanyField {
    pub shown: bool,
    pub required: bool,
    pub label: &'static str,
}

pub fn company_field_for(role: Role) -> CompanyField {
    match role {
        Role::PropertyOwner | Role::Agent => CompanyField { shown: true, required: false, label: "Company Name (Optional)" },
        Role::PropertySeeker | Role::Admin => CompanyField { shown: false, required: false, label: "Company Name" },
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, fields: &AccountFields) -> FieldErrors {
        let mut errs = FieldErrors::default();
        let email = fields.email.trim();
        if email.is_empty() {
            errs.add("email", "Required");
        } else if !EMAIL_RE.is_match(email) {
            errs.add("email", "Invalid email");
        }

        let pw = &fields.password;
        if pw.is_empty() {
            errs.add("password", "Required");
        } else if pw.chars().count() < MIN_PASSWORD_LEN {
            errs.add("password", "Password must be at least 8 characters");
        } else if !(pw.chars().any(|c| c.is_ascii_lowercase())
            && pw.chars().any(|c| c.is_ascii_uppercase())
            && pw.chars().any(|c| c.is_ascii_digit()))
        {
            errs.add("password", "Include uppercase, lowercase, and number");
        }

        if fields.confirm_password.is_empty() {
            errs.add("confirm_password", "Required");
        } else if fields.confirm_password != fields.password {
            errs.add("confirm_password", "Passwords must match");
        }
        errs
    }

    fn validate_profile(&self, role: Role, fields: &ProfileFields) -> FieldErrors {
        let mut errs = FieldErrors::default();
        if fields.full_name.trim().is_empty() {
            errs.add("full_name", "Full name is required");
        }
        let phone = fields.phone_number.trim();
        if phone.is_empty() {
            errs.add("phone_number", "Phone number is required");
        } else if !PHONE_RE.is_match(phone) {
            errs.add("phone_number", "Invalid phone number");
        }
        let company = company_field_for(role);
        if company.required && fields.company_name.as_deref().map_or(true, |c| c.trim().is_empty()) {
            errs.add("company_name", "Company name is required");
        }
        errs
    }
}
