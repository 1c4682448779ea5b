//! Registration wizard: role selection, account details, profile details, submitted.
//!
//! The chosen role lives inside the step, so "role is set" and "past role
//! selection" cannot disagree. Only the final step talks to the identity
//! collaborator; a failed submission leaves every field in place.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::provider::{AuthGrant, IdentityProvider, RegistrationRequest};
use super::role::Role;
use super::validation::{company_field_for, AccountFields, AccountValidator, CompanyField, FieldErrors, ProfileFields};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStep {
    RoleSelection,
    AccountDetails(Role),
    ProfileDetails(Role),
    Submitted(Role),
}

impl DraftStep {
    pub fn name(&self) -> &'static str {
        match self {
            DraftStep::RoleSelection => "role_selection",
            DraftStep::AccountDetails(_) => "account_details",
            DraftStep::ProfileDetails(_) => "profile_details",
            DraftStep::Submitted(_) => "submitted",
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            DraftStep::RoleSelection => None,
            DraftStep::AccountDetails(r) | DraftStep::ProfileDetails(r) | DraftStep::Submitted(r) => Some(*r),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    #[error("'{action}' is not possible at step {step}")]
    InvalidTransition { action: &'static str, step: &'static str },
    #[error("the {0} role cannot be registered")]
    RoleNotRegistrable(Role),
    #[error("some fields need attention")]
    Invalid(FieldErrors),
    #[error("{0}")]
    Submission(AppError),
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationDraft {
    step: Option<DraftStep>,
    account: AccountFields,
    profile: ProfileFields,
    errors: FieldErrors,
    submit_error: Option<AppError>,
}

/// Serializable snapshot of a draft. The password never leaves the draft.
#[derive(Debug, Clone, Serialize)]
pub struct DraftView {
    pub step: &'static str,
    pub role: Option<Role>,
    pub email: String,
    pub profile: ProfileFields,
    pub company_field: Option<CompanyField>,
    pub errors: FieldErrors,
    pub submit_error: Option<AppError>,
}

impl RegistrationDraft {
    pub fn new() -> Self { Self::default() }

    /// Start with a role already chosen, e.g. from a `?type=agent` link.
    pub fn with_role(role: Role) -> Result<Self, RegistrationError> {
        let mut d = Self::new();
        d.choose_role(role)?;
        Ok(d)
    }

    pub fn step(&self) -> DraftStep { self.step.unwrap_or(DraftStep::RoleSelection) }

    pub fn role(&self) -> Option<Role> { self.step().role() }

    pub fn account(&self) -> &AccountFields { &self.account }

    pub fn profile(&self) -> &ProfileFields { &self.profile }

    pub fn errors(&self) -> &FieldErrors { &self.errors }

    pub fn submit_error(&self) -> Option<&AppError> { self.submit_error.as_ref() }

    pub fn company_field(&self) -> Option<CompanyField> { self.role().map(company_field_for) }

    pub fn view(&self) -> DraftView {
        DraftView {
            step: self.step().name(),
            role: self.role(),
            email: self.account.email.clone(),
            profile: self.profile.clone(),
            company_field: self.company_field(),
            errors: self.errors.clone(),
            submit_error: self.submit_error.clone(),
        }
    }

    fn invalid(&self, action: &'static str) -> RegistrationError {
        RegistrationError::InvalidTransition { action, step: self.step().name() }
    }

    /// One-way gate out of role selection.
    pub fn choose_role(&mut self, role: Role) -> Result<(), RegistrationError> {
        if self.step() != DraftStep::RoleSelection {
            return Err(self.invalid("choose_role"));
        }
        if !Role::REGISTRABLE.contains(&role) {
            return Err(RegistrationError::RoleNotRegistrable(role));
        }
        self.step = Some(DraftStep::AccountDetails(role));
        self.errors = FieldErrors::default();
        Ok(())
    }

    /// Store and validate account fields; advances only when they pass. No network call.
    pub fn submit_account<V: AccountValidator + ?Sized>(&mut self, fields: AccountFields, validator: &V) -> Result<(), RegistrationError> {
        let DraftStep::AccountDetails(role) = self.step() else {
            return Err(self.invalid("submit_account"));
        };
        self.account = fields;
        let errs = validator.validate_account(&self.account);
        if !errs.is_empty() {
            self.errors = errs.clone();
            return Err(RegistrationError::Invalid(errs));
        }
        self.errors = FieldErrors::default();
        self.step = Some(DraftStep::ProfileDetails(role));
        Ok(())
    }

    /// Store and validate profile fields, then create the account.
    ///
    /// On any failure the draft stays at profile details with all fields kept
    /// and the error attached. On success the entered values are cleared and
    /// the draft is finished; the caller should drop it.
    pub async fn submit_profile<V, P>(&mut self, fields: ProfileFields, validator: &V, provider: &P) -> Result<AuthGrant, RegistrationError>
    where
        V: AccountValidator + ?Sized,
        P: IdentityProvider,
    {
        let DraftStep::ProfileDetails(role) = self.step() else {
            return Err(self.invalid("submit_profile"));
        };
        self.profile = fields;
        let errs = validator.validate_profile(role, &self.profile);
        if !errs.is_empty() {
            self.errors = errs.clone();
            return Err(RegistrationError::Invalid(errs));
        }
        self.errors = FieldErrors::default();
        self.submit_error = None;

        let req = RegistrationRequest {
            email: self.account.email.trim().to_string(),
            password: self.account.password.clone(),
            role,
            full_name: self.profile.full_name.trim().to_string(),
            phone_number: self.profile.phone_number.trim().to_string(),
            company_name: self
                .profile
                .company_name
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };
        match provider.register(&req).await {
            Ok(grant) => {
                info!(target: "registration", id = %grant.actor.id, role = %role, "account created");
                self.account = AccountFields::default();
                self.profile = ProfileFields::default();
                self.step = Some(DraftStep::Submitted(role));
                Ok(grant)
            }
            Err(e) => {
                let app: AppError = e.into();
                warn!(target: "registration", role = %role, error = %app, "registration failed");
                self.submit_error = Some(app.clone());
                Err(RegistrationError::Submission(app))
            }
        }
    }

    /// Profile -> account keeps both field sets; account -> role selection clears the role.
    pub fn back(&mut self) -> Result<(), RegistrationError> {
        match self.step() {
            DraftStep::ProfileDetails(role) => {
                self.step = Some(DraftStep::AccountDetails(role));
            }
            DraftStep::AccountDetails(_) => {
                self.step = Some(DraftStep::RoleSelection);
            }
            DraftStep::RoleSelection | DraftStep::Submitted(_) => return Err(self.invalid("back")),
        }
        self.errors = FieldErrors::default();
        self.submit_error = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provider::cheap_local_provider;
    use crate::identity::validation::DefaultAccountValidator;

    fn good_account() -> AccountFields {
        AccountFields { email: "new@x.io".into(), password: "Secret123".into(), confirm_password: "Secret123".into() }
    }

    fn good_profile() -> ProfileFields {
        ProfileFields { full_name: "New Person".into(), phone_number: "876-555-1234".into(), company_name: None }
    }

    #[test]
    fn role_gate_is_one_way() {
        let mut d = RegistrationDraft::new();
        assert_eq!(d.role(), None);
        d.choose_role(Role::Agent).unwrap();
        assert_eq!(d.step(), DraftStep::AccountDetails(Role::Agent));
        assert!(matches!(d.choose_role(Role::PropertyOwner), Err(RegistrationError::InvalidTransition { .. })));
        assert_eq!(d.role(), Some(Role::Agent));
        assert!(matches!(RegistrationDraft::new().choose_role(Role::Admin), Err(RegistrationError::RoleNotRegistrable(Role::Admin))));
    }

    #[test]
    fn invalid_password_keeps_step_and_values() {
        let mut d = RegistrationDraft::with_role(Role::PropertySeeker).unwrap();
        let fields = AccountFields { password: "weak".into(), confirm_password: "weak".into(), ..good_account() };
        let err = d.submit_account(fields.clone(), &DefaultAccountValidator).unwrap_err();
        assert!(matches!(err, RegistrationError::Invalid(_)));
        assert_eq!(d.step(), DraftStep::AccountDetails(Role::PropertySeeker));
        assert_eq!(d.account(), &fields);
        assert!(d.errors().get("password").is_some());
    }

    #[test]
    fn agent_sees_optional_company_field() {
        let mut d = RegistrationDraft::with_role(Role::Agent).unwrap();
        d.submit_account(good_account(), &DefaultAccountValidator).unwrap();
        assert_eq!(d.step(), DraftStep::ProfileDetails(Role::Agent));
        let cf = d.company_field().unwrap();
        assert!(cf.shown);
        assert!(!cf.required);
        assert!(cf.label.contains("Optional"));
    }

    #[test]
    fn back_semantics() {
        let mut d = RegistrationDraft::with_role(Role::PropertyOwner).unwrap();
        d.submit_account(good_account(), &DefaultAccountValidator).unwrap();
        d.back().unwrap();
        assert_eq!(d.step(), DraftStep::AccountDetails(Role::PropertyOwner));
        assert_eq!(d.account(), &good_account());
        d.back().unwrap();
        assert_eq!(d.step(), DraftStep::RoleSelection);
        assert_eq!(d.role(), None);
        assert!(d.back().is_err());
    }

    #[tokio::test]
    async fn successful_submission_clears_the_draft() {
        let provider = cheap_local_provider();
        let mut d = RegistrationDraft::with_role(Role::Agent).unwrap();
        d.submit_account(good_account(), &DefaultAccountValidator).unwrap();
        let grant = d.submit_profile(good_profile(), &DefaultAccountValidator, &provider).await.unwrap();
        assert_eq!(grant.actor.role, Role::Agent);
        assert_eq!(d.step(), DraftStep::Submitted(Role::Agent));
        assert_eq!(d.account(), &AccountFields::default());
        assert_eq!(d.profile(), &ProfileFields::default());
        assert!(d.back().is_err());
    }

    #[tokio::test]
    async fn failed_submission_keeps_fields_and_attaches_error() {
        let provider = cheap_local_provider();
        provider.add_account("new@x.io", "Secret123", Role::Agent, None).unwrap();
        let mut d = RegistrationDraft::with_role(Role::Agent).unwrap();
        d.submit_account(good_account(), &DefaultAccountValidator).unwrap();
        let err = d.submit_profile(good_profile(), &DefaultAccountValidator, &provider).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Submission(AppError::Conflict { .. })));
        assert_eq!(d.step(), DraftStep::ProfileDetails(Role::Agent));
        assert_eq!(d.profile(), &good_profile());
        assert_eq!(d.account(), &good_account());
        assert!(d.submit_error().is_some());
    }
}
