//! Identity, ownership and authorization for the listing front end.
//! Keep the public surface thin and split implementation across sub-modules.

mod role;
mod actor;
mod ownership;
mod authorizer;
pub(crate) mod provider;
mod validation;
mod registration;
mod session;

pub use role::Role;
pub use actor::Actor;
pub use ownership::{id_string, IdentityNormalizer, OwnershipSurface, OwnershipTable, PROPERTY_OWNERSHIP};
pub use authorizer::{AuthDecision, AuthorizationEngine, DecisionReason, EditPolicy, EDIT_DENIED_MESSAGE};
pub use provider::{AuthGrant, IdentityProvider, LocalIdentityProvider, LoginOutcome, LoginRequest, RegistrationRequest};
pub use validation::{company_field_for, AccountFields, AccountValidator, CompanyField, DefaultAccountValidator, FieldErrors, ProfileFields, MIN_PASSWORD_LEN};
pub use registration::{DraftStep, DraftView, RegistrationDraft, RegistrationError};
pub use session::{landing_path, LoginStep, SessionConfig, SessionError, SessionSnapshot, SessionStatus, SessionStore};
