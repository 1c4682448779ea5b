//! Edit/view permission decisions for property records.
//! Pure and total: no I/O, no errors, absence of data is a denial.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::actor::Actor;
use super::ownership::{IdentityNormalizer, OwnershipSurface};
use super::role::Role;

pub const EDIT_DENIED_MESSAGE: &str = "Only the property creator or assigned agent can edit it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    RoleOwner,
    RoleAdmin,
    IdMatchOwner,
    IdMatchAgent,
    Denied,
}

/// Outcome of an authorization check. `allowed` is true exactly when `reason` is not `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    allowed: bool,
    reason: DecisionReason,
}

impl AuthDecision {
    pub fn grant(reason: DecisionReason) -> Self {
        debug_assert!(reason != DecisionReason::Denied);
        Self { allowed: reason != DecisionReason::Denied, reason }
    }

    pub fn deny() -> Self { Self { allowed: false, reason: DecisionReason::Denied } }

    pub fn allowed(&self) -> bool { self.allowed }

    pub fn reason(&self) -> DecisionReason { self.reason }

    /// User-facing explanation for a denial.
    pub fn message(&self) -> Option<&'static str> {
        if self.allowed { None } else { Some(EDIT_DENIED_MESSAGE) }
    }
}

/// How the `property_owner` role is treated by `can_edit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditPolicy {
    /// Any `property_owner` may edit any property. Current product behavior,
    /// pending confirmation that it should survive past the development phase.
    #[default]
    RelaxedOwnerRole,
    /// A `property_owner` may edit only properties whose resolved owner id is theirs.
    OwnerById,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationEngine {
    normalizer: IdentityNormalizer,
    policy: EditPolicy,
}

impl AuthorizationEngine {
    pub fn new(normalizer: IdentityNormalizer, policy: EditPolicy) -> Self { Self { normalizer, policy } }

    pub fn with_policy(policy: EditPolicy) -> Self { Self { policy, ..Self::default() } }

    pub fn policy(&self) -> EditPolicy { self.policy }

    pub fn normalizer(&self) -> &IdentityNormalizer { &self.normalizer }

    /// Decide whether `actor` may mutate `property`. First matching rule wins.
    pub fn can_edit<R: OwnershipSurface + ?Sized>(&self, actor: &Actor, property: &R) -> AuthDecision {
        let decision = match actor.role {
            Role::Admin => AuthDecision::grant(DecisionReason::RoleAdmin),
            Role::PropertyOwner => match self.policy {
                EditPolicy::RelaxedOwnerRole => AuthDecision::grant(DecisionReason::RoleOwner),
                EditPolicy::OwnerById => {
                    if self.is_owner(actor, property) {
                        AuthDecision::grant(DecisionReason::IdMatchOwner)
                    } else {
                        AuthDecision::deny()
                    }
                }
            },
            Role::Agent if self.is_agent(actor, property) => AuthDecision::grant(DecisionReason::IdMatchAgent),
            _ => AuthDecision::deny(),
        };
        debug!(target: "auth", actor = %actor.id, role = %actor.role, reason = ?decision.reason(), "can_edit");
        decision
    }

    /// `can_edit` for an optional actor; no actor is a denial.
    pub fn can_edit_opt<R: OwnershipSurface + ?Sized>(&self, actor: Option<&Actor>, property: &R) -> AuthDecision {
        match actor {
            Some(a) => self.can_edit(a, property),
            None => AuthDecision::deny(),
        }
    }

    /// Decision behind the edit affordance on the public detail page.
    /// Never used to block reading.
    pub fn view_decision<R: OwnershipSurface + ?Sized>(&self, actor: &Actor, property: &R) -> AuthDecision {
        if !matches!(actor.role, Role::PropertyOwner | Role::Agent | Role::Admin) {
            return AuthDecision::deny();
        }
        if self.is_owner(actor, property) {
            AuthDecision::grant(DecisionReason::IdMatchOwner)
        } else if self.is_agent(actor, property) {
            AuthDecision::grant(DecisionReason::IdMatchAgent)
        } else if actor.role == Role::Admin {
            AuthDecision::grant(DecisionReason::RoleAdmin)
        } else {
            AuthDecision::deny()
        }
    }

    pub fn can_view<R: OwnershipSurface + ?Sized>(&self, actor: &Actor, property: &R) -> bool {
        self.view_decision(actor, property).allowed()
    }

    fn is_owner<R: OwnershipSurface + ?Sized>(&self, actor: &Actor, property: &R) -> bool {
        self.normalizer.resolve_owner(property).is_some_and(|id| id == actor.id)
    }

    fn is_agent<R: OwnershipSurface + ?Sized>(&self, actor: &Actor, property: &R) -> bool {
        self.normalizer.resolve_agent(property).is_some_and(|id| id == actor.id)
    }
}
