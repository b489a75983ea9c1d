//! Route guard: decides what a protected route render should produce.
//!
//! - No IO
//! - No panics
//! - Every input yields one of the defined outcomes

use serde::Serialize;

use ledgerline_core::OrganizationId;

use crate::{Role, SessionState, TenantState};

/// Result of guarding a protected route.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Session not resolved yet; show a placeholder, do not redirect.
    Loading,
    /// Render the requested destination.
    Render,
    /// No identity; go to sign-in.
    RedirectToSignIn,
    /// Organizations exist but none is selected; show the selection step.
    SelectOrganization,
    /// Required role missing; go to the default destination.
    RedirectHome,
}

impl GuardOutcome {
    pub fn is_render(&self) -> bool {
        matches!(self, GuardOutcome::Render)
    }
}

/// Evaluate the guard. The order of checks is fixed:
///
/// 1. loading
/// 2. bypass
/// 3. identity present
/// 4. organization selected (when any exist), before any role check
/// 5. required role
pub fn evaluate(session: &SessionState, tenant: &TenantState, required: Option<Role>) -> GuardOutcome {
    if session.loading {
        return GuardOutcome::Loading;
    }
    if session.bypass {
        return GuardOutcome::Render;
    }
    if !session.is_authenticated() {
        return GuardOutcome::RedirectToSignIn;
    }
    if tenant.needs_selection() {
        return GuardOutcome::SelectOrganization;
    }
    match required {
        Some(role) if !session.has_role(role) => GuardOutcome::RedirectHome,
        _ => GuardOutcome::Render,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of a guard decision.
#[derive(Debug, Clone, Serialize)]
pub struct GuardExplanation {
    pub outcome: GuardOutcome,
    pub required_role: Option<Role>,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub roles: Vec<Role>,
    pub bypass: bool,
    pub organization_count: usize,
    pub current_organization: Option<OrganizationId>,
    /// Empty when the route renders.
    pub suggestions: Vec<String>,
}

/// Explain why `evaluate` produces its outcome for these inputs.
pub fn explain(session: &SessionState, tenant: &TenantState, required: Option<Role>) -> GuardExplanation {
    let outcome = evaluate(session, tenant, required);
    let roles: Vec<Role> = session
        .identity
        .as_ref()
        .map(|i| i.roles.iter().collect())
        .unwrap_or_default();

    let (reason, suggestions) = match outcome {
        GuardOutcome::Loading => ("Session is still being resolved".to_string(), vec![]),
        GuardOutcome::Render if session.bypass => (
            "Authorization bypass is enabled; all checks skipped".to_string(),
            vec![],
        ),
        GuardOutcome::Render => match required {
            Some(role) => (format!("Identity holds required role '{role}'"), vec![]),
            None => ("Route requires no role".to_string(), vec![]),
        },
        GuardOutcome::RedirectToSignIn => (
            "No authenticated identity".to_string(),
            vec!["Sign in to continue".to_string()],
        ),
        GuardOutcome::SelectOrganization => (
            format!(
                "Identity belongs to {} organization(s) but none is selected",
                tenant.organizations.len()
            ),
            vec!["Choose an organization to act within".to_string()],
        ),
        GuardOutcome::RedirectHome => {
            let role = required.map(|r| r.as_str()).unwrap_or_default();
            (
                format!("Identity lacks required role '{role}'. Current roles: {roles:?}"),
                vec![format!("Ask an administrator to grant the '{role}' role")],
            )
        }
    };

    GuardExplanation {
        outcome,
        required_role: required,
        reason,
        roles,
        bypass: session.bypass,
        organization_count: tenant.organizations.len(),
        current_organization: tenant.current.as_ref().map(|c| c.id().clone()),
        suggestions,
    }
}
