//! Route table: which role a destination requires, and where redirects go.

use std::borrow::Cow;

use crate::{GuardOutcome, Role, SessionState};

/// A protected route prefix and the role it requires, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub prefix: Cow<'static, str>,
    pub required_role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    sign_in_path: Cow<'static, str>,
    home_path: Cow<'static, str>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            sign_in_path: Cow::Borrowed("/auth"),
            home_path: Cow::Borrowed("/"),
        }
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sign_in(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn with_home(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.home_path = path.into();
        self
    }

    /// Register a route prefix. Later registrations of the same prefix win.
    pub fn route(mut self, prefix: impl Into<Cow<'static, str>>, required_role: Option<Role>) -> Self {
        let prefix = prefix.into();
        self.rules.retain(|r| r.prefix != prefix);
        self.rules.push(RouteRule {
            prefix,
            required_role,
        });
        self
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Role required by the most specific rule matching `path` on segment
    /// boundaries (`/sales` matches `/sales/orders`, not `/salesforce`).
    pub fn required_role(&self, path: &str) -> Option<Role> {
        self.rules
            .iter()
            .filter(|r| segment_prefix_matches(&r.prefix, path))
            .max_by_key(|r| r.prefix.len())
            .and_then(|r| r.required_role)
    }

    /// Redirect target for an outcome; `None` when nothing should navigate.
    pub fn destination(&self, outcome: GuardOutcome) -> Option<&str> {
        match outcome {
            GuardOutcome::RedirectToSignIn => Some(self.sign_in_path()),
            GuardOutcome::RedirectHome => Some(self.home_path()),
            GuardOutcome::Loading | GuardOutcome::Render | GuardOutcome::SelectOrganization => None,
        }
    }

    /// Route prefixes the session may see in navigation.
    pub fn visible_paths(&self, session: &SessionState) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| match r.required_role {
                _ if session.bypass => true,
                None => true,
                Some(role) => session.has_role(role),
            })
            .map(|r| r.prefix.as_ref())
            .collect()
    }
}

fn segment_prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}
