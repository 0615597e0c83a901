use serde::{Deserialize, Serialize};

/// A single capability: permission to perform `action` on `resource`.
///
/// `*` is a wildcard for either field. A grant whose `notAfter` is not in
/// the future is inert.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<u64>,
}

/// Outcome of a permission evaluation or a single policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Escalate,
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyDecision::Allow => f.write_str("ALLOW"),
            PolicyDecision::Deny => f.write_str("DENY"),
            PolicyDecision::Escalate => f.write_str("ESCALATE"),
        }
    }
}

/// Action coverage: wildcard or exact match.
pub fn action_covers(granted: &str, requested: &str) -> bool {
    granted == "*" || granted == requested
}

/// Resource coverage.
///
/// A granted resource covers a requested one when it is `*`, equal to it,
/// a path ancestor of it (`logs` covers `logs/specific`), or a trailing
/// `prefix*` glob matching it.
pub fn resource_covers(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix('*') {
        return requested.starts_with(prefix);
    }
    requested
        .strip_prefix(granted)
        .is_some_and(|rest| rest.starts_with('/'))
}

impl PermissionGrant {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            not_after: None,
        }
    }

    /// Wildcard grant over every action and resource.
    pub fn all() -> Self {
        Self::new("*", "*")
    }

    pub fn expiring_at(mut self, not_after: u64) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn is_active_at(&self, now_ms: u64) -> bool {
        self.not_after.map_or(true, |t| t > now_ms)
    }

    /// Does this grant allow `action` on `resource`? Expiry is not checked.
    pub fn matches(&self, action: &str, resource: &str) -> bool {
        action_covers(&self.action, action) && resource_covers(&self.resource, resource)
    }

    /// Does this grant cover `child` as a delegated grant?
    ///
    /// The child must be no broader in action and resource and must not
    /// outlive this grant. An unbounded child is never covered by a bounded
    /// parent.
    pub fn covers(&self, child: &PermissionGrant) -> bool {
        let time_covered = match (self.not_after, child.not_after) {
            (None, _) => true,
            (Some(parent), Some(c)) => c <= parent,
            (Some(_), None) => false,
        };
        action_covers(&self.action, &child.action)
            && resource_covers(&self.resource, &child.resource)
            && time_covered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_exact() {
        assert!(resource_covers("*", "anything"));
        assert!(resource_covers("logs", "logs"));
        assert!(!resource_covers("logs", "metrics"));
        assert!(action_covers("*", "write"));
        assert!(!action_covers("read", "write"));
    }

    #[test]
    fn path_ancestor_covers_descendants_only() {
        assert!(resource_covers("logs", "logs/specific"));
        assert!(resource_covers("logs", "logs/a/b"));
        assert!(!resource_covers("logs", "logsx"));
        assert!(!resource_covers("logs/specific", "logs"));
    }

    #[test]
    fn prefix_glob() {
        assert!(resource_covers("shared/team/*", "shared/team/notes"));
        assert!(!resource_covers("shared/team/*", "shared/other/notes"));
    }

    #[test]
    fn expiry_is_exclusive() {
        let g = PermissionGrant::new("read", "logs").expiring_at(100);
        assert!(g.is_active_at(99));
        assert!(!g.is_active_at(100));
        assert!(PermissionGrant::all().is_active_at(u64::MAX));
    }

    #[test]
    fn child_cannot_outlive_parent() {
        let parent = PermissionGrant::new("read", "logs").expiring_at(1_000);
        assert!(parent.covers(&PermissionGrant::new("read", "logs").expiring_at(999)));
        assert!(parent.covers(&PermissionGrant::new("read", "logs").expiring_at(1_000)));
        assert!(!parent.covers(&PermissionGrant::new("read", "logs").expiring_at(1_001)));
        assert!(!parent.covers(&PermissionGrant::new("read", "logs")));
    }

    #[test]
    fn wildcard_child_is_not_covered_by_narrow_parent() {
        let parent = PermissionGrant::new("read", "logs");
        assert!(!parent.covers(&PermissionGrant::new("*", "logs")));
        assert!(!parent.covers(&PermissionGrant::new("read", "*")));
    }

    #[test]
    fn not_after_uses_camel_case() {
        let g = PermissionGrant::new("read", "logs").expiring_at(5);
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, r#"{"action":"read","resource":"logs","notAfter":5}"#);
    }
}
