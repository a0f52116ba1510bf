//! Role-based authorization: permission atoms, the role table, and role
//! extraction from token claims.
//!
//! Permissions are a closed enum, so a route can only ever require a known
//! atom; an unknown permission name in configuration fails to parse and
//! therefore fails closed.

use std::str::FromStr;

use crate::auth::Claims;

/// Permission atoms checked per route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadHealth,
    ReadSessions,
    WriteSessions,
    ReadAgents,
    WriteAgents,
    ReadEvents,
    ReadJobs,
    WriteJobs,
    ReadWebsocket,
    SystemConfig,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadHealth => "read-health",
            Self::ReadSessions => "read-sessions",
            Self::WriteSessions => "write-sessions",
            Self::ReadAgents => "read-agents",
            Self::WriteAgents => "write-agents",
            Self::ReadEvents => "read-events",
            Self::ReadJobs => "read-jobs",
            Self::WriteJobs => "write-jobs",
            Self::ReadWebsocket => "read-websocket",
            Self::SystemConfig => "system-config",
        }
    }

    /// Whether this is a `read-*` atom (includes the websocket read).
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::ReadHealth
                | Self::ReadSessions
                | Self::ReadAgents
                | Self::ReadEvents
                | Self::ReadJobs
                | Self::ReadWebsocket
        )
    }
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-health" => Ok(Self::ReadHealth),
            "read-sessions" => Ok(Self::ReadSessions),
            "write-sessions" => Ok(Self::WriteSessions),
            "read-agents" => Ok(Self::ReadAgents),
            "write-agents" => Ok(Self::WriteAgents),
            "read-events" => Ok(Self::ReadEvents),
            "read-jobs" => Ok(Self::ReadJobs),
            "write-jobs" => Ok(Self::WriteJobs),
            "read-websocket" => Ok(Self::ReadWebsocket),
            "system-config" => Ok(Self::SystemConfig),
            _ => Err(()),
        }
    }
}

/// Permission required by the matched route, stamped into request extensions
/// by the router and consumed by the authorization middleware.
#[derive(Clone, Copy, Debug)]
pub struct RequiredPermission(pub Permission);

/// Roles understood by the authorizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Operator,
    Viewer,
    /// Unauthenticated caller in `local` mode only.
    Anonymous,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
            Self::Anonymous => "anonymous",
        }
    }

    /// The static role → permission table.
    pub fn allows(&self, permission: Permission) -> bool {
        match self {
            Self::Admin => true,
            Self::Operator => {
                permission.is_read()
                    || matches!(
                        permission,
                        Permission::WriteSessions | Permission::WriteAgents | Permission::WriteJobs
                    )
            }
            Self::Viewer | Self::Anonymous => permission.is_read(),
        }
    }
}

/// Extracts the caller's role from claims: `role`, then the first element of
/// `roles` or `groups`, then the viewer default. Unrecognized role names also
/// fall back to viewer so a misconfigured provider can never escalate.
pub fn role_from_claims(claims: &Claims) -> Role {
    if let Some(role) = claims.get_str("role") {
        return parse_role(role);
    }
    for key in ["roles", "groups"] {
        if let Some(first) = claims
            .get(key)
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
        {
            return parse_role(first);
        }
    }
    Role::Viewer
}

fn parse_role(name: &str) -> Role {
    match name {
        "admin" => Role::Admin,
        "operator" => Role::Operator,
        "viewer" => Role::Viewer,
        _ => Role::Viewer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> Claims {
        match value {
            serde_json::Value::Object(map) => Claims(map),
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn admin_has_all_permissions() {
        for p in [
            Permission::ReadHealth,
            Permission::WriteJobs,
            Permission::SystemConfig,
        ] {
            assert!(Role::Admin.allows(p));
        }
    }

    #[test]
    fn operator_writes_domain_but_not_config() {
        assert!(Role::Operator.allows(Permission::WriteSessions));
        assert!(Role::Operator.allows(Permission::WriteJobs));
        assert!(Role::Operator.allows(Permission::ReadWebsocket));
        assert!(!Role::Operator.allows(Permission::SystemConfig));
    }

    #[test]
    fn viewer_and_anonymous_are_read_only() {
        for role in [Role::Viewer, Role::Anonymous] {
            assert!(role.allows(Permission::ReadJobs));
            assert!(role.allows(Permission::ReadWebsocket));
            assert!(!role.allows(Permission::WriteJobs));
            assert!(!role.allows(Permission::SystemConfig));
        }
    }

    #[test]
    fn role_claim_takes_precedence() {
        let c = claims(json!({"role": "admin", "groups": ["viewer"]}));
        assert_eq!(role_from_claims(&c), Role::Admin);
    }

    #[test]
    fn falls_back_to_roles_then_groups() {
        let c = claims(json!({"roles": ["operator"]}));
        assert_eq!(role_from_claims(&c), Role::Operator);
        let c = claims(json!({"groups": ["admin"]}));
        assert_eq!(role_from_claims(&c), Role::Admin);
    }

    #[test]
    fn unknown_role_never_escalates() {
        let c = claims(json!({"role": "superuser"}));
        assert_eq!(role_from_claims(&c), Role::Viewer);
        let c = claims(json!({}));
        assert_eq!(role_from_claims(&c), Role::Viewer);
    }

    #[test]
    fn unknown_permission_fails_closed_at_parse() {
        assert!(Permission::from_str("write-everything").is_err());
        assert_eq!(
            Permission::from_str("system-config"),
            Ok(Permission::SystemConfig)
        );
    }
}
