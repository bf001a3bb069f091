use crate::filters::{Clause, Lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope de visibilité basé service : un utilisateur rattaché au scope
/// (directement ou via un groupe) ne voit que les hôtes de ces services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityScope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub services: Vec<String>,
    pub group: Option<String>,
}

/// Identité minimale utilisée pour le scoping (pas d'authentification ici).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeUser {
    pub username: String,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

pub fn scopes_for_user<'a>(
    user: &ScopeUser,
    scopes: &'a [VisibilityScope],
) -> Vec<&'a VisibilityScope> {
    scopes
        .iter()
        .filter(|scope| {
            user.scopes.contains(&scope.id)
                || scope.group.as_ref().map(|g| user.groups.contains(g)).unwrap_or(false)
        })
        .collect()
}

/// Clause de restriction des listings d'hôtes. Superuser ou utilisateur sans
/// scope applicable : aucune restriction (None).
pub fn scope_clause(user: &ScopeUser, scopes: &[VisibilityScope]) -> Option<Clause> {
    if user.superuser {
        return None;
    }
    let applicable = scopes_for_user(user, scopes);
    if applicable.is_empty() {
        return None;
    }
    let clauses: Vec<Clause> = applicable
        .iter()
        .flat_map(|scope| scope.services.iter())
        .map(|service_id| Clause::Cmp {
            path: "service_env__service__id".into(),
            op: Lookup::Exact,
            value: Value::String(service_id.clone()),
        })
        .collect();
    Some(Clause::Or(clauses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scopes() -> Vec<VisibilityScope> {
        vec![
            VisibilityScope {
                id: "scope-1".into(),
                name: "db team".into(),
                services: vec!["svc-db".into()],
                group: Some("dba".into()),
            },
            VisibilityScope {
                id: "scope-2".into(),
                name: "web team".into(),
                services: vec!["svc-web".into()],
                group: None,
            },
        ]
    }

    fn user(superuser: bool, groups: &[&str], scope_ids: &[&str]) -> ScopeUser {
        ScopeUser {
            username: "u".into(),
            superuser,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            scopes: scope_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_superuser_and_unscoped_users_are_unrestricted() {
        assert!(scope_clause(&user(true, &["dba"], &[]), &scopes()).is_none());
        assert!(scope_clause(&user(false, &[], &[]), &scopes()).is_none());
    }

    #[test]
    fn test_scoped_user_gets_service_restriction() {
        let clause = scope_clause(&user(false, &["dba"], &[]), &scopes()).expect("clause");
        let visible = json!({"service_env": {"service": {"id": "svc-db"}}});
        let hidden = json!({"service_env": {"service": {"id": "svc-mail"}}});
        assert!(clause.matches(&visible));
        assert!(!clause.matches(&hidden));
    }

    #[test]
    fn test_direct_scope_grant_counts_like_group_grant() {
        let clause = scope_clause(&user(false, &[], &["scope-2"]), &scopes()).expect("clause");
        assert!(clause.matches(&json!({"service_env": {"service": {"id": "svc-web"}}})));
        assert!(!clause.matches(&json!({"service_env": {"service": {"id": "svc-db"}}})));
    }
}
