use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Employee,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "ADMIN" => Some(Role::Admin),
            "EMPLOYEE" => Some(Role::Employee),
            "STUDENT" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Employee => "EMPLOYEE",
            Role::Student => "STUDENT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub role: Role,
    pub sub_role: Option<String>,
    pub display_name: String,
}

impl Session {
    pub fn is_tutor(&self) -> bool {
        self.role == Role::Employee && self.sub_role.as_deref() == Some("TUTOR")
    }
}

/// In-memory session map with an explicit lifecycle: entries are created on
/// successful login and removed on logout. Nothing survives a daemon
/// restart, matching the original's tab-lifetime sessions.
pub struct SessionStore {
    by_token: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            by_token: HashMap::new(),
        }
    }

    pub fn open(
        &mut self,
        user_id: String,
        role: Role,
        sub_role: Option<String>,
        display_name: String,
    ) -> Session {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id,
            role,
            sub_role,
            display_name,
        };
        self.by_token.insert(session.token.clone(), session.clone());
        session
    }

    pub fn get(&self, token: &str) -> Option<&Session> {
        self.by_token.get(token)
    }

    pub fn close(&mut self, token: &str) -> bool {
        self.by_token.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_logout_lifecycle() {
        let mut store = SessionStore::new();
        let s = store.open(
            "u1".to_string(),
            Role::Employee,
            Some("TUTOR".to_string()),
            "A Tutor".to_string(),
        );
        assert!(store.get(&s.token).is_some());
        assert!(store.get(&s.token).map(|v| v.is_tutor()).unwrap_or(false));

        assert!(store.close(&s.token));
        assert!(store.get(&s.token).is_none());
        // Second logout is a no-op.
        assert!(!store.close(&s.token));
    }

    #[test]
    fn tokens_are_unique_per_login() {
        let mut store = SessionStore::new();
        let a = store.open("u1".to_string(), Role::Admin, None, "A".to_string());
        let b = store.open("u1".to_string(), Role::Admin, None, "A".to_string());
        assert_ne!(a.token, b.token);
        assert!(store.get(&a.token).is_some());
        assert!(store.get(&b.token).is_some());
    }
}
