use serde::{Deserialize, Serialize};

/// The signed-in user a session acts for.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    /// Supabase Auth JWT. Room writes and joins require one.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Identity {
    /// A read-only identity: can browse the directory, cannot join or create.
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            display_name: String::new(),
            access_token: None,
        }
    }

    /// Create an identity from a Supabase Auth session.
    pub fn from_supabase_auth(user_id: String, display_name: String, access_token: String) -> Self {
        Self {
            user_id,
            display_name,
            access_token: Some(access_token),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty() && self.access_token.is_some()
    }
}
