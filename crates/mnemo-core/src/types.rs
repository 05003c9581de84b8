use serde::{Deserialize, Serialize};

/// Identity of whoever owns a memory. `None` on a record means global.
pub type OwnerId = String;

/// The identity a recall is issued on behalf of.
///
/// Carries no authorization logic itself; it is passed through to the
/// access-control collaborator untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    /// `None` for an anonymous requester, who can only see global memories.
    pub id: Option<OwnerId>,
    /// Free-form access level understood by the access-control collaborator
    /// (e.g. "owner", "family", "public").
    #[serde(default = "default_access_level")]
    pub access_level: String,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            access_level: default_access_level(),
        }
    }

    pub fn user(id: impl Into<OwnerId>) -> Self {
        Self {
            id: Some(id.into()),
            access_level: default_access_level(),
        }
    }

    pub fn with_access_level(mut self, level: impl Into<String>) -> Self {
        self.access_level = level.into();
        self
    }
}

fn default_access_level() -> String {
    "public".into()
}
