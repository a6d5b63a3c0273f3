//! Watcher roles

use serde::{Deserialize, Serialize};

/// How much weight a watcher's interjections carry with its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoleAuthority {
    /// Suggestions the parent may consider
    #[default]
    Peer,
    /// Directions the parent should follow
    Supervisor,
}

impl RoleAuthority {
    /// Display name used in injected messages
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleAuthority::Peer => "Peer",
            RoleAuthority::Supervisor => "Supervisor",
        }
    }
}

impl std::fmt::Display for RoleAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role assigned to a watcher session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRole {
    /// Role name (e.g. "code-reviewer")
    pub name: String,
    /// What the role is for
    pub description: Option<String>,
    /// Authority level
    pub authority: RoleAuthority,
    /// Inject parsed interjections into the parent without asking
    #[serde(default)]
    pub auto_inject: bool,
}

impl SessionRole {
    /// Create a role with no description and auto-injection off
    pub fn new(name: impl Into<String>, authority: RoleAuthority) -> Self {
        Self {
            name: name.into(),
            description: None,
            authority,
            auto_inject: false,
        }
    }

    /// Set the role description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Enable or disable automatic injection of interjections
    pub fn with_auto_inject(mut self, auto_inject: bool) -> Self {
        self.auto_inject = auto_inject;
        self
    }
}
