//! Verified user claims delivered by the transport.
//!
//! Token verification happens outside the core: the transport validates the
//! bearer token against the identity provider and attaches the decoded claims
//! to the request context. Write paths read `sub` as the user id.

use serde::{Deserialize, Serialize};

/// Claims extracted from a verified identity token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

impl Claims {
    /// Name to show other collaborators: full name when the token carries
    /// one, otherwise the preferred username, otherwise the subject id.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.preferred_username.is_empty() {
            &self.preferred_username
        } else {
            &self.sub
        }
    }
}
