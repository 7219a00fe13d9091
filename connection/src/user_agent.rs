//! User agent validation for the bitcoin p2p protocol.
//!
//! Bitcoin Core and most other implementations announce a sub-version string
//! of the form `/name:version/` in their `version` message.

use std::fmt;

/// Errors that can occur during user agent validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentError {
    /// The user agent format is invalid (must be `/name:version/`).
    InvalidFormat,
    /// The name component is missing or empty.
    MissingName,
    /// The version component is missing or empty.
    MissingVersion,
}

impl fmt::Display for UserAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgentError::InvalidFormat => {
                write!(f, "User agent must follow format '/name:version/'")
            }
            UserAgentError::MissingName => {
                write!(f, "User agent name component cannot be empty")
            }
            UserAgentError::MissingVersion => {
                write!(f, "User agent version component cannot be empty")
            }
        }
    }
}

impl std::error::Error for UserAgentError {}

/// A validated `/name:version/` user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(String);

impl UserAgent {
    /// Validate and wrap a user agent string.
    ///
    /// # Example
    ///
    /// ```
    /// use bitcoin_topology_connection::UserAgent;
    ///
    /// assert!(UserAgent::new("/topology-crawler:0.1.0/").is_ok());
    /// assert!(UserAgent::new("topology-crawler").is_err());
    /// ```
    pub fn new<S: Into<String>>(user_agent: S) -> Result<Self, UserAgentError> {
        let user_agent = user_agent.into();
        validate_bitcoin_core_format(&user_agent)?;
        Ok(UserAgent(user_agent))
    }

    /// Build a user agent from its components, which is always well formed
    /// as long as neither component contains `/` or `:`.
    pub fn from_name_version(name: &str, version: &str) -> Self {
        UserAgent(format!("/{name}:{version}/"))
    }

    /// The raw user agent string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates Bitcoin Core-style user agent format: `/name:version/`.
pub fn validate_bitcoin_core_format(user_agent: &str) -> Result<(), UserAgentError> {
    let contents = user_agent
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or(UserAgentError::InvalidFormat)?;

    let mut parts = contents.split(':');
    let (name, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(version), None) => (name, version),
        _ => return Err(UserAgentError::InvalidFormat),
    };

    if name.is_empty() {
        return Err(UserAgentError::MissingName);
    }
    if version.is_empty() {
        return Err(UserAgentError::MissingVersion);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_user_agents() {
        assert!(validate_bitcoin_core_format("/bitcoin-topology:0.1.0/").is_ok());
        assert!(validate_bitcoin_core_format("/Satoshi:27.0.0/").is_ok());
        assert!(validate_bitcoin_core_format("/my-app:1.2.3-beta/").is_ok());
    }

    #[test]
    fn test_validate_invalid_format() {
        assert_eq!(
            validate_bitcoin_core_format("crawler:0.1.0/"),
            Err(UserAgentError::InvalidFormat)
        );
        assert_eq!(
            validate_bitcoin_core_format("/crawler:0.1.0"),
            Err(UserAgentError::InvalidFormat)
        );
        assert_eq!(
            validate_bitcoin_core_format("/crawler/"),
            Err(UserAgentError::InvalidFormat)
        );
        assert_eq!(
            validate_bitcoin_core_format("/a:b:c/"),
            Err(UserAgentError::InvalidFormat)
        );
        // A lone slash is both prefix and suffix, but has no room for contents.
        assert_eq!(
            validate_bitcoin_core_format("/"),
            Err(UserAgentError::InvalidFormat)
        );
    }

    #[test]
    fn test_validate_missing_components() {
        assert_eq!(
            validate_bitcoin_core_format("/:0.1.0/"),
            Err(UserAgentError::MissingName)
        );
        assert_eq!(
            validate_bitcoin_core_format("/crawler:/"),
            Err(UserAgentError::MissingVersion)
        );
    }

    #[test]
    fn test_from_name_version_is_valid() {
        let user_agent = UserAgent::from_name_version("bitcoin-topology", "0.1.0");
        assert_eq!(user_agent.as_str(), "/bitcoin-topology:0.1.0/");
        assert!(UserAgent::new(user_agent.to_string()).is_ok());
    }
}
