//! Credential resolution
//!
//! Builds an immutable name → connection table from the plan's credential
//! sets. A per-operation override only affects that single operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};

use super::config::{CredentialSet, GlobalConfig};

/// Effective connection parameters for one credential set
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Name of the credential set
    pub credential: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    /// Endpoint after applying the credential's override
    pub endpoint_url: String,
    /// Region after applying the credential's override
    pub region: String,
    pub path_style: bool,
}

impl Connection {
    /// Combine a credential set with the global connection settings
    pub fn new(credential: &CredentialSet, config: &GlobalConfig) -> Self {
        Self {
            credential: credential.name.clone(),
            access_key: credential.access_key.clone(),
            secret_key: credential.secret_key.clone(),
            session_token: credential.session_token.clone(),
            endpoint_url: credential
                .endpoint_url
                .clone()
                .unwrap_or_else(|| config.endpoint_url.clone()),
            region: credential
                .region
                .clone()
                .unwrap_or_else(|| config.region.clone()),
            path_style: config.path_style,
        }
    }

    #[cfg(test)]
    pub(crate) fn anonymous(endpoint_url: &str) -> Self {
        Self {
            credential: "anonymous".into(),
            access_key: String::new(),
            secret_key: String::new(),
            session_token: None,
            endpoint_url: endpoint_url.into(),
            region: "us-east-1".into(),
            path_style: true,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("credential", &self.credential)
            .field("access_key", &self.access_key)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

/// Lookup table over the plan's credential sets
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    connections: HashMap<String, Arc<Connection>>,
}

impl CredentialResolver {
    pub fn new(config: &GlobalConfig) -> Self {
        let connections = config
            .credentials
            .iter()
            .map(|cred| (cred.name.clone(), Arc::new(Connection::new(cred, config))))
            .collect();
        Self { connections }
    }

    /// Resolve a credential by name
    pub fn resolve(&self, name: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCredential(name.to_string()))
    }

    /// Connection for one operation: the override wins over the group credential
    pub fn for_operation(
        &self,
        group_credential: &str,
        override_credential: Option<&str>,
    ) -> Result<Arc<Connection>> {
        self.resolve(override_credential.unwrap_or(group_credential))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GlobalConfig {
        serde_yaml::from_str(
            r#"
endpoint_url: http://localhost:9000
region: us-east-1
path_style: true
credentials:
  - name: admin
    access_key: AKIA_ADMIN
    secret_key: admin-secret
  - name: readonly
    access_key: AKIA_RO
    secret_key: ro-secret
    endpoint_url: http://replica:9000
    region: eu-central-1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let resolver = CredentialResolver::new(&config());

        let admin = resolver.resolve("admin").unwrap();
        assert_eq!(admin.endpoint_url, "http://localhost:9000");
        assert_eq!(admin.region, "us-east-1");
        assert!(admin.path_style);

        let ro = resolver.resolve("readonly").unwrap();
        assert_eq!(ro.endpoint_url, "http://replica:9000");
        assert_eq!(ro.region, "eu-central-1");
    }

    #[test]
    fn test_operation_override_takes_precedence() {
        let resolver = CredentialResolver::new(&config());

        let overridden = resolver.for_operation("admin", Some("readonly")).unwrap();
        assert_eq!(overridden.credential, "readonly");

        // The group credential is unchanged for the next operation
        let next = resolver.for_operation("admin", None).unwrap();
        assert_eq!(next.credential, "admin");
    }

    #[test]
    fn test_unknown_credential() {
        let resolver = CredentialResolver::new(&config());
        let err = resolver.for_operation("admin", Some("ghost")).unwrap_err();
        assert!(matches!(err, Error::UnknownCredential(name) if name == "ghost"));
    }

    #[test]
    fn test_connection_debug_hides_secret() {
        let resolver = CredentialResolver::new(&config());
        let text = format!("{:?}", resolver.resolve("admin").unwrap());
        assert!(!text.contains("admin-secret"));
    }
}
