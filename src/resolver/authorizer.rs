use std::collections::HashSet;
use std::fmt::Debug;

use crate::resolver::{ResolutionError, Target};

/// Decides whether a principal may open a shell in a resolved target.
///
/// Runs after naming so the identity-to-workload convention and the access
/// decision can be audited separately.
pub trait Authorizer: Send + Sync + Debug {
    fn authorize(&self, principal: &str, target: &Target) -> Result<(), ResolutionError>;
}

/// Lets every principal through
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl Authorizer for PermitAll {
    fn authorize(&self, _principal: &str, _target: &Target) -> Result<(), ResolutionError> {
        Ok(())
    }
}

/// Only listed principals may connect
#[derive(Debug, Clone)]
pub struct PrincipalAllowList {
    allowed: HashSet<String>,
}

impl PrincipalAllowList {
    pub fn new<I, S>(principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: principals.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for PrincipalAllowList {
    fn authorize(&self, principal: &str, target: &Target) -> Result<(), ResolutionError> {
        if self.allowed.contains(principal) {
            Ok(())
        } else {
            Err(ResolutionError::Denied {
                principal: principal.to_string(),
                workload: target.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target {
            namespace: "dev".to_string(),
            workload_id: "alice".to_string(),
            container: "app".to_string(),
            command: vec!["/bin/sh".to_string()],
        }
    }

    #[test]
    fn allow_list_admits_listed_principals_only() {
        let authorizer = PrincipalAllowList::new(["alice"]);
        assert!(authorizer.authorize("alice", &target()).is_ok());

        let denied = authorizer.authorize("mallory", &target()).unwrap_err();
        assert_eq!(
            denied,
            ResolutionError::Denied {
                principal: "mallory".to_string(),
                workload: "dev/alice:app".to_string(),
            }
        );
    }
}
