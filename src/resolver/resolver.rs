use std::sync::Arc;

use tracing::debug;

use crate::config::GatewayConfig;
use crate::resolver::{Authorizer, PermitAll, PrincipalAllowList, ResolutionError, Target};

/// Program run when no shell is configured
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// How a principal maps onto a workload id.
///
/// `PrincipalAsWorkload` is a naming convention, not a lookup: the connecting
/// user name is taken verbatim as the pod name. Access control is a separate
/// step, see [`Authorizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadNaming {
    PrincipalAsWorkload,
    Fixed(String),
}

impl WorkloadNaming {
    pub fn from_override(workload_override: Option<&str>) -> Self {
        match workload_override {
            Some(id) => Self::Fixed(id.to_string()),
            None => Self::PrincipalAsWorkload,
        }
    }

    /// The fixed workload, if any
    pub fn workload_override(&self) -> Option<&str> {
        match self {
            Self::PrincipalAsWorkload => None,
            Self::Fixed(id) => Some(id),
        }
    }

    pub fn workload_for(&self, principal: &str) -> String {
        match self {
            Self::PrincipalAsWorkload => principal.to_string(),
            Self::Fixed(id) => id.clone(),
        }
    }
}

/// Resolve a principal against the configured namespace and container.
///
/// Pure; performs no network calls. The orchestrator is the authority on
/// whether the target actually exists.
pub fn resolve(
    principal: &str,
    namespace: &str,
    container: &str,
    workload_override: Option<&str>,
) -> Result<Target, ResolutionError> {
    if principal.is_empty() {
        return Err(ResolutionError::EmptyField("principal"));
    }

    let target = Target {
        namespace: namespace.to_string(),
        workload_id: WorkloadNaming::from_override(workload_override).workload_for(principal),
        container: container.to_string(),
        command: vec![DEFAULT_SHELL.to_string()],
    };
    target.ensure_complete()?;
    Ok(target)
}

/// Naming followed by authorization, built once at startup and shared by all sessions
#[derive(Debug, Clone)]
pub struct WorkloadResolver {
    namespace: String,
    container: String,
    shell: String,
    naming: WorkloadNaming,
    authorizer: Arc<dyn Authorizer>,
}

impl WorkloadResolver {
    pub fn new(
        namespace: impl Into<String>,
        container: impl Into<String>,
        shell: impl Into<String>,
        naming: WorkloadNaming,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            container: container.into(),
            shell: shell.into(),
            naming,
            authorizer,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let authorizer: Arc<dyn Authorizer> = if config.allowed_principals.is_empty() {
            Arc::new(PermitAll)
        } else {
            Arc::new(PrincipalAllowList::new(config.allowed_principals.iter().cloned()))
        };
        Self::new(
            config.namespace.clone(),
            config.container.clone(),
            config.shell.clone(),
            WorkloadNaming::from_override(config.pod.as_deref()),
            authorizer,
        )
    }

    pub fn resolve(&self, principal: &str) -> Result<Target, ResolutionError> {
        let mut target = resolve(
            principal,
            &self.namespace,
            &self.container,
            self.naming.workload_override(),
        )?;
        target.command = vec![self.shell.clone()];
        self.authorizer.authorize(principal, &target)?;
        debug!("Resolved principal {:?} to {}", principal, target);
        Ok(target)
    }
}
