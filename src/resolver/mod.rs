/// Maps an inbound principal to the container it lands in
mod authorizer;
mod resolver;
mod target;

pub use authorizer::{Authorizer, PermitAll, PrincipalAllowList};
pub use resolver::{DEFAULT_SHELL, WorkloadResolver};
#[cfg(test)]
pub use resolver::resolve;
pub use target::{ResolutionError, Target};
