/// Remote exec client: the outbound half of every session
mod exec_trait;
mod handle;
mod kube_exec;
#[cfg(test)]
pub mod mock_exec;

pub use exec_trait::*;
pub use handle::{StreamEnd, dial};
pub use kube_exec::KubeExecClient;
