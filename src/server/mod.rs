/// SSH front end of rs_podgate
mod error;
mod server;
mod ssh_connection;
mod ssh_handler;

pub use error::GatewayError;
pub use server::{build_exec_client, run_server};
