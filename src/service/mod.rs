mod connection;
mod server;

pub use connection::{handle_connection, ConnectionSummary};
pub use server::Server;
