//! CLI command implementations

mod config;
mod connect;
mod list;
mod shutdown;
mod status;

pub use config::{config_path, config_show};
pub use connect::connect_command;
pub use list::list_command;
pub use shutdown::shutdown_command;
pub use status::status_command;
