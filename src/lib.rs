pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod transport;
pub mod ui;
pub mod utils;

pub use cli::Cli;
pub use config::Config;
pub use error::ConfigError;
pub use executor::{
    ExitCodeStrategy, Operation, OperationDescriptor, OutcomeKind, ResultEntry, ResultSet,
    RunConfig, RunCoordinator, SessionLauncher, SessionOptions,
};
pub use host::HostRecord;
pub use transport::{LocalLauncher, SshLauncher};
