pub mod config;
pub mod run;

pub use config::ConfigCommand;
pub use run::RunCommand;
