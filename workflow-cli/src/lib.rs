mod cli;
mod commands;
mod logging;

pub use cli::run;
