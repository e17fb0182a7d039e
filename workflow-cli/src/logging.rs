//! `tracing-subscriber` setup driven by the global verbosity flags, mirroring
//! the teacher's stderr-first, TTY-aware logging posture.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Info,
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, verbose: u8, debug: bool) -> Self {
        if quiet {
            return Verbosity::Quiet;
        }
        if debug || verbose >= 2 {
            return Verbosity::Debug;
        }
        if verbose == 1 {
            return Verbosity::Info;
        }
        Verbosity::Normal
    }

    fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Installs a global subscriber writing to stderr so stdout stays reserved
/// for command output the user may pipe or script against.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
