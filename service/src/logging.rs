use crate::config::Config;
use log::LevelFilter;
use simplelog::{ConfigBuilder, TermLogger};

// HTTP stack crates that log every connection and frame. Only shown at Trace.
const HTTP_STACK_MODULES: &[&str] = &[
    "hyper", "hyper_util", "reqwest", "h2", "rustls", "mio", "tower", "axum",
];

pub struct Logger {}

impl Logger {
    /// Installs the terminal logger at the configured level.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;

        // A logger can only be installed once per process
        if let Err(err) = TermLogger::init(
            level,
            Self::build_log_config(Self::muted_modules(level)),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        ) {
            eprintln!("Failed to start simplelog: {err}");
        }
    }

    /// Dependency modules silenced at `level`.
    fn muted_modules(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            HTTP_STACK_MODULES
        }
    }

    fn build_log_config(muted: &[&'static str]) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in muted {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}
