pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::io::IsTerminal;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Raw `EnvFilter` directives; wins over `--log-level` when set.
    pub const FILTER_ENV: &str = "HARNESS_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    ///
    /// Output always goes to stderr or the configured file: the broadcaster's
    /// stdout carries the control channel and must stay clean.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }

        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let env_filter = build_env_filter(config.level.to_filter());

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_ids(config.level >= LogLevel::Trace)
            .with_ansi(config.file.is_none() && std::io::stderr().is_terminal())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        match std::env::var(FILTER_ENV) {
            Ok(filter) if !filter.trim().is_empty() => EnvFilter::new(filter),
            _ => EnvFilter::new(default_filter_for(level)),
        }
    }

    // Our own targets follow the requested level; dependencies stay at info
    // so trace runs are not drowned in runtime internals.
    fn default_filter_for(level: LevelFilter) -> String {
        const OWN_TARGETS: &[&str] = &[
            "harness",
            "discovery",
            "broadcaster",
            "discovery_harness",
            "device_discovery",
            "transport_bus",
        ];
        if level < LevelFilter::DEBUG {
            return level.to_string().to_ascii_lowercase();
        }
        let level_name = if level == LevelFilter::TRACE { "trace" } else { "debug" };
        let mut filter = String::from("info");
        for target in OWN_TARGETS {
            filter.push(',');
            filter.push_str(target);
            filter.push('=');
            filter.push_str(level_name);
        }
        filter
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn verbose_levels_scope_to_own_targets() {
            let filter = default_filter_for(LevelFilter::DEBUG);
            assert!(filter.starts_with("info,"));
            assert!(filter.contains("harness=debug"));
            assert!(filter.contains("transport_bus=debug"));
            assert_eq!(default_filter_for(LevelFilter::WARN), "warn");
        }

        #[test]
        fn levels_order_by_verbosity() {
            assert!(LogLevel::Trace > LogLevel::Debug);
            assert_eq!(LogLevel::default(), LogLevel::Warn);
            assert_eq!(LogLevel::Info.as_str(), "info");
        }
    }
}
