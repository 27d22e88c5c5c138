use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer flushing; drop it on shutdown.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn flag_enabled(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes" | "on")
}

/// Installs the global subscriber. `RUST_LOG` wins when set; otherwise the
/// filter is scoped to this crate at `default_level`. A daily-rolling file
/// layer is added when `TUTOR_ENGINE_FILE_LOGS` is set, writing under
/// `TUTOR_ENGINE_LOG_DIR` (default `./logs`).
pub fn init_tracing(default_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("tutor_engine={default_level}")))
        .unwrap_or_else(|_| EnvFilter::new("tutor_engine=info"));
    let stdout_layer = fmt::layer().with_target(true);

    let file_logs = std::env::var("TUTOR_ENGINE_FILE_LOGS")
        .map(|v| flag_enabled(&v))
        .unwrap_or(false);

    if file_logs {
        let log_dir =
            std::env::var("TUTOR_ENGINE_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        if let Err(err) = std::fs::create_dir_all(&log_dir) {
            eprintln!("failed to create log directory {log_dir}: {err}");
        } else {
            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, &log_dir, "tutor-engine.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();

            return Some(FileLogGuard { _guard: guard });
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    None
}

#[cfg(test)]
mod tests {
    use super::flag_enabled;

    #[test]
    fn test_flag_enabled_accepts_common_truthy_forms() {
        assert!(flag_enabled("1"));
        assert!(flag_enabled("true"));
        assert!(flag_enabled("yes"));
        assert!(flag_enabled(" on "));
        assert!(!flag_enabled(""));
        assert!(!flag_enabled("0"));
        assert!(!flag_enabled("false"));
        assert!(!flag_enabled("TRUE"));
    }
}
