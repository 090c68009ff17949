use tracing_subscriber::EnvFilter;

/// Route `log` records to syslog, or to a `tracing` fmt subscriber when
/// syslog is disabled or unreachable.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(process: &str, debug_mode: bool, use_syslog: bool) {
    let level = if debug_mode {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: process.into(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(logger) => {
                if log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger))).is_ok() {
                    log::set_max_level(level);
                }
                return;
            }
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}, falling back to stderr", e);
            }
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug_mode { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("cell-test", true, false);
        init("cell-test", false, false);
        log::debug!("logger initialized twice");
    }
}
