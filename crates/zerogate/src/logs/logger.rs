//! Logger configuration.
//!
//! Structured column output on stderr with optional color. The level comes
//! from the configuration's `logging.level`; `RUST_LOG` still wins when
//! set, and `NO_COLOR` disables styling for log shippers.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

fn level_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initializes the process-wide logger. Call once at startup.
pub fn configure_logger(level: &str) {
    let no_color = env::var("NO_COLOR").is_ok();

    let filter = match env::var("RUST_LOG") {
        Ok(value) => level_filter(&value),
        Err(_) => level_filter(level),
    };

    Builder::new()
        .format(move |buf, record| {
            let level = record.level();
            let level_str = if no_color {
                format!("{:5}", level)
            } else {
                let color = match level {
                    log::Level::Error => "\x1b[31m",
                    log::Level::Warn => "\x1b[33m",
                    log::Level::Info => "\x1b[32m",
                    log::Level::Debug => "\x1b[34m",
                    log::Level::Trace => "\x1b[35m",
                };
                format!("{}{:5}\x1b[0m", color, level)
            };

            writeln!(
                buf,
                "{} | {} | {}:{} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level_str,
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args(),
            )
        })
        .filter_level(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_strings_map_to_filters() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("WARN"), LevelFilter::Warn);
        assert_eq!(level_filter("garbage"), LevelFilter::Info);
        assert_eq!(level_filter("off"), LevelFilter::Off);
    }
}
