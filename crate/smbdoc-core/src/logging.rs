//! Log setup for programs and tests embedding the provider.

use env_logger::Builder;
use log::SetLoggerError;
use std::io::Write;

/// Install a logger with app-wide defaults.
///
/// Level defaults to WARN and can be changed with RUST_LOG. Setting
/// RUST_LOG_FORMAT to SYSTEMD switches to a syslog-friendly output.
pub fn init() {
    init_with_info_modules(vec![])
}

/// Works like [init] and additionally shows the logs of the given
/// modules at info level, unless RUST_LOG says otherwise.
///
/// Panics if a logger was already installed.
pub fn init_with_info_modules(info_modules: Vec<&str>) {
    builder(info_modules).init();
}

/// Install a logger with the defaults of [init], failing instead of
/// panicking if one is already installed.
///
/// Meant for test fixtures, which run many times per process.
pub fn try_init() -> Result<(), SetLoggerError> {
    let mut builder = builder(vec!["smbdoc_core"]);
    builder.is_test(true);

    builder.try_init()
}

fn builder(info_modules: Vec<&str>) -> Builder {
    let mut builder = Builder::new();
    if std::env::var("RUST_LOG_FORMAT").is_ok_and(|f| f == "SYSTEMD") {
        systemd_format(&mut builder);
    }
    builder.filter_level(log::LevelFilter::Warn);
    for module in info_modules {
        builder.filter_module(module, log::LevelFilter::Info);
    }
    builder.parse_default_env();

    builder
}

/// Prefix each line with its syslog priority (RFC 5424) and leave
/// out the time, which journald records anyway.
fn systemd_format(builder: &mut Builder) {
    builder.format(|fmt, record| {
        let priority = match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 5,
            log::Level::Debug | log::Level::Trace => 7,
        };
        writeln!(fmt, "<{priority}>{}: {}", record.target(), record.args())
    });
}
