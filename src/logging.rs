use std::env;
use std::io::IsTerminal;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;

/// Install the global subscriber. `RUST_LOG` overrides the INFO default;
/// pretty ANSI output only on a truecolor terminal.
pub fn setup_logging() {
    let color = std::io::stdout().is_terminal()
        && (match env::var("COLORTERM") {
            Ok(value) => value == "truecolor" || value == "24bit",
            _ => false,
        } || match env::var("TERM") {
            Ok(value) => value == "direct" || value == "truecolor",
            _ => false,
        });

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt = fmt().with_env_filter(env_filter).with_target(false);

    let result = if color {
        fmt.event_format(fmt::format().pretty())
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .try_init()
    } else {
        fmt.with_file(false)
            .with_line_number(false)
            .with_ansi(false)
            .try_init()
    };

    // Already installed, e.g. by an embedding process.
    let _ = result;
}
