//! tracing subscriber setup for the binary
//!
//! `AXSEL_LOG` takes any `EnvFilter` directive and overrides the verbosity
//! flags. output goes to stderr so `--json` stdout stays machine-readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV_VAR: &str = "AXSEL_LOG";

/// filter directive for a `-v` count
pub fn directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "axsel=info,warn",
        _ => "axsel=debug,info",
    }
}

pub fn init(verbosity: u8) {
    let filter = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(directive(verbosity)));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_by_verbosity() {
        assert_eq!(directive(0), "warn");
        assert!(directive(1).contains("axsel=info"));
        assert!(directive(5).contains("axsel=debug"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(0);
        init(2);
    }
}
