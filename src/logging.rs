//! Structured logging setup for binaries and long-running hosts.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the embedding process.

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; `default_directive` (for example
/// `"livetune=info"`) applies when it is unset or unparsable. Setting
/// `LOG_FORMAT=pretty` switches to multi-line output.
///
/// # Errors
///
/// Returns [`Error::Other`] if a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// livetune::logging::init("livetune=debug")?;
/// tracing::info!("ready");
/// # Ok::<(), livetune::Error>(())
/// ```
pub fn init(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let pretty = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "pretty");

    let result = if pretty {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| Error::Other(format!("tracing init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // Whichever test installs first wins; the second call must fail.
        let _ = init("livetune=warn");
        assert!(matches!(init("livetune=warn"), Err(Error::Other(_))));
    }
}
