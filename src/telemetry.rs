use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub const LOG_ENV: &str = "VOICEFEED_LOG";

/// Install the process-wide subscriber. Later calls are ignored.
///
/// Logs go to stderr so stdout stays clean for command output. The filter comes from
/// `VOICEFEED_LOG` (e.g. `voicefeed=debug`) and defaults to `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let _ = TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);
        let result = if json {
            tracing::subscriber::set_global_default(builder.json().finish())
        } else {
            tracing::subscriber::set_global_default(builder.finish())
        };
        if let Err(err) = result {
            eprintln!("tracing already initialised: {err}");
        }
    });
}
