//! Log subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{GraphError, Result};

/// Installs the global `tracing` subscriber; `level` is an `EnvFilter` directive.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| GraphError::Logging(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| GraphError::Logging("logging already initialized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_directives() {
        let err = init_logging("shardgraph=notalevel").unwrap_err();
        assert!(matches!(err, GraphError::Logging(_)));
    }
}
