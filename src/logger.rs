//! Tracing setup

use crate::config::SessionConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `config.log_level`. Does nothing when logging is
/// switched off or a subscriber is already installed.
pub fn init(config: &SessionConfig) {
    if !config.logging {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("roomcall={}", config.log_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        let config = SessionConfig {
            log_level: "debug".into(),
            logging: true,
            ..SessionConfig::default()
        };
        init(&config);
        init(&config);
        init(&SessionConfig {
            logging: false,
            ..config
        });
        tracing::debug!("logger initialised");
    }
}
