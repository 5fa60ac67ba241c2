use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Top-level failure returned from [`crate::run`].
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_gateway_close_surfaces_its_code() {
        let err = BotError::from(GatewayError::Fatal(4004));
        assert!(matches!(err, BotError::Gateway(GatewayError::Fatal(4004))));
        assert!(err.to_string().contains("4004"));
    }
}
