//! Process configuration, read from the environment (after `.env`).

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::types::Snowflake;

/// Role allowed to run `/sethost`; also pinged by the monthly reminder.
pub const DEFAULT_HOST_ROLE_ID: &str = "1304575329892827236";
/// Guild the slash commands are registered to.
pub const DEFAULT_COMMAND_GUILD_ID: &str = "1265727385031020626";
pub const DEFAULT_DATA_FILE: &str = "data.json";
pub const DEFAULT_CARD_IMAGE: &str = "assets/card.png";
pub const DEFAULT_LIVENESS_ADDR: &str = "0.0.0.0:10000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN environment variable not set")]
    MissingToken,

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub host_role_id: Snowflake,
    /// `None` registers commands globally.
    pub command_guild_id: Option<Snowflake>,
    pub data_file: PathBuf,
    pub card_image: PathBuf,
    pub liveness_addr: SocketAddr,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let token = get("DISCORD_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let host_role_id = snowflake(
            "HOST_ROLE_ID",
            get("HOST_ROLE_ID").unwrap_or_else(|| DEFAULT_HOST_ROLE_ID.to_string()),
        )?;

        // An explicitly empty value opts into global registration.
        let command_guild_id = match get("COMMAND_GUILD_ID") {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(snowflake("COMMAND_GUILD_ID", v)?),
            None => Some(DEFAULT_COMMAND_GUILD_ID.to_string()),
        };

        let data_file = get("DATA_FILE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string());
        let card_image = get("CARD_IMAGE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CARD_IMAGE.to_string());

        let addr = get("LIVENESS_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LIVENESS_ADDR.to_string());
        let liveness_addr = addr.parse().map_err(|e| ConfigError::Invalid {
            key: "LIVENESS_ADDR",
            reason: format!("{}: {}", addr, e),
        })?;

        Ok(Self {
            token,
            host_role_id,
            command_guild_id,
            data_file: data_file.into(),
            card_image: card_image.into(),
            liveness_addr,
        })
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("host_role_id", &self.host_role_id)
            .field("command_guild_id", &self.command_guild_id)
            .field("data_file", &self.data_file)
            .field("card_image", &self.card_image)
            .field("liveness_addr", &self.liveness_addr)
            .finish()
    }
}

fn snowflake(key: &'static str, value: String) -> Result<Snowflake, ConfigError> {
    match value.parse::<u64>() {
        Ok(_) => Ok(value),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: format!("{:?} is not a snowflake: {}", value, e),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn missing_token_is_fatal() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingToken)));
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "   ")]),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(cfg.token, "abc");
        assert_eq!(cfg.host_role_id, DEFAULT_HOST_ROLE_ID);
        assert_eq!(cfg.command_guild_id.as_deref(), Some(DEFAULT_COMMAND_GUILD_ID));
        assert_eq!(cfg.data_file, PathBuf::from("data.json"));
        assert_eq!(cfg.card_image, PathBuf::from("assets/card.png"));
        assert_eq!(cfg.liveness_addr.port(), 10000);
    }

    #[test]
    fn empty_guild_id_means_global_commands() {
        let cfg = config(&[("DISCORD_TOKEN", "abc"), ("COMMAND_GUILD_ID", "")]).unwrap();
        assert!(cfg.command_guild_id.is_none());
    }

    #[test]
    fn non_numeric_role_is_rejected() {
        let err = config(&[("DISCORD_TOKEN", "abc"), ("HOST_ROLE_ID", "mods")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HOST_ROLE_ID", .. }));
    }

    #[test]
    fn bad_liveness_addr_is_rejected() {
        let err = config(&[("DISCORD_TOKEN", "abc"), ("LIVENESS_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LIVENESS_ADDR", .. }));
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = config(&[("DISCORD_TOKEN", "super-secret")]).unwrap();
        assert!(!format!("{:?}", cfg).contains("super-secret"));
    }
}
