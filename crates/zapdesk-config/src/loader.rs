// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-based layered loading.
//!
//! Merge order, later wins: compiled defaults, `/etc/zapdesk/zapdesk.toml`,
//! `~/.config/zapdesk/zapdesk.toml`, `./zapdesk.toml`, `ZAPDESK_*` variables.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ZapdeskConfig;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/zapdesk/zapdesk.toml";
pub const LOCAL_CONFIG_PATH: &str = "zapdesk.toml";

/// Sections recognised in `ZAPDESK_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: &[&str] = &[
    "server", "storage", "gateway", "whatsapp", "pool", "batcher", "memory", "chatbot",
    "ticket", "health",
];

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("zapdesk/zapdesk.toml"))
}

/// The full figment before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ZapdeskConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

pub fn load_config() -> Result<ZapdeskConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults plus the given TOML; no files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<ZapdeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZapdeskConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Defaults, one explicit file, then the environment.
pub fn load_config_from_path(path: &Path) -> Result<ZapdeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZapdeskConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Maps `ZAPDESK_POOL_MAX_PER_USER` to `pool.max_per_user`.
///
/// Only the first underscore after a known section becomes a dot, since key
/// names themselves contain underscores.
fn env_provider() -> Env {
    Env::prefixed("ZAPDESK_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(map_env_key("pool_max_per_user"), "pool.max_per_user");
        assert_eq!(
            map_env_key("whatsapp_graph_api_version"),
            "whatsapp.graph_api_version"
        );
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(LOCAL_CONFIG_PATH, "[gateway]\nport = 4000\n")?;
            jail.set_env("ZAPDESK_GATEWAY_PORT", "4100");
            jail.set_env("ZAPDESK_CHATBOT_EXIT_KEYWORD", "STOP");
            let config = load_config_from_path(Path::new(LOCAL_CONFIG_PATH))?;
            assert_eq!(config.gateway.port, 4100);
            assert_eq!(config.chatbot.exit_keyword, "STOP");
            Ok(())
        });
    }
}
