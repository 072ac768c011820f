// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks serde attributes cannot express.
//!
//! All failures are collected; validation never stops at the first one.

use crate::diagnostic::ConfigError;
use crate::model::ZapdeskConfig;

pub fn validate_config(config: &ZapdeskConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !matches!(config.server.log_format.as_str(), "pretty" | "json") {
        errors.push(ConfigError::invalid(
            "server",
            format!(
                "log_format must be `pretty` or `json`, got `{}`",
                config.server.log_format
            ),
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::invalid("storage", "database_path must not be empty"));
    }

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::invalid("gateway", "host must not be empty"));
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        errors.push(ConfigError::invalid(
            "gateway",
            format!("host `{host}` is not an IP address or hostname"),
        ));
    }

    let wa = &config.whatsapp;
    if !wa.graph_api_base.starts_with("http://") && !wa.graph_api_base.starts_with("https://") {
        errors.push(ConfigError::invalid(
            "whatsapp",
            "graph_api_base must be an http(s) URL",
        ));
    }
    if wa.media_dir.trim().is_empty() {
        errors.push(ConfigError::invalid("whatsapp", "media_dir must not be empty"));
    }
    if wa.request_timeout_secs == 0 {
        errors.push(ConfigError::invalid("whatsapp", "request_timeout_secs must be > 0"));
    }
    if let Some(url) = &wa.bridge_url {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            errors.push(ConfigError::invalid(
                "whatsapp",
                format!("bridge_url `{url}` must be a ws:// or wss:// URL"),
            ));
        }
    }

    let pool = &config.pool;
    if pool.max_connections == 0 || pool.max_per_tenant == 0 || pool.max_per_user == 0 {
        errors.push(ConfigError::invalid("pool", "connection ceilings must be > 0"));
    }
    if pool.max_per_user > pool.max_per_tenant || pool.max_per_tenant > pool.max_connections {
        errors.push(ConfigError::invalid(
            "pool",
            "ceilings must satisfy max_per_user <= max_per_tenant <= max_connections",
        ));
    }

    let batcher = &config.batcher;
    if batcher.max_batch_size == 0 {
        errors.push(ConfigError::invalid("batcher", "max_batch_size must be > 0"));
    }
    if batcher.flush_interval_ms == 0 {
        errors.push(ConfigError::invalid("batcher", "flush_interval_ms must be > 0"));
    }
    if !(batcher.min_compression_ratio > 0.0 && batcher.min_compression_ratio < 1.0) {
        errors.push(ConfigError::invalid(
            "batcher",
            format!(
                "min_compression_ratio must be within (0, 1), got {}",
                batcher.min_compression_ratio
            ),
        ));
    }

    if config.memory.heap_threshold_mb == 0 {
        errors.push(ConfigError::invalid("memory", "heap_threshold_mb must be > 0"));
    }

    let chatbot = &config.chatbot;
    if chatbot.state_ttl_secs == 0 {
        errors.push(ConfigError::invalid("chatbot", "state_ttl_secs must be > 0"));
    }
    if chatbot.booking_days_ahead == 0 {
        errors.push(ConfigError::invalid("chatbot", "booking_days_ahead must be > 0"));
    }
    if chatbot.notice_capacity == 0 {
        errors.push(ConfigError::invalid("chatbot", "notice_capacity must be > 0"));
    }
    if chatbot.utc_offset_minutes.abs() > 14 * 60 {
        errors.push(ConfigError::invalid(
            "chatbot",
            "utc_offset_minutes must be within +/- 840",
        ));
    }
    if chatbot.reset_keyword.trim().is_empty() || chatbot.exit_keyword.trim().is_empty() {
        errors.push(ConfigError::invalid("chatbot", "keywords must not be empty"));
    }

    for (name, value) in [
        ("probe_interval_secs", config.health.probe_interval_secs),
        ("probe_timeout_secs", config.health.probe_timeout_secs),
        ("import_interval_secs", config.health.import_interval_secs),
    ] {
        if value == 0 {
            errors.push(ConfigError::invalid("health", format!("{name} must be > 0")));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for integration in &config.integrations {
        if !integration.url.starts_with("http://") && !integration.url.starts_with("https://") {
            errors.push(ConfigError::invalid(
                "integrations",
                format!("integration {} url must be http(s)", integration.id),
            ));
        }
        if !seen.insert(integration.id) {
            errors.push(ConfigError::invalid(
                "integrations",
                format!("integration id {} is defined twice", integration.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &ZapdeskConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&ZapdeskConfig::default()).is_ok());
    }

    #[test]
    fn inverted_ceilings_fail() {
        let mut config = ZapdeskConfig::default();
        config.pool.max_per_user = 600;
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("max_per_user <= max_per_tenant")));
    }

    #[test]
    fn ratio_outside_unit_interval_fails() {
        let mut config = ZapdeskConfig::default();
        config.batcher.min_compression_ratio = 1.5;
        assert!(messages(&config).iter().any(|m| m.starts_with("batcher:")));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ZapdeskConfig::default();
        config.storage.database_path = " ".into();
        config.server.log_format = "xml".into();
        config.health.probe_timeout_secs = 0;
        config.whatsapp.bridge_url = Some("http://bridge".into());
        assert_eq!(messages(&config).len(), 4);
    }

    #[test]
    fn duplicate_integration_ids_fail() {
        let mut config = ZapdeskConfig::default();
        let hook = crate::model::IntegrationConfig {
            id: 3,
            url: "https://n8n.local/hook".into(),
            token: None,
            timeout_secs: 10,
        };
        config.integrations = vec![hook.clone(), hook];
        let msgs = messages(&config);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("defined twice"));
    }
}
