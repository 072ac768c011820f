// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! Every struct uses `#[serde(deny_unknown_fields)]` so a misspelled key is
//! rejected at startup instead of being silently ignored.

use serde::{Deserialize, Serialize};

/// Top-level Zapdesk configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ZapdeskConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP listener, webhook and UI socket settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Transport settings shared by every WhatsApp channel.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Realtime connection ceilings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Realtime event coalescing.
    #[serde(default)]
    pub batcher: BatcherConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// Scripted chatbot and notice suppression settings.
    #[serde(default)]
    pub chatbot: ChatbotConfig,

    #[serde(default)]
    pub ticket: TicketConfig,

    /// Channel probes and contact import.
    #[serde(default)]
    pub health: HealthConfig,

    /// HTTP endpoints bound to integration ids on channels and queues.
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_server_name() -> String {
    "zapdesk".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn data_dir() -> std::path::PathBuf {
    dirs::data_dir()
        .map(|d| d.join("zapdesk"))
        .unwrap_or_else(|| std::path::PathBuf::from(".zapdesk"))
}

fn default_database_path() -> String {
    data_dir().join("zapdesk.db").display().to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Token UI sockets must present. `None` accepts any client.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// App secret used to verify `X-Hub-Signature-256` on webhook posts.
    #[serde(default)]
    pub app_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: None,
            app_secret: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    #[serde(default = "default_graph_api_version")]
    pub graph_api_version: String,

    /// Applies to every outbound provider call, media downloads included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Directory downloaded attachments are written to.
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// WebSocket URL of the socket-protocol bridge. `None` disables socket channels.
    #[serde(default)]
    pub bridge_url: Option<String>,

    #[serde(default = "default_reconnect_max_backoff_secs")]
    pub reconnect_max_backoff_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            graph_api_base: default_graph_api_base(),
            graph_api_version: default_graph_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
            media_dir: default_media_dir(),
            bridge_url: None,
            reconnect_max_backoff_secs: default_reconnect_max_backoff_secs(),
        }
    }
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_api_version() -> String {
    "v20.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_media_dir() -> String {
    data_dir().join("media").display().to_string()
}

fn default_reconnect_max_backoff_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_per_tenant")]
    pub max_per_tenant: usize,

    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,

    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    #[serde(default = "default_sixty")]
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_per_tenant: default_max_per_tenant(),
            max_per_user: default_max_per_user(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            sweep_interval_secs: default_sixty(),
        }
    }
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_per_tenant() -> usize {
    500
}

fn default_max_per_user() -> usize {
    3
}

fn default_inactivity_timeout_secs() -> u64 {
    300
}

fn default_sixty() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatcherConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Base flush interval; the fallback flusher runs at twice this.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Minimum fraction of bytes compression must save to be kept.
    #[serde(default = "default_min_compression_ratio")]
    pub min_compression_ratio: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            min_compression_ratio: default_min_compression_ratio(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_batch_size() -> usize {
    50
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_min_compression_ratio() -> f64 {
    0.2
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_heap_threshold_mb")]
    pub heap_threshold_mb: u64,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_memory_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Empty rooms idle for longer than this are dropped by the sweep.
    #[serde(default = "default_room_idle_secs")]
    pub room_idle_secs: u64,

    #[serde(default = "default_reclaim_cooldown_secs")]
    pub reclaim_cooldown_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_threshold_mb: default_heap_threshold_mb(),
            monitor_interval_secs: default_monitor_interval_secs(),
            sweep_interval_secs: default_memory_sweep_interval_secs(),
            room_idle_secs: default_room_idle_secs(),
            reclaim_cooldown_secs: default_reclaim_cooldown_secs(),
        }
    }
}

fn default_heap_threshold_mb() -> u64 {
    500
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_memory_sweep_interval_secs() -> u64 {
    300
}

fn default_room_idle_secs() -> u64 {
    600
}

fn default_reclaim_cooldown_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatbotConfig {
    /// Sliding inactivity expiry of a scheduler conversation.
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,

    #[serde(default = "default_sixty")]
    pub sweep_interval_secs: u64,

    /// How many days ahead the scheduler offers dates.
    #[serde(default = "default_booking_days_ahead")]
    pub booking_days_ahead: u32,

    /// Re-send suppression window for greeting and out-of-hours notices.
    #[serde(default = "default_notice_window_secs")]
    pub notice_window_secs: u64,

    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,

    #[serde(default = "default_exit_message")]
    pub exit_message: String,

    #[serde(default = "default_inactivity_message")]
    pub inactivity_message: String,

    #[serde(default = "default_reset_keyword")]
    pub reset_keyword: String,

    #[serde(default = "default_exit_keyword")]
    pub exit_keyword: String,

    /// Offset from UTC of the wall clock used for booking dates and times.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl_secs(),
            sweep_interval_secs: default_sixty(),
            booking_days_ahead: default_booking_days_ahead(),
            notice_window_secs: default_notice_window_secs(),
            notice_capacity: default_notice_capacity(),
            exit_message: default_exit_message(),
            inactivity_message: default_inactivity_message(),
            reset_keyword: default_reset_keyword(),
            exit_keyword: default_exit_keyword(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_state_ttl_secs() -> u64 {
    300
}

fn default_booking_days_ahead() -> u32 {
    7
}

fn default_notice_window_secs() -> u64 {
    1800
}

fn default_notice_capacity() -> usize {
    2500
}

fn default_exit_message() -> String {
    "Atendimento encerrado. Obrigado pelo contato!".to_string()
}

fn default_inactivity_message() -> String {
    "Encerramos o agendamento por inatividade. Envie AGENDA para recomeçar.".to_string()
}

fn default_reset_keyword() -> String {
    "#".to_string()
}

fn default_exit_keyword() -> String {
    "SAIR".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TicketConfig {
    /// A closed 1:1 ticket updated within this window is reopened instead of
    /// replaced. 0 always opens a new ticket.
    #[serde(default)]
    pub reopen_window_secs: u64,

    #[serde(default = "default_group_cache_ttl_secs")]
    pub group_cache_ttl_secs: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            reopen_window_secs: 0,
            group_cache_ttl_secs: default_group_cache_ttl_secs(),
        }
    }
}

fn default_group_cache_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_import_interval_secs")]
    pub import_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            import_interval_secs: default_import_interval_secs(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_import_interval_secs() -> u64 {
    86_400
}

/// An n8n-style webhook that receives inbound messages as JSON.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationConfig {
    /// Id referenced by `integration_id` on channels, queues and tickets.
    pub id: i64,

    pub url: String,

    /// Sent as a bearer token when set.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_integration_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_integration_timeout_secs() -> u64 {
    10
}
