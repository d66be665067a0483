use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vton_comfyui::client::ws_url_from_http;
use vton_comfyui::reconnect::ReconnectConfig;
use vton_comfyui::session::SessionConfig;
use vton_core::workflow::{SlotRef, TemplateSlots};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Must exceed the generation timeout.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for the ComfyUI event reader, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Body limit for image uploads.
    pub max_upload_bytes: usize,
    /// Job template document loaded at startup.
    pub workflow_path: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// ComfyUI HTTP base URL.
    pub comfyui_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    pub comfyui_connect_timeout_secs: u64,
    /// Upper bound on one `POST /prompt` round trip.
    pub comfyui_submit_timeout_secs: u64,
    /// Upper bound on waiting for one generation to finish.
    pub generation_timeout_secs: u64,
    /// Template slots bound per request.
    pub slots: TemplateSlots,
    /// Nodes whose binary output frames are kept.
    pub output_nodes: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                          |
    /// |--------------------------------|----------------------------------|
    /// | `HOST`                         | `0.0.0.0`                        |
    /// | `PORT`                         | `8000`                           |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`          |
    /// | `REQUEST_TIMEOUT_SECS`         | `360`                            |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `10`                             |
    /// | `MAX_UPLOAD_BYTES`             | `20971520`                       |
    /// | `WORKFLOW_PATH`                | `workflow/idm-vton.json`         |
    /// | `INPUT_DIR`                    | `storage/input`                  |
    /// | `OUTPUT_DIR`                   | `storage/output`                 |
    /// | `COMFYUI_URL`                  | `http://127.0.0.1:8188`          |
    /// | `COMFYUI_WS_URL`               | derived from `COMFYUI_URL`       |
    /// | `COMFYUI_CONNECT_TIMEOUT_SECS` | `10`                             |
    /// | `COMFYUI_SUBMIT_TIMEOUT_SECS`  | `30`                             |
    /// | `GENERATION_TIMEOUT_SECS`      | `300`                            |
    /// | `HUMAN_IMAGE_SLOT`             | `1.image`                        |
    /// | `GARMENT_IMAGE_SLOT`           | `2.image`                        |
    /// | `OUTPUT_PREFIX_SLOT`           | `save.filename_prefix`           |
    /// | `OUTPUT_NODES`                 | node of `OUTPUT_PREFIX_SLOT`     |
    ///
    /// Panics on values that do not parse; misconfiguration should stop the
    /// process before it binds.
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");
        let port: u16 = parse_env("PORT", "8000");

        let cors_origins = split_list(&env_or("CORS_ORIGINS", "http://localhost:5173"));

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", "360");
        let shutdown_timeout_secs: u64 = parse_env("SHUTDOWN_TIMEOUT_SECS", "10");
        let max_upload_bytes: usize = parse_env("MAX_UPLOAD_BYTES", "20971520");

        let workflow_path = PathBuf::from(env_or("WORKFLOW_PATH", "workflow/idm-vton.json"));
        let input_dir = PathBuf::from(env_or("INPUT_DIR", "storage/input"));
        let output_dir = PathBuf::from(env_or("OUTPUT_DIR", "storage/output"));

        let comfyui_url = env_or("COMFYUI_URL", "http://127.0.0.1:8188");
        let comfyui_ws_url =
            std::env::var("COMFYUI_WS_URL").unwrap_or_else(|_| ws_url_from_http(&comfyui_url));
        let comfyui_connect_timeout_secs: u64 = parse_env("COMFYUI_CONNECT_TIMEOUT_SECS", "10");
        let comfyui_submit_timeout_secs: u64 = parse_env("COMFYUI_SUBMIT_TIMEOUT_SECS", "30");
        let generation_timeout_secs: u64 = parse_env("GENERATION_TIMEOUT_SECS", "300");

        let slots = TemplateSlots {
            human_image: parse_slot("HUMAN_IMAGE_SLOT", "1.image"),
            garment_image: parse_slot("GARMENT_IMAGE_SLOT", "2.image"),
            output_prefix: parse_slot("OUTPUT_PREFIX_SLOT", "save.filename_prefix"),
        };

        let output_nodes = std::env::var("OUTPUT_NODES")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| vec![slots.output_prefix.node_id.clone()]);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            workflow_path,
            input_dir,
            output_dir,
            comfyui_url,
            comfyui_ws_url,
            comfyui_connect_timeout_secs,
            comfyui_submit_timeout_secs,
            generation_timeout_secs,
            slots,
            output_nodes,
        }
    }

    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(self.comfyui_connect_timeout_secs),
            reconnect: ReconnectConfig::default(),
            output_nodes: self.output_nodes.clone(),
            submit_timeout: Duration::from_secs(self.comfyui_submit_timeout_secs),
            ..Default::default()
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

// ---- private helpers ----

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_env<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_or(name, default)
        .parse()
        .unwrap_or_else(|e| panic!("{name} is invalid: {e}"))
}

fn parse_slot(name: &str, default: &str) -> SlotRef {
    SlotRef::parse(&env_or(name, default)).unwrap_or_else(|e| panic!("{name} is invalid: {e}"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
