use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

#[derive(Parser, Debug)]
pub struct CLIArguments {
    #[clap(long, value_parser)]
    pub config_path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IndexerConfig {
    pub listening_port: u16,
    pub base_url: String,
    pub network: String,
    pub chain_count: i64,
    pub min_height: i64,
    pub fetch_interval_in_blocks: i64,
    pub sleep_interval_ms: u64,
    pub gap_range_limit: i64,
    pub archive_bucket: Option<String>,
    pub archive_prefix: String,
    pub archive_max_keys: usize,
    pub archive_max_iterations: Option<u64>,
    pub page_concurrency: usize,
    pub node_concurrency: usize,
    pub retry_sweep_interval_ms: u64,
    pub dedup_flush_secs: u64,
    pub guards_batch_size: i64,
    pub guards_concurrency: usize,
    pub publish_hook_url: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            listening_port: 9090,
            base_url: String::new(),
            network: String::new(),
            chain_count: 20,
            min_height: 0,
            fetch_interval_in_blocks: 100,
            sleep_interval_ms: 5000,
            gap_range_limit: 10,
            archive_bucket: None,
            archive_prefix: "headers/".to_string(),
            archive_max_keys: 20,
            archive_max_iterations: None,
            page_concurrency: 20,
            node_concurrency: 50,
            retry_sweep_interval_ms: 300_000,
            dedup_flush_secs: 600,
            guards_batch_size: 1000,
            guards_concurrency: 50,
            publish_hook_url: None,
        }
    }
}

fn env_override(config: &mut IndexerConfig) {
    if let Ok(url) = env::var("SYNC_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(network) = env::var("SYNC_NETWORK") {
        config.network = network;
    }
    if let Ok(height) = env::var("SYNC_MIN_HEIGHT") {
        if let Ok(height) = height.parse() {
            config.min_height = height;
        }
    }
    if let Ok(interval) = env::var("SYNC_FETCH_INTERVAL_IN_BLOCKS") {
        if let Ok(interval) = interval.parse() {
            config.fetch_interval_in_blocks = interval;
        }
    }
    if let Ok(sleep) = env::var("SLEEP_INTERVAL_MS") {
        if let Ok(sleep) = sleep.parse() {
            config.sleep_interval_ms = sleep;
        }
    }
    if let Ok(bucket) = env::var("SYNC_ARCHIVE_BUCKET") {
        config.archive_bucket = Some(bucket);
    }
    if let Ok(hook) = env::var("SYNC_PUBLISH_HOOK_URL") {
        config.publish_hook_url = Some(hook);
    }
}

pub(crate) fn load_config(config_path: &str) -> std::result::Result<IndexerConfig, String> {
    let mut config = match fs::read_to_string(config_path) {
        Ok(file_str) => match toml::from_str(&file_str) {
            Ok(r) => r,
            Err(e) => {
                println!("error...loading default config {}", e);
                IndexerConfig::default()
            }
        },
        Err(_) => IndexerConfig::default(),
    };

    env_override(&mut config);

    if config.base_url.is_empty() {
        return Err("SYNC_BASE_URL must be set".to_string());
    }
    if config.network.is_empty() {
        return Err("SYNC_NETWORK must be set".to_string());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon_contract() {
        let config = IndexerConfig::default();
        assert_eq!(config.chain_count, 20);
        assert_eq!(config.sleep_interval_ms, 5000);
        assert_eq!(config.archive_max_keys, 20);
        assert_eq!(config.node_concurrency, 50);
        assert_eq!(config.dedup_flush_secs, 600);
        assert_eq!(config.guards_batch_size, 1000);
    }

    #[test]
    fn toml_overlay_keeps_unset_defaults() {
        let parsed: IndexerConfig =
            toml::from_str("network = \"mainnet01\"\nmin_height = 1000").unwrap();
        assert_eq!(parsed.network, "mainnet01");
        assert_eq!(parsed.min_height, 1000);
        assert_eq!(parsed.chain_count, 20);
    }
}
