use alloy::primitives::Address;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

mod serde_helpers;

pub const DEFAULT_CHUNK_SIZE: u64 = 1_000;
pub const DEFAULT_CHECKPOINT_SPAN: u64 = 10_000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub db_dir: PathBuf,
    pub rpc_url: Url,
    pub contracts: Contracts,
    /// First block that can contain events; sync and checkpoints start here.
    #[serde(default, deserialize_with = "serde_helpers::block_number::deserialize")]
    pub upload_block: u64,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    pub content: ContentConfig,
    pub debug_log: Option<PathBuf>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Contracts {
    pub augur: Address,
    pub augur_trading: Address,
    pub share_token: Option<Address>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: humantime_serde::Serde<Duration>,
    /// Distance from the head below which blocks are treated as final.
    #[serde(default)]
    pub finality_depth: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: default_poll_interval(),
            finality_depth: 0,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_checkpoint_span")]
    pub max_span: u64,
    pub max_events: Option<u64>,
    #[serde(default = "default_checkpoint_interval")]
    pub interval: humantime_serde::Serde<Duration>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_span: DEFAULT_CHECKPOINT_SPAN,
            max_events: None,
            interval: default_checkpoint_interval(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ContentConfig {
    pub dir: PathBuf,
    /// Gateway used to fetch snapshots this node does not hold yet.
    pub gateway: Option<Url>,
    /// Snapshot root to warm-start from when the database is empty.
    pub warp_root: Option<String>,
    /// Gateway URLs whose content is replicated and pinned at startup.
    #[serde(default)]
    pub pin: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_checkpoint_span() -> u64 {
    DEFAULT_CHECKPOINT_SPAN
}

fn default_poll_interval() -> humantime_serde::Serde<Duration> {
    DEFAULT_POLL_INTERVAL.into()
}

fn default_checkpoint_interval() -> humantime_serde::Serde<Duration> {
    DEFAULT_CHECKPOINT_INTERVAL.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_with_defaults() {
        let yaml = r#"
db_dir: /var/lib/warp
rpc_url: http://localhost:8545
upload_block: "0x10"
contracts:
  augur: "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1"
  augur_trading: "0xa2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2"
content:
  dir: /var/lib/warp/content
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.upload_block, 16);
        assert_eq!(config.sync.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(*config.sync.poll_interval, Duration::from_secs(5));
        assert!(config.sync.enabled);
        assert_eq!(config.sync.finality_depth, 0);
        assert_eq!(config.checkpoints.max_span, DEFAULT_CHECKPOINT_SPAN);
        assert!(config.contracts.share_token.is_none());
        assert!(config.content.pin.is_empty());
    }

    #[test]
    fn json_overrides_and_unknown_fields() {
        let json = r#"{
            "db_dir": "db",
            "rpc_url": "wss://node.example",
            "upload_block": 1_000,
            "contracts": {
                "augur": "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1",
                "augur_trading": "0xa2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2"
            },
            "sync": { "chunk_size": 250, "poll_interval": "12s", "finality_depth": 6 },
            "checkpoints": { "max_span": 500, "max_events": 20000, "interval": "10m" },
            "content": { "dir": "content", "gateway": "https://gw.example/objects" }
        }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());

        let json = json.replace("1_000", "\"1_000\"");
        let config: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.upload_block, 1_000);
        assert_eq!(config.sync.chunk_size, 250);
        assert_eq!(config.sync.finality_depth, 6);
        assert_eq!(*config.checkpoints.interval, Duration::from_secs(600));
        assert_eq!(config.checkpoints.max_events, Some(20_000));

        let bad = json.replace("\"chunk_size\"", "\"chunk\"");
        assert!(serde_json::from_str::<Config>(&bad).is_err());
    }
}
