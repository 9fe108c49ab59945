//! Relay settings: JSON file, then flags on top.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use relay_pipeline::{OverflowPolicy, PipelineConfig, ShutdownMode, DEFAULT_QUEUE_CAPACITY};
use relay_source::{RtspConfig, RtspSource};
use relay_transport::{NatsOptions, PublishPolicy, RetryPolicy, DEFAULT_NATS_PORT};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Everything the binary needs to start a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub txq: usize,
    pub url: Option<String>,
    pub nats: String,
    pub subject: String,
    pub overflow: OverflowPolicy,
    pub drain_timeout_ms: Option<u64>,
    pub publish_timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub limit: Option<u64>,
    pub stats_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            txq: DEFAULT_QUEUE_CAPACITY,
            url: None,
            nats: format!("127.0.0.1:{}", DEFAULT_NATS_PORT),
            subject: "area.0.cam.0.0".to_string(),
            overflow: OverflowPolicy::Block,
            drain_timeout_ms: None,
            publish_timeout_ms: None,
            retry_attempts: None,
            limit: None,
            stats_interval_secs: 5,
        }
    }
}

impl RelayConfig {
    /// Build and validate the effective configuration for `cli`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overwrite fields with every flag that was given.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(txq) = cli.txq {
            self.txq = txq;
        }
        if let Some(url) = &cli.url {
            self.url = Some(url.clone());
        }
        if let Some(nats) = &cli.nats {
            self.nats = nats.clone();
        }
        if let Some(subject) = &cli.subject {
            self.subject = subject.clone();
        }
        if let Some(overflow) = cli.overflow {
            self.overflow = overflow;
        }
        if cli.drain_timeout_ms.is_some() {
            self.drain_timeout_ms = cli.drain_timeout_ms;
        }
        if cli.publish_timeout_ms.is_some() {
            self.publish_timeout_ms = cli.publish_timeout_ms;
        }
        if cli.retry_attempts.is_some() {
            self.retry_attempts = cli.retry_attempts;
        }
        if cli.limit.is_some() {
            self.limit = cli.limit;
        }
        if let Some(secs) = cli.stats_interval_secs {
            self.stats_interval_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.rtsp_source()?;

        if self.nats.trim().is_empty() {
            bail!("NATS address must not be empty");
        }
        if self.retry_attempts == Some(0) {
            bail!("retry attempts must be at least 1");
        }
        if self.publish_timeout_ms == Some(0) {
            bail!("publish timeout must be positive");
        }

        self.pipeline_config()
            .validate()
            .context("Invalid pipeline settings")?;
        Ok(())
    }

    /// The RTSP URL; missing or empty is an error.
    pub fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("missing RTSP URL (use --url)"))
    }

    pub fn rtsp_source(&self) -> Result<RtspSource> {
        let url = self.url()?;
        RtspSource::new(RtspConfig::new(url)).context("Invalid RTSP URL")
    }

    pub fn nats_options(&self) -> NatsOptions {
        NatsOptions {
            publish_timeout: self.publish_timeout_ms.map(Duration::from_millis),
            ..NatsOptions::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let shutdown = match self.drain_timeout_ms {
            Some(ms) => ShutdownMode::Drain {
                timeout: Duration::from_millis(ms),
            },
            None => ShutdownMode::Discard,
        };
        let publish = match self.retry_attempts {
            Some(attempts) if attempts > 1 => PublishPolicy::Retry(RetryPolicy::with_attempts(attempts)),
            _ => PublishPolicy::Fatal,
        };

        PipelineConfig {
            queue_capacity: self.txq,
            subject: self.subject.clone(),
            overflow: self.overflow,
            shutdown,
            publish,
            max_units: self.limit,
            stats_interval: Duration::from_secs(self.stats_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::process;

    fn cli_with_url() -> Cli {
        Cli {
            url: Some("rtsp://cam/stream".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::load(&cli_with_url()).unwrap();
        assert_eq!(config.txq, 11);
        assert_eq!(config.nats, "127.0.0.1:4222");
        assert_eq!(config.subject, "area.0.cam.0.0");

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.queue_capacity, 11);
        assert_eq!(pipeline.shutdown, ShutdownMode::Discard);
        assert_eq!(pipeline.publish, PublishPolicy::Fatal);
        assert_eq!(pipeline.stats_interval, Duration::from_secs(5));
        assert_eq!(config.nats_options().publish_timeout, None);
    }

    #[test]
    fn test_missing_url_is_an_error() {
        assert!(RelayConfig::load(&Cli::default()).is_err());

        let blank = Cli {
            url: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(RelayConfig::load(&blank).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            Cli {
                url: Some("http://cam/stream".to_string()),
                ..Default::default()
            },
            Cli {
                txq: Some(0),
                ..cli_with_url()
            },
            Cli {
                subject: Some("two words".to_string()),
                ..cli_with_url()
            },
            Cli {
                retry_attempts: Some(0),
                ..cli_with_url()
            },
            Cli {
                stats_interval_secs: Some(0),
                ..cli_with_url()
            },
        ];

        for cli in cases {
            assert!(RelayConfig::load(&cli).is_err(), "accepted {:?}", cli);
        }
    }

    #[test]
    fn test_policies_from_flags() {
        let cli = Cli {
            drain_timeout_ms: Some(1500),
            retry_attempts: Some(4),
            publish_timeout_ms: Some(250),
            limit: Some(6000),
            ..cli_with_url()
        };
        let config = RelayConfig::load(&cli).unwrap();
        let pipeline = config.pipeline_config();

        assert_eq!(
            pipeline.shutdown,
            ShutdownMode::Drain {
                timeout: Duration::from_millis(1500)
            }
        );
        assert_eq!(pipeline.publish, PublishPolicy::Retry(RetryPolicy::with_attempts(4)));
        assert_eq!(pipeline.max_units, Some(6000));
        assert_eq!(
            config.nats_options().publish_timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_flags_override_file() {
        let path = env::temp_dir().join(format!("nalu-relay-config-{}.json", process::id()));
        fs::write(
            &path,
            r#"{
                "txq": 64,
                "url": "rtsp://file-cam/stream",
                "nats": "nats://bus:4222",
                "overflow": "drop-newest"
            }"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            txq: Some(8),
            ..Default::default()
        };
        let config = RelayConfig::load(&cli).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.txq, 8);
        assert_eq!(config.url.as_deref(), Some("rtsp://file-cam/stream"));
        assert_eq!(config.nats, "nats://bus:4222");
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.subject, "area.0.cam.0.0");
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let result: std::result::Result<RelayConfig, _> =
            serde_json::from_str(r#"{ "queue": 4 }"#);
        assert!(result.is_err());
    }
}
