use std::fmt;

use anyhow::{Context, Result};

/// Process configuration, collected from the environment at startup.
///
/// The password arrives through a secret reference in the task definition;
/// it is never logged and never appears in Debug output.
#[derive(Clone)]
pub struct WorkerConfig {
    pub source_host: String,
    pub source_db: String,
    pub source_user: String,
    pub source_password: String,
    pub slot_name: String,
    pub stream_name: String,
    pub decoder_plugin: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source_host: require("POSTGRES_HOST")?,
            source_db: require("POSTGRES_DB")?,
            source_user: require("POSTGRES_USER")?,
            source_password: require("POSTGRES_PASSWORD")?,
            slot_name: require("REPLICATION_SLOT_NAME")?,
            stream_name: require("REPLICATION_KINESIS_STREAM_NAME")?,
            decoder_plugin: std::env::var("PG2KINESIS_DECODER_PLUGIN")
                .unwrap_or_else(|_| "wal2json".to_string()),
        })
    }

    /// Key-value connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} dbname={} user={} password={}",
            self.source_host, self.source_db, self.source_user, self.source_password
        )
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("source_host", &self.source_host)
            .field("source_db", &self.source_db)
            .field("source_user", &self.source_user)
            .field("source_password", &"<redacted>")
            .field("slot_name", &self.slot_name)
            .field("stream_name", &self.stream_name)
            .field("decoder_plugin", &self.decoder_plugin)
            .finish()
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {}", name))
}
