//! Test sender for the QMS data updater.
//!
//! Publishes every `*.json` file of a directory to the event stream. The file stem is the
//! routing key (`QMS.UserCertificate.Create.json` → `eventType = QMS.UserCertificate.Create`)
//! and the file name is sent as the `subject` property.

use clap::Parser;
use database::redis::{RedisConfig, connect_from_config};
use eyre::{Result, WrapErr, bail};
use message_processor::{DEFAULT_ROUTING_KEY_PROPERTY, JSON_CONTENT_TYPE, StreamProducer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SUBJECT_PROPERTY: &str = "subject";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Publish QMS event files to the Redis stream")]
pub struct Args {
    /// Directory holding the event files
    #[arg(short, long, default_value = "events")]
    pub dir: PathBuf,

    /// Only send these files (with or without the .json extension)
    pub names: Vec<String>,

    /// Target stream
    #[arg(short, long, env = "QMS_STREAM_NAME", default_value = "qms:events")]
    pub stream: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Application property carrying the routing key
    #[arg(long, env = "ROUTING_KEY_PROPERTY", default_value = DEFAULT_ROUTING_KEY_PROPERTY)]
    pub routing_key_property: String,

    /// List the files that would be sent without connecting to Redis
    #[arg(long)]
    pub dry_run: bool,
}

/// An event file ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFile {
    pub path: PathBuf,
    pub event_type: String,
    pub file_name: String,
}

impl EventFile {
    fn from_path(path: PathBuf) -> Option<Self> {
        let event_type = path.file_stem()?.to_str()?.to_string();
        let file_name = path.file_name()?.to_str()?.to_string();
        Some(Self {
            path,
            event_type,
            file_name,
        })
    }

    fn matches(&self, names: &[String]) -> bool {
        names.is_empty()
            || names
                .iter()
                .any(|name| *name == self.file_name || *name == self.event_type)
    }

    /// Application properties sent with the body.
    pub fn properties(&self, routing_key_property: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (
                routing_key_property.to_string(),
                Value::String(self.event_type.clone()),
            ),
            (
                SUBJECT_PROPERTY.to_string(),
                Value::String(self.file_name.clone()),
            ),
        ])
    }
}

/// `*.json` files in `dir`, sorted by name and filtered by `names` (all when empty).
pub fn collect_event_files(dir: &Path, names: &[String]) -> Result<Vec<EventFile>> {
    if !dir.is_dir() {
        bail!("Events directory not found: {}", dir.display());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).wrap_err_with(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(file) = EventFile::from_path(path)
            && file.matches(names)
        {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

pub async fn run(args: Args) -> Result<()> {
    let files = collect_event_files(&args.dir, &args.names)?;
    if files.is_empty() {
        warn!(dir = %args.dir.display(), names = ?args.names, "No matching event files found");
        return Ok(());
    }

    if args.dry_run {
        for file in &files {
            info!(file = %file.path.display(), event_type = %file.event_type, "Would send");
        }
        return Ok(());
    }

    let redis = connect_from_config(&RedisConfig::new(args.redis_url.clone()))
        .await
        .wrap_err("Failed to connect to Redis")?;
    let producer = StreamProducer::new(redis, args.stream.clone())
        .with_routing_key_property(args.routing_key_property.clone());

    for file in &files {
        let body =
            fs::read(&file.path).wrap_err_with(|| format!("Failed to read {}", file.path.display()))?;
        if serde_json::from_slice::<Value>(&body).is_err() {
            warn!(file = %file.path.display(), "File is not valid JSON; sending as-is");
        }

        let id = producer
            .publish(
                &body,
                Some(JSON_CONTENT_TYPE),
                &file.properties(&args.routing_key_property),
            )
            .await
            .wrap_err_with(|| format!("Failed to send {}", file.path.display()))?;

        info!(
            file = %file.path.display(),
            event_type = %file.event_type,
            stream = %producer.stream_name(),
            stream_id = %id,
            "Sent message"
        );
    }

    info!(count = files.len(), "All messages sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qms-event-sender-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for name in files {
            fs::write(dir.join(name), b"{}").unwrap();
        }
        dir
    }

    #[test]
    fn test_collects_json_files_sorted() {
        let dir = scratch_dir(&["QMS.B.json", "QMS.A.json", "notes.txt"]);

        let files = collect_event_files(&dir, &[]).unwrap();

        let types: Vec<_> = files.iter().map(|f| f.event_type.as_str()).collect();
        assert_eq!(types, vec!["QMS.A", "QMS.B"]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_filters_by_file_name_or_event_type() {
        let dir = scratch_dir(&[
            "QMS.UserCertificate.Create.json",
            "QMS.UserCertificate.Delete.json",
            "QMS.Other.json",
        ]);
        let names = vec![
            "QMS.UserCertificate.Create.json".to_string(),
            "QMS.Other".to_string(),
        ];

        let files = collect_event_files(&dir, &names).unwrap();

        let types: Vec<_> = files.iter().map(|f| f.event_type.as_str()).collect();
        assert_eq!(types, vec!["QMS.Other", "QMS.UserCertificate.Create"]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = std::env::temp_dir().join("qms-event-sender-does-not-exist");
        let err = collect_event_files(&dir, &[]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_properties_carry_routing_key_and_subject() {
        let file = EventFile::from_path(PathBuf::from("events/QMS.UserCertificate.Create.json"))
            .unwrap();

        let props = file.properties("eventType");

        assert_eq!(props["eventType"], "QMS.UserCertificate.Create");
        assert_eq!(props[SUBJECT_PROPERTY], "QMS.UserCertificate.Create.json");
    }

    #[test]
    fn test_args_parse_names_and_defaults() {
        let args = Args::try_parse_from(["qms-event-sender", "--dry-run", "QMS.A"]).unwrap();
        assert_eq!(args.names, vec!["QMS.A".to_string()]);
        assert_eq!(args.dir, PathBuf::from("events"));
        assert!(args.dry_run);
    }
}
