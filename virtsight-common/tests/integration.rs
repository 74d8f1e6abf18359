//! Integration tests for virtsight-common library.

use std::io::Write;

use serde::Deserialize;
use virtsight_common::{Labels, LogFormat, LoggingConfig, Sample, load_config};

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    logging: LoggingConfig,
    name: String,
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            // comments are allowed in JSON5
            name: "hypervisor01",
            logging: {{ level: "warn", format: "json" }},
        }}"#
    )
    .unwrap();

    let config: FileConfig = load_config(file.path()).unwrap();

    assert_eq!(config.name, "hypervisor01");
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_sample_with_labels() {
    let sample = Sample::new(
        1024.0,
        Labels::new()
            .with("domain", "4dea22b3-1d52-d8f3-2516-782e98ab3fa0")
            .with("target_interface", "vnet0"),
    );

    assert_eq!(sample.value, 1024.0);
    assert_eq!(
        sample.labels.get("domain"),
        Some("4dea22b3-1d52-d8f3-2516-782e98ab3fa0")
    );

    let keys = vec!["domain".to_string(), "target_interface".to_string()];
    assert!(sample.labels.has_key_set(&keys));
}
