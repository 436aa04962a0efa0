//! `cloak parse` and `cloak detect` - offline diagnostics.

use super::load_config;
use cloak_crypto::EnvelopeDetector;
use cloak_sql::StatementParser;
use std::path::Path;

pub fn render_parse(sql: &str) -> anyhow::Result<String> {
    let parsed = StatementParser::new().parse(sql);
    Ok(serde_json::to_string_pretty(&parsed)?)
}

pub fn detect(value: &str, config_path: Option<&Path>) -> anyhow::Result<String> {
    let detector = match config_path {
        Some(path) => EnvelopeDetector::from_config(&load_config(path)?.engine),
        None => EnvelopeDetector::default(),
    };
    Ok(describe(&detector, value))
}

fn describe(detector: &EnvelopeDetector, value: &str) -> String {
    if !detector.is_encrypted(value) {
        return "plaintext".to_string();
    }
    match detector.scheme_of(value) {
        Some(scheme) => format!("encrypted ({})", scheme.prefix),
        None => "encrypted (legacy envelope)".to_string(),
    }
}
