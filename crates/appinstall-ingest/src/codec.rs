//! Install log line codec
//!
//! Turns one tab-separated line into an [`InstallRecord`] and then into the
//! [`StoreItem`] written to memcached. All functions here are pure and can be
//! called from any number of workers at once.
//!
//! Line layout: `dev_type \t dev_id \t lat \t lon \t app,app,...`

use appinstall_common::types::{InstallRecord, StoreItem, UserApps};
use thiserror::Error;

/// Number of tab-separated fields in a line
pub const FIELD_COUNT: usize = 5;

/// Why a line could not be turned into a store item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {FIELD_COUNT} tab-separated fields, found {found}")]
    MalformedLine { found: usize },

    #[error("empty device type or device id")]
    MissingIdentity,

    #[error("invalid coordinate '{value}'")]
    InvalidCoordinate { value: String },

    #[error("invalid app id '{value}'")]
    InvalidAppId { value: String },

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Parse and encode a raw line in one step
pub fn encode(line: &str) -> Result<StoreItem, CodecError> {
    let record = parse(line)?;
    encode_record(&record)
}

/// Parse a raw line into a validated record
pub fn parse(line: &str) -> Result<InstallRecord, CodecError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();

    let [device_type, device_id, lat, lon, raw_apps] = fields[..] else {
        return Err(CodecError::MalformedLine { found: fields.len() });
    };

    if device_type.is_empty() || device_id.is_empty() {
        return Err(CodecError::MissingIdentity);
    }

    let lat = parse_coordinate(lat)?;
    let lon = parse_coordinate(lon)?;

    let apps = raw_apps
        .split(',')
        .map(|token| {
            token.trim().parse::<u32>().map_err(|_| CodecError::InvalidAppId {
                value: token.to_string(),
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    Ok(InstallRecord {
        device_type: device_type.to_string(),
        device_id: device_id.to_string(),
        lat,
        lon,
        apps,
    })
}

/// Serialize a record into its keyed store item
pub fn encode_record(record: &InstallRecord) -> Result<StoreItem, CodecError> {
    let value = postcard::to_allocvec(&record.user_apps())
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    Ok(StoreItem {
        key: record.key(),
        value,
    })
}

/// Restore the payload stored under a key
pub fn decode(bytes: &[u8]) -> Result<UserApps, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

fn parse_coordinate(raw: &str) -> Result<f64, CodecError> {
    raw.parse::<f64>().map_err(|_| CodecError::InvalidCoordinate {
        value: raw.to_string(),
    })
}
