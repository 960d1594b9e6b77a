//! Manifest record and its positional wire form.
//!
//! On disk a manifest is a JSON array
//! `[displayName, totalSizeBytes, chunkLocators, hashLocator|null, contentHashHex|null]`.
//! Older catalogs carry only the first three (or four) elements; those still
//! decode, and are always written back in the full five-element form.

use serde_json::Value;

use crate::channel::Locator;
use crate::error::Result;
use crate::transfer::planner::chunk_count;

/// Which positional layout a manifest was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    /// `[name, size, locators]`
    Legacy,
    /// `[name, size, locators, hashLocator]`
    WithHashLocator,
    /// `[name, size, locators, hashLocator, contentHashHex]`
    Full,
}

/// Durable description of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Catalog key
    pub id: String,
    pub display_name: String,
    pub total_size_bytes: u64,
    /// One locator per chunk, in chunk order
    pub chunk_locators: Vec<Locator>,
    /// Standalone digest blob on the channel
    pub hash_locator: Option<Locator>,
    /// Digest computed at upload time
    pub content_hash_hex: Option<String>,
    pub version: ManifestVersion,
}

impl Manifest {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        total_size_bytes: u64,
        chunk_locators: Vec<Locator>,
        hash_locator: Option<Locator>,
        content_hash_hex: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            total_size_bytes,
            chunk_locators,
            hash_locator,
            content_hash_hex,
            version: ManifestVersion::Full,
        }
    }

    /// Decode the positional record stored under `id`.
    ///
    /// Returns a human-readable reason when the record is not a valid manifest
    /// (including `null`, which older tools left behind for failed uploads).
    pub fn from_record(id: &str, record: &Value) -> std::result::Result<Self, String> {
        let fields = match record {
            Value::Array(fields) => fields,
            Value::Null => return Err("null manifest".to_string()),
            other => return Err(format!("expected array, found {}", kind_of(other))),
        };
        let version = match fields.len() {
            3 => ManifestVersion::Legacy,
            4 => ManifestVersion::WithHashLocator,
            5 => ManifestVersion::Full,
            n => return Err(format!("expected 3 to 5 fields, found {}", n)),
        };

        let display_name = fields[0]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or("display name must be a non-empty string")?
            .to_string();
        let total_size_bytes = parse_size(&fields[1]).ok_or("size must be a non-negative integer")?;
        let chunk_locators = fields[2]
            .as_array()
            .ok_or("chunk locators must be an array")?
            .iter()
            .map(|v| v.as_str().map(Locator::from))
            .collect::<Option<Vec<_>>>()
            .ok_or("chunk locators must be strings")?;
        let hash_locator = optional_string(fields.get(3))
            .map_err(|_| "hash locator must be a string or null".to_string())?
            .map(Locator::from);
        let content_hash_hex = optional_string(fields.get(4))
            .map_err(|_| "content hash must be a string or null".to_string())?;

        Ok(Self {
            id: id.to_string(),
            display_name,
            total_size_bytes,
            chunk_locators,
            hash_locator,
            content_hash_hex,
            version,
        })
    }

    /// Encode as the full five-element record.
    pub fn to_record(&self) -> Value {
        Value::Array(vec![
            Value::from(self.display_name.clone()),
            Value::from(self.total_size_bytes),
            Value::Array(
                self.chunk_locators
                    .iter()
                    .map(|l| Value::from(l.as_str()))
                    .collect(),
            ),
            self.hash_locator
                .as_ref()
                .map_or(Value::Null, |l| Value::from(l.as_str())),
            self.content_hash_hex
                .as_ref()
                .map_or(Value::Null, |h| Value::from(h.clone())),
        ])
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_locators.len()
    }

    /// Whether the locator list covers the object at `chunk_size`.
    pub fn is_complete(&self, chunk_size: u64) -> Result<bool> {
        Ok(self.chunk_locators.len() == chunk_count(self.total_size_bytes, chunk_size)?)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_size(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    // Written by tools that stored sizes as floats
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as u64)
}

fn optional_string(value: Option<&Value>) -> std::result::Result<Option<String>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(()),
    }
}
