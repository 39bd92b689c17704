//! Flat string-map encoding for job payloads.
//!
//! The scheduler only persists `String -> String` maps as job data, so every
//! payload is flattened into an [`EncodedPayload`]: one entry per field, each
//! scalar written in a single canonical text form that the decode path reads
//! back exactly. Sum types add a discriminator under [`VARIANT_KEY`].
//!
//! ```rust
//! use dog_scheduler::codec::{EncodedPayload, JobPayload};
//! use dog_scheduler::DecodeError;
//!
//! #[derive(Debug, PartialEq)]
//! enum ReportJob {
//!     Daily { team: String },
//!     Adhoc { team: String, rows: u32 },
//! }
//!
//! impl JobPayload for ReportJob {
//!     const JOB_TYPE: &'static str = "report_job";
//!
//!     fn encode(&self) -> EncodedPayload {
//!         match self {
//!             Self::Daily { team } => EncodedPayload::new().with_variant("daily").with("team", team),
//!             Self::Adhoc { team, rows } => EncodedPayload::new()
//!                 .with_variant("adhoc")
//!                 .with("team", team)
//!                 .with("rows", rows),
//!         }
//!     }
//!
//!     fn decode(payload: &EncodedPayload) -> Result<Self, DecodeError> {
//!         match payload.variant()? {
//!             "daily" => Ok(Self::Daily { team: payload.get("team")? }),
//!             "adhoc" => Ok(Self::Adhoc { team: payload.get("team")?, rows: payload.get("rows")? }),
//!             _ => Err(payload.unknown_variant()),
//!         }
//!     }
//! }
//!
//! let job = ReportJob::Adhoc { team: "ops".into(), rows: 10 };
//! assert_eq!(ReportJob::decode(&job.encode()).unwrap(), job);
//! ```

pub mod json;

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{DecodeError, DecodeResult};

pub use json::Json;

/// Reserved key carrying the sum-type discriminator
pub const VARIANT_KEY: &str = "dog.variant";

/// Reserved key carrying the payload's job type, attached at schedule time.
/// Payloads must not write it; scheduling such a payload fails.
pub const JOB_TYPE_KEY: &str = "dog.job_type";

/// Typed job payload with an exhaustive encode/decode pair
pub trait JobPayload: Sized + Send + 'static {
    /// Job type identifier stored next to the payload
    const JOB_TYPE: &'static str;

    /// Flatten the payload. Never fails.
    fn encode(&self) -> EncodedPayload;

    /// Rebuild the payload, naming the offending field on failure
    fn decode(payload: &EncodedPayload) -> DecodeResult<Self>;
}

/// Scalar with one canonical text form shared by encode and decode
pub trait FieldValue: Sized {
    /// Human-readable type name used in decode errors
    const TYPE_NAME: &'static str;

    fn to_field(&self) -> String;

    fn from_field(raw: &str) -> Option<Self>;
}

impl FieldValue for String {
    const TYPE_NAME: &'static str = "string";

    fn to_field(&self) -> String {
        self.clone()
    }

    fn from_field(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

macro_rules! display_from_str_field {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                const TYPE_NAME: &'static str = $name;

                fn to_field(&self) -> String {
                    self.to_string()
                }

                fn from_field(raw: &str) -> Option<Self> {
                    raw.parse().ok()
                }
            }
        )*
    };
}

// Display for floats prints the shortest text that parses back to the same value
display_from_str_field!(
    bool => "bool",
    char => "char",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    i128 => "i128",
    isize => "isize",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    u128 => "u128",
    usize => "usize",
    f32 => "f32",
    f64 => "f64",
);

// RFC 3339 only covers four-digit years; instants outside 0000..=9999 fall
// back to `@<unix seconds>.<nine-digit nanos>`
impl FieldValue for DateTime<Utc> {
    const TYPE_NAME: &'static str = "RFC 3339 or @epoch timestamp";

    fn to_field(&self) -> String {
        if (0..=9999).contains(&self.year()) {
            self.to_rfc3339_opts(SecondsFormat::Nanos, true)
        } else {
            format!("@{}.{:09}", self.timestamp(), self.timestamp_subsec_nanos())
        }
    }

    fn from_field(raw: &str) -> Option<Self> {
        match raw.strip_prefix('@') {
            Some(epoch) => {
                let (secs, nanos) = epoch.split_once('.')?;
                if nanos.len() != 9 || !nanos.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Utc.timestamp_opt(secs.parse().ok()?, nanos.parse().ok()?).single()
            }
            None => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl FieldValue for Uuid {
    const TYPE_NAME: &'static str = "uuid";

    fn to_field(&self) -> String {
        self.hyphenated().to_string()
    }

    fn from_field(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok()
    }
}

/// Flat field-name to string-value mapping stored as trigger data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload {
    fields: HashMap<String, String>,
}

impl EncodedPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a field in its canonical form, replacing any previous value
    pub fn insert<V: FieldValue>(&mut self, field: impl Into<String>, value: &V) {
        self.fields.insert(field.into(), value.to_field());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with<V: FieldValue>(mut self, field: impl Into<String>, value: &V) -> Self {
        self.insert(field, value);
        self
    }

    /// Write an optional field; `None` leaves the key absent
    pub fn insert_opt<V: FieldValue>(&mut self, field: impl Into<String>, value: Option<&V>) {
        if let Some(value) = value {
            self.insert(field, value);
        }
    }

    /// Tag the payload with a sum-type variant
    pub fn with_variant(mut self, variant: &str) -> Self {
        self.fields.insert(VARIANT_KEY.to_string(), variant.to_string());
        self
    }

    /// Read a required field
    pub fn get<V: FieldValue>(&self, field: &str) -> DecodeResult<V> {
        self.get_opt(field)?.ok_or_else(|| DecodeError::MissingField {
            field: field.to_string(),
            expected: V::TYPE_NAME,
        })
    }

    /// Read an optional field; absent is `Ok(None)`, malformed is still an error
    pub fn get_opt<V: FieldValue>(&self, field: &str) -> DecodeResult<Option<V>> {
        match self.fields.get(field) {
            None => Ok(None),
            Some(raw) => V::from_field(raw)
                .map(Some)
                .ok_or_else(|| DecodeError::MalformedField {
                    field: field.to_string(),
                    expected: V::TYPE_NAME,
                    value: raw.clone(),
                }),
        }
    }

    /// The sum-type discriminator; absent is reported as an unknown variant
    pub fn variant(&self) -> DecodeResult<&str> {
        self.raw(VARIANT_KEY)
            .ok_or(DecodeError::UnknownVariant { found: None })
    }

    /// Error for a discriminator outside the closed set
    pub fn unknown_variant(&self) -> DecodeError {
        DecodeError::UnknownVariant {
            found: self.raw(VARIANT_KEY).map(str::to_string),
        }
    }

    /// Raw stored text of a field
    pub fn raw(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.fields
    }
}

impl From<HashMap<String, String>> for EncodedPayload {
    fn from(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, String)> for EncodedPayload {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for EncodedPayload {
    type Item = (String, String);
    type IntoIter = std::collections::hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
