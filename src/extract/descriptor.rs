//! Fetched-page descriptor and by-name field access
//!
//! Rules match pages by field name (`url`, `mime_type`, ...). Instead of
//! reflecting over the struct, every readable field is listed once in
//! [`FIELDS`] together with a getter.

use crate::extract::ExtractError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A fetched page handed to extraction
#[derive(Debug, Clone, PartialEq)]
pub struct PageDescriptor {
    pub session_id: String,
    pub url: String,
    pub parent_url: Option<String>,
    pub method: String,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
    pub http_status_code: u16,
    pub content_length: u64,
    /// Fetch duration in milliseconds
    pub execution_time: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub body: Vec<u8>,
}

/// A descriptor field value read by name
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(u64),
    Time(DateTime<Utc>),
}

impl FieldValue {
    /// The string a rule pattern is matched against
    pub fn as_match_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Time(t) => t.to_rfc3339(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => Value::from(*n),
            Self::Time(t) => Value::String(t.to_rfc3339()),
        }
    }
}

type FieldGetter = fn(&PageDescriptor) -> Option<FieldValue>;

fn text(value: &Option<String>) -> Option<FieldValue> {
    value.clone().map(FieldValue::Text)
}

fn get_session_id(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Text(d.session_id.clone()))
}

fn get_url(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Text(d.url.clone()))
}

fn get_parent_url(d: &PageDescriptor) -> Option<FieldValue> {
    text(&d.parent_url)
}

fn get_method(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Text(d.method.clone()))
}

fn get_mime_type(d: &PageDescriptor) -> Option<FieldValue> {
    text(&d.mime_type)
}

fn get_charset(d: &PageDescriptor) -> Option<FieldValue> {
    text(&d.charset)
}

fn get_http_status_code(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Number(u64::from(d.http_status_code)))
}

fn get_content_length(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Number(d.content_length))
}

fn get_execution_time(d: &PageDescriptor) -> Option<FieldValue> {
    Some(FieldValue::Number(d.execution_time))
}

fn get_last_modified(d: &PageDescriptor) -> Option<FieldValue> {
    d.last_modified.map(FieldValue::Time)
}

/// Readable fields: (name, camelCase alias, getter)
pub static FIELDS: [(&str, &str, FieldGetter); 10] = [
    ("session_id", "sessionId", get_session_id),
    ("url", "url", get_url),
    ("parent_url", "parentUrl", get_parent_url),
    ("method", "method", get_method),
    ("mime_type", "mimeType", get_mime_type),
    ("charset", "charset", get_charset),
    ("http_status_code", "httpStatusCode", get_http_status_code),
    ("content_length", "contentLength", get_content_length),
    ("execution_time", "executionTime", get_execution_time),
    ("last_modified", "lastModified", get_last_modified),
];

/// Returns true if `name` is a readable descriptor field
pub fn is_known_field(name: &str) -> bool {
    FIELDS
        .iter()
        .any(|(field, alias, _)| *field == name || *alias == name)
}

impl PageDescriptor {
    /// Creates a descriptor for a `200 OK` GET response
    pub fn new(session_id: &str, url: &str, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            session_id: session_id.to_string(),
            url: url.to_string(),
            parent_url: None,
            method: "GET".to_string(),
            mime_type: None,
            charset: None,
            http_status_code: 200,
            content_length: body.len() as u64,
            execution_time: 0,
            last_modified: None,
            body,
        }
    }

    /// Reads a field by name (snake_case or camelCase)
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        FIELDS
            .iter()
            .find(|(field, alias, _)| *field == name || *alias == name)
            .and_then(|(_, _, getter)| getter(self))
    }

    /// Decodes the body as UTF-8
    ///
    /// Invalid UTF-8 is an error when the charset is absent or UTF-8; any
    /// other declared charset is decoded lossily.
    pub fn decode_body(&self) -> Result<String, ExtractError> {
        let is_utf8 = self
            .charset
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case("utf-8") || c.eq_ignore_ascii_case("utf8"))
            .unwrap_or(true);

        if is_utf8 {
            String::from_utf8(self.body.clone()).map_err(|e| ExtractError::HtmlParse {
                url: self.url.clone(),
                message: e.to_string(),
            })
        } else {
            Ok(String::from_utf8_lossy(&self.body).into_owned())
        }
    }

    /// The body as text, never failing
    pub fn source_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Builds the initial output record from the descriptor
    ///
    /// Every field except `session_id` is copied when present and non-blank.
    pub(crate) fn seed_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        for (name, _, getter) in FIELDS.iter() {
            if *name == "session_id" {
                continue;
            }
            if let Some(value) = getter(self) {
                if !value.is_blank() {
                    record.insert(name.to_string(), value.to_json());
                }
            }
        }
        record
    }
}
