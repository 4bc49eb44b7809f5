//! Configuration for the HTTP simulator.
//!
//! Defines the resources (request matchers) and the effects applied to
//! requests that match them. A [`Config`] is decoded from YAML, validated
//! once, and from then on treated as an immutable snapshot.

use crate::duration;
use crate::error::{Error, ValidationError};
use crate::glob::{GlobExpression, GlobMap};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Main configuration: resources in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Resources, first match wins
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Config {
    /// Decode and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Decode and validate YAML from an arbitrary reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        for (index, resource) in self.resources.iter().enumerate() {
            resource
                .validate()
                .map_err(|source| Error::Resource { index, source })?;
        }
        Ok(())
    }
}

/// A single resource: request constraints plus an optional effect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    /// HTTP methods to match (empty = any)
    #[serde(default)]
    pub methods: Vec<HttpMethod>,

    /// Path glob (omitted = any path)
    #[serde(default)]
    pub path: GlobExpression,

    /// Header name glob to ordered value globs
    #[serde(default)]
    pub headers: GlobMap<Vec<GlobExpression>>,

    /// Query parameter name glob to ordered value globs
    #[serde(default)]
    pub query: GlobMap<Vec<GlobExpression>>,

    /// What to do with matching requests
    #[serde(default)]
    pub effect: Option<Effect>,
}

impl Resource {
    /// Validate the resource.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for method in &self.methods {
            method.validate()?;
        }
        if let Some(dup) = self.headers.find_duplicate() {
            return Err(ValidationError::DuplicateGlob {
                field: "header",
                pattern: dup.to_string(),
            });
        }
        if let Some(dup) = self.query.find_duplicate() {
            return Err(ValidationError::DuplicateGlob {
                field: "query",
                pattern: dup.to_string(),
            });
        }
        if let Some(effect) = &self.effect {
            effect.validate()?;
        }
        Ok(())
    }
}

/// HTTP method token, e.g. `GET`. Custom all-uppercase tokens are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct HttpMethod(String);

impl HttpMethod {
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidHttpMethod(self.0.clone()));
        }
        Ok(())
    }
}

impl From<&str> for HttpMethod {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Effect applied to a matching request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Effect {
    /// Artificial latency before anything else happens
    #[serde(default)]
    pub delay: Option<DurationRange>,

    /// Response that replaces the real one
    #[serde(default)]
    pub replace: Option<Replace>,
}

impl Effect {
    /// An effect must either delay by a non-zero minimum or replace.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(delay) = &self.delay {
            delay.validate()?;
        }
        if let Some(replace) = &self.replace {
            replace.validate()?;
        }
        let delays = self.delay.as_ref().is_some_and(|d| !d.min.is_zero());
        if !delays && self.replace.is_none() {
            return Err(ValidationError::NoEffect);
        }
        Ok(())
    }
}

/// Inclusive-exclusive delay range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationRange {
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub min: Duration,

    #[serde(default, deserialize_with = "duration::deserialize")]
    pub max: Duration,
}

impl DurationRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min > self.max {
            return Err(ValidationError::MinGreaterMax {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Response written instead of forwarding the request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Replace {
    /// HTTP status code
    #[serde(rename = "status-code")]
    pub status_code: StatusCode,

    /// Literal body
    #[serde(default)]
    pub body: Option<String>,

    /// Headers set on the response, overwriting existing values
    #[serde(default)]
    pub headers: BTreeMap<HeaderName, String>,
}

impl Replace {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code: StatusCode::from(status_code),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(HeaderName::new(name), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.status_code.validate()?;
        for name in self.headers.keys() {
            name.validate()?;
        }
        Ok(())
    }
}

/// HTTP response status code as written in the configuration.
///
/// Kept signed so out-of-range values survive decoding and are reported by
/// validation rather than by the YAML decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(i64);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// The code as `u16`, if it is in range.
    pub fn as_u16(self) -> Option<u16> {
        u16::try_from(self.0).ok()
    }

    /// Reason phrase of a registered status code.
    pub fn canonical_reason(self) -> Option<&'static str> {
        let reason = match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            102 => "Processing",
            103 => "Early Hints",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            207 => "Multi-Status",
            208 => "Already Reported",
            226 => "IM Used",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            414 => "Request URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Requested Range Not Satisfiable",
            417 => "Expectation Failed",
            418 => "I'm a teapot",
            421 => "Misdirected Request",
            422 => "Unprocessable Entity",
            423 => "Locked",
            424 => "Failed Dependency",
            425 => "Too Early",
            426 => "Upgrade Required",
            428 => "Precondition Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            451 => "Unavailable For Legal Reasons",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            506 => "Variant Also Negotiates",
            507 => "Insufficient Storage",
            508 => "Loop Detected",
            510 => "Not Extended",
            511 => "Network Authentication Required",
            _ => return None,
        };
        Some(reason)
    }

    pub fn validate(self) -> Result<(), ValidationError> {
        match self.canonical_reason() {
            Some(_) => Ok(()),
            None => Err(ValidationError::InvalidStatusCode(self.0)),
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(i64::from(code))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response header name: ASCII letters, digits and `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct HeaderName(String);

impl HeaderName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let valid = !self.0.is_empty()
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-');
        if !valid {
            return Err(ValidationError::InvalidHeaderName(self.0.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
