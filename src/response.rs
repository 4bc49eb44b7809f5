//! Response sinks.

use crate::config::StatusCode;
use crate::error::ResponseError;
use crate::request::canonical_header_name;

/// Write-once destination for a response.
///
/// Headers and body must be written before the status is committed; a
/// stream-oriented sink may reject anything written afterwards.
pub trait ResponseSink: Send {
    type Error: Send;

    /// Set a header, replacing any previous value of the same name.
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), Self::Error>;

    /// Append to the body.
    fn write_body(&mut self, body: &[u8]) -> Result<(), Self::Error>;

    /// Commit the status line.
    fn write_status(&mut self, status: StatusCode) -> Result<(), Self::Error>;
}

/// In-memory response sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecorder {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    status: Option<StatusCode>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, or 200 if none was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = canonical_header_name(name);
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        match self.status {
            Some(_) => Err(ResponseError::StatusCommitted),
            None => Ok(()),
        }
    }
}

impl ResponseSink for ResponseRecorder {
    type Error = ResponseError;

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), ResponseError> {
        self.ensure_open()?;
        let name = canonical_header_name(name);
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name, value.to_string())),
        }
        Ok(())
    }

    fn write_body(&mut self, body: &[u8]) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body.extend_from_slice(body);
        Ok(())
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.status = Some(status);
        Ok(())
    }
}
