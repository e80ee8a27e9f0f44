use std::error::Error;
use std::fmt;

use serde::Serialize;

/// Status codes shared by shard replies and gateway errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    ResourceExhausted,
    Aborted,
    Internal,
    Unavailable,
}

impl Code {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the fan-out treats a failed shard call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardErrorClass {
    /// Cancelled or timed out; ignored.
    Transient,
    /// Aborts the whole broadcast.
    Fatal,
    /// The shard contributes nothing; ignored.
    Soft,
}

impl ShardErrorClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Soft => "soft",
        }
    }
}

/// Error reported by a shard client. `code` is `None` when the reply could
/// not be parsed into a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardError {
    code: Option<Code>,
    message: String,
}

impl ShardError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn unparsed(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Code::Cancelled, "shard call cancelled")
    }

    pub fn code(&self) -> Option<Code> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn class(&self) -> ShardErrorClass {
        match self.code {
            Some(Code::Cancelled | Code::DeadlineExceeded) => ShardErrorClass::Transient,
            Some(Code::Internal | Code::Unavailable | Code::ResourceExhausted) => {
                ShardErrorClass::Fatal
            }
            Some(
                Code::NotFound
                | Code::Aborted
                | Code::InvalidArgument
                | Code::Unknown,
            )
            | None => ShardErrorClass::Soft,
        }
    }
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => write!(f, "unparsed shard error: {}", self.message),
        }
    }
}

impl Error for ShardError {}

/// Semantic reason behind a [`SearchError`]; callers branch on this, never on
/// message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfig,
    InvalidArgument,
    ConnectionNotFound,
    EmptyResult,
    InsufficientResult { required: usize, found: usize },
    Shard { target: String },
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid_config",
            Self::InvalidArgument => "invalid_argument",
            Self::ConnectionNotFound => "connection_not_found",
            Self::EmptyResult => "empty_result",
            Self::InsufficientResult { .. } => "insufficient_result",
            Self::Shard { .. } => "shard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchError {
    code: Code,
    kind: ErrorKind,
    message: String,
    request_id: Option<String>,
    resource: Option<String>,
    serving_data: Option<String>,
    source: Option<ShardError>,
}

impl SearchError {
    pub fn new(code: Code, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            request_id: None,
            resource: None,
            serving_data: None,
            source: None,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, ErrorKind::InvalidConfig, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, ErrorKind::InvalidArgument, message)
    }

    pub fn connection_not_found(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, ErrorKind::ConnectionNotFound, message)
    }

    pub fn empty_result(code: Code, message: impl Into<String>) -> Self {
        Self::new(code, ErrorKind::EmptyResult, message)
    }

    pub fn insufficient_result(code: Code, required: usize, found: usize) -> Self {
        Self::new(
            code,
            ErrorKind::InsufficientResult { required, found },
            format!("search result length is not enough, required: {required}, found: {found}"),
        )
    }

    /// Wraps a fatal shard reply; unparsed replies surface as `Internal`.
    pub fn shard(target: impl Into<String>, error: ShardError) -> Self {
        let target = target.into();
        let code = error.code().unwrap_or(Code::Internal);
        let mut wrapped = Self::new(
            code,
            ErrorKind::Shard {
                target: target.clone(),
            },
            format!("failed to search shard {target}"),
        );
        wrapped.source = Some(error);
        wrapped
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attaches the JSON form of the request that failed.
    pub fn with_serving_data<T: Serialize>(mut self, data: &T) -> Self {
        self.serving_data = serde_json::to_string(data).ok();
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn serving_data(&self) -> Option<&str> {
        self.serving_data.as_deref()
    }

    pub fn shard_error(&self) -> Option<&ShardError> {
        self.source.as_ref()
    }

    /// Key/value pairs a transport layer attaches to its span for this error.
    pub fn trace_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![
            ("rpc.status_code", self.code.as_str().to_string()),
            ("error.kind", self.kind.as_str().to_string()),
            ("error.message", self.to_string()),
        ];
        if let Some(request_id) = &self.request_id {
            attributes.push(("request.id", request_id.clone()));
        }
        if let Some(resource) = &self.resource {
            attributes.push(("resource.name", resource.clone()));
        }
        attributes
    }
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request_id={request_id})")?;
        }
        Ok(())
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|error| error as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_errors_classify_by_code() {
        let cases = [
            (Code::Cancelled, ShardErrorClass::Transient),
            (Code::DeadlineExceeded, ShardErrorClass::Transient),
            (Code::Internal, ShardErrorClass::Fatal),
            (Code::Unavailable, ShardErrorClass::Fatal),
            (Code::ResourceExhausted, ShardErrorClass::Fatal),
            (Code::NotFound, ShardErrorClass::Soft),
            (Code::Aborted, ShardErrorClass::Soft),
            (Code::InvalidArgument, ShardErrorClass::Soft),
            (Code::Unknown, ShardErrorClass::Soft),
        ];
        for (code, class) in cases {
            assert_eq!(ShardError::new(code, "x").class(), class, "{code}");
        }
        assert_eq!(
            ShardError::unparsed("garbage").class(),
            ShardErrorClass::Soft
        );
    }

    #[test]
    fn shard_wrapper_keeps_code_and_source() {
        let error = SearchError::shard("10.0.0.1:8081", ShardError::new(Code::Unavailable, "down"))
            .with_request_id("req-1");
        assert_eq!(error.code(), Code::Unavailable);
        assert_eq!(
            error.kind(),
            &ErrorKind::Shard {
                target: "10.0.0.1:8081".to_string()
            }
        );
        assert_eq!(error.request_id(), Some("req-1"));
        assert!(error.source().is_some());
        assert!(error.to_string().contains("unavailable: down"));

        let unparsed = SearchError::shard("s", ShardError::unparsed("???"));
        assert_eq!(unparsed.code(), Code::Internal);
    }

    #[test]
    fn insufficient_result_carries_counts() {
        let error = SearchError::insufficient_result(Code::NotFound, 5, 3);
        assert_eq!(
            error.kind(),
            &ErrorKind::InsufficientResult {
                required: 5,
                found: 3
            }
        );
        assert_eq!(error.code(), Code::NotFound);
    }

    #[test]
    fn trace_attributes_include_context() {
        #[derive(Serialize)]
        struct Request {
            num: u32,
        }

        let error = SearchError::empty_result(Code::DeadlineExceeded, "empty")
            .with_request_id("req-9")
            .with_resource("gw(127.0.0.1) to [a, b]")
            .with_serving_data(&Request { num: 10 });
        let attributes = error.trace_attributes();
        assert!(attributes.contains(&("rpc.status_code", "deadline_exceeded".to_string())));
        assert!(attributes.contains(&("error.kind", "empty_result".to_string())));
        assert!(attributes.contains(&("request.id", "req-9".to_string())));
        assert!(attributes.contains(&("resource.name", "gw(127.0.0.1) to [a, b]".to_string())));
        assert_eq!(error.serving_data(), Some(r#"{"num":10}"#));
    }
}
