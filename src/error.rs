use std::{error::Error, fmt, io, path::PathBuf};

use tokio::task::JoinError;

/// A frame that could not be turned into a request. The connection stays open.
#[derive(Debug)]
pub enum ProtocolError {
    /// Bytes that do not start a known frame, discarded up to the next resync point.
    Garbage { discarded: usize },
    /// The second `|` separator never showed up before the line ended.
    MissingDelimiter,
    /// The text after the second `|` is not a JSON object.
    NotAnObject,
    /// The pending frame grew past the configured limit.
    TooLong { len: usize, max: usize },
    /// The stream ended in the middle of a frame.
    Truncated { len: usize },
    /// A structurally valid frame carrying a tag other than `2_`.
    UnknownTag(String),
    /// The body is not a valid job payload.
    InvalidJson(serde_json::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Garbage { discarded } => write!(f, "discarded {discarded} bytes of garbage"),
            Self::MissingDelimiter => f.write_str("second '|' delimiter not found"),
            Self::NotAnObject => f.write_str("frame body is not a JSON object"),
            Self::TooLong { len, max } => write!(f, "frame of {len} bytes exceeds limit of {max}"),
            Self::Truncated { len } => write!(f, "stream ended inside a {len} byte frame"),
            Self::UnknownTag(tag) => write!(f, "unknown frame tag {tag:?}"),
            Self::InvalidJson(e) => write!(f, "invalid job payload: {e}"),
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidJson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidJson(value)
    }
}

/// Failure turning a rendered reconstruction into image bytes.
#[derive(Debug)]
pub enum RenderError {
    Empty,
    NotSquare(usize),
    Encode(image::ImageError),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("cannot render an empty vector"),
            Self::NotSquare(len) => write!(f, "vector length {len} is not a perfect square"),
            Self::Encode(e) => write!(f, "png encoding failed: {e}"),
        }
    }
}

impl Error for RenderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<image::ImageError> for RenderError {
    fn from(value: image::ImageError) -> Self {
        Self::Encode(value)
    }
}

/// Reasons a dequeued job is aborted. None of these reach the client.
#[derive(Debug)]
pub enum JobError {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Parse {
        path: PathBuf,
        line: usize,
        value: String,
    },
    Shape(String),
    UnknownAlgorithm(String),
    Render(RenderError),
    Encode(serde_json::Error),
    Send(io::Error),
    Join(JoinError),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Parse { path, line, value } => write!(
                f,
                "invalid number {value:?} at {}:{line}",
                path.display()
            ),
            Self::Shape(msg) => write!(f, "shape mismatch: {msg}"),
            Self::UnknownAlgorithm(name) => write!(f, "unknown algorithm: {name}"),
            Self::Render(e) => write!(f, "render error: {e}"),
            Self::Encode(e) => write!(f, "response encoding failed: {e}"),
            Self::Send(e) => write!(f, "failed to send response: {e}"),
            Self::Join(e) => write!(f, "reconstruction task failed: {e}"),
        }
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Render(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Send(e) => Some(e),
            Self::Join(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RenderError> for JobError {
    fn from(value: RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<serde_json::Error> for JobError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// The host could not be sampled. The job is kept and retried.
#[derive(Debug)]
pub enum SampleError {
    Unsupported,
    InvalidReading(&'static str),
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("resource sampling is not supported on this host"),
            Self::InvalidReading(what) => write!(f, "invalid {what} reading"),
        }
    }
}

impl Error for SampleError {}

/// A non-blocking enqueue that did not happen. The rejected item is handed back.
#[derive(Debug)]
pub enum EnqueueError<T> {
    Full(T),
    Closed(T),
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("job queue is full"),
            Self::Closed(_) => f.write_str("job queue is closed"),
        }
    }
}

impl<T: fmt::Debug> Error for EnqueueError<T> {}

/// Startup configuration failures.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse(serde_json::Error),
    Env { var: &'static str, value: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read config {}: {source}", path.display())
            }
            Self::Parse(e) => write!(f, "invalid config: {e}"),
            Self::Env { var, value } => write!(f, "invalid value {value:?} for {var}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
