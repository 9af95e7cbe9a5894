use std::fmt;
use serde::{Deserialize, Serialize};

/// Per-attempt timeout fired before a response arrived
pub const CODE_TIMEOUT: i64 = -1;
/// DNS failure, refused or reset connection
pub const CODE_NETWORK: i64 = -2;
/// Transport failure that fits no other bucket
pub const CODE_TRANSPORT: i64 = -3;
/// Registry had no endpoint to send to
pub const CODE_NO_ENDPOINTS: i64 = -4;
/// Configuration rejected
pub const CODE_INVALID_CONFIGURATION: i64 = -5;
/// Backend task is gone
pub const CODE_DISCONNECTED: i64 = -6;
/// Generic internal failure
pub const CODE_OTHER: i64 = -99;
/// Response body was not JSON
pub const CODE_PROTOCOL: i64 = -32700;
/// Application error carrying a non-numeric code
pub const CODE_APPLICATION: i64 = -32000;

/// Numeric application codes worth trying on another endpoint
pub const RETRYABLE_APPLICATION_CODES: &[i64] = &[
  429
, -32603
];

/// Textual application codes meaning "try another endpoint"
pub const RETRYABLE_APPLICATION_SENTINELS: &[&str] = &[
  "SERVER_BUSY"
, "SERVICE_UNAVAILABLE"
, "TRY_ANOTHER_ENDPOINT"
];

/// Flavour of transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind
{   Timeout
  , Network
  , Other
}

impl TransportKind
{   pub fn code(&self) -> i64
    {   match self
        {   TransportKind::Timeout => CODE_TIMEOUT
          , TransportKind::Network => CODE_NETWORK
          , TransportKind::Other => CODE_TRANSPORT
        }
    }
}

/// Code carried by an `error` object in a response body.
/// Backends send either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApplicationCode
{   Number(i64)
  , Text(String)
}

impl ApplicationCode
{   /// Numeric view of the code; numeric strings are parsed
    pub fn as_i64(&self) -> Option<i64>
    {   match self
        {   ApplicationCode::Number(n) => Some(*n)
          , ApplicationCode::Text(s) => s.trim().parse().ok()
        }
    }
}

impl fmt::Display for ApplicationCode
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   match self
        {   ApplicationCode::Number(n) => write!(f, "{}", n)
          , ApplicationCode::Text(s) => write!(f, "{}", s)
        }
    }
}

/// Every failure an RPC call can surface.
/// Implements Clone so one result can be handed to several waiters
/// and sent through channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Timeout, connection or other transport failure
    Transport
    {   kind: TransportKind
      , message: String
    }
  , /// Endpoint answered with a non-2xx status
    HttpStatus
    {   status: u16
      , body: String
    }
  , /// Response body could not be decoded as JSON
    Protocol(String)
  , /// Response body carried an `error` object
    Application
    {   code: ApplicationCode
      , message: String
    }
  , /// Attempt budget spent without a success
    AllEndpointsFailed
    {   attempts: usize
      , last: Box<Error>
    }
  , /// Registry returned no endpoint
    NoEndpoints
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Backend task no longer accepts commands
    Disconnected
  , /// Generic error
    Other(String)
}

impl Error
{   /// Numeric code of the failure.
    /// For an exhausted budget this is the code of the last failure.
    pub fn code(&self) -> i64
    {   match self
        {   Error::Transport { kind, .. } => kind.code()
          , Error::HttpStatus { status, .. } => i64::from(*status)
          , Error::Protocol(_) => CODE_PROTOCOL
          , Error::Application { code, .. } => {
              code.as_i64().unwrap_or(CODE_APPLICATION)
            }
          , Error::AllEndpointsFailed { last, .. } => last.code()
          , Error::NoEndpoints => CODE_NO_ENDPOINTS
          , Error::InvalidConfiguration(_) => CODE_INVALID_CONFIGURATION
          , Error::Disconnected => CODE_DISCONNECTED
          , Error::Other(_) => CODE_OTHER
        }
    }

    /// Human readable message without the variant prefix
    pub fn message(&self) -> String
    {   match self
        {   Error::Transport { message, .. } => message.clone()
          , Error::HttpStatus { status, body } => {
              if body.is_empty()
              {   format!("HTTP status {}", status)
              } else
              {   format!("HTTP status {}: {}", status, body)
              }
            }
          , Error::Protocol(msg) => msg.clone()
          , Error::Application { message, .. } => message.clone()
          , Error::AllEndpointsFailed { last, .. } => last.message()
          , Error::NoEndpoints => "no endpoint configured".to_string()
          , Error::InvalidConfiguration(msg) => msg.clone()
          , Error::Disconnected => "backend disconnected".to_string()
          , Error::Other(msg) => msg.clone()
        }
    }

    /// True when the call ended on a per-attempt timeout
    pub fn is_timeout(&self) -> bool
    {   match self
        {   Error::Transport { kind, .. } => *kind == TransportKind::Timeout
          , Error::AllEndpointsFailed { last, .. } => last.is_timeout()
          , _ => false
        }
    }

    /// Whether another endpoint might answer where this one failed.
    /// An aggregate is never retryable; its attempts are spent.
    pub fn is_retryable(&self) -> bool
    {   match self
        {   Error::Transport { .. } => true
          , Error::HttpStatus { status, .. } => (500..600).contains(status)
          , Error::Application { code, .. } => {
              if let ApplicationCode::Text(text) = code
              {   if RETRYABLE_APPLICATION_SENTINELS.contains(&text.as_str())
                  {   return true;
                  }
              }
              match code.as_i64()
              {   Some(n) => (500..600).contains(&n)
                    || RETRYABLE_APPLICATION_CODES.contains(&n)
                , None => false
              }
            }
          , _ => false
        }
    }

    /// The failure that ended the call, looking through the aggregate
    pub fn root(&self) -> &Error
    {   match self
        {   Error::AllEndpointsFailed { last, .. } => last.root()
          , other => other
        }
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Transport { kind, message } => {
              match kind
              {   TransportKind::Timeout => {
                    write!(f, "Request timed out: {}", message)
                  }
                , TransportKind::Network => {
                    write!(f, "Network error: {}", message)
                  }
                , TransportKind::Other => {
                    write!(f, "Transport error: {}", message)
                  }
              }
            }
          , Error::HttpStatus { status, body } => {
              write!(f, "HTTP error {}", status)?;
              if !body.is_empty()
              {   write!(f, ": {}", body)?;
              }
              Ok(())
            }
          , Error::Protocol(msg) => {
              write!(f, "Protocol error: {}", msg)
            }
          , Error::Application { code, message } => {
              write!(f, "Application error {}: {}", code, message)
            }
          , Error::AllEndpointsFailed { attempts, last } => {
              write!(f,
                "All endpoints failed after {} attempts; last error: {}",
                attempts, last
              )
            }
          , Error::NoEndpoints => {
              write!(f, "No endpoint configured")
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Disconnected => {
              write!(f, "Backend disconnected")
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}
