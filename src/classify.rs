//! Turns the raw outcome of one attempt into success, retryable or fatal

use serde_json::Value;
use log::{debug, warn};

use crate::error::{ApplicationCode, Error, TransportKind, CODE_OTHER};
use crate::request::ErrorPayload;
use crate::transport::{HttpReply, TransportFailure};

/// Classified result of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome
{   Success(Value)
  , Retryable(Error)
  , Fatal(Error)
}

/// Classify one attempt.
///
/// - transport failures are retryable
/// - non-2xx: retryable for 5xx only
/// - undecodable body: fatal
/// - `error` object: fatal unless its code is on the retry allow-list
/// - otherwise `result` if present, else the whole body
pub fn classify(
  outcome: Result<HttpReply, TransportFailure>
) -> AttemptOutcome
{   let reply = match outcome
    {   Ok(reply) => reply
      , Err(failure) => {
          return AttemptOutcome::Retryable(transport_error(failure));
        }
    };

    if !reply.is_success()
    {   let err = Error::HttpStatus
        {   status: reply.status
          , body: truncate(&reply.body, 256)
        };
        return if (500..600).contains(&reply.status)
        {   AttemptOutcome::Retryable(err)
        } else
        {   AttemptOutcome::Fatal(err)
        };
    }

    let body: Value = match serde_json::from_str(&reply.body)
    {   Ok(body) => body
      , Err(e) => {
          warn!("Response body is not JSON: {}", e);
          return AttemptOutcome::Fatal(Error::Protocol(
            format!("invalid JSON body: {}", e)
          ));
        }
    };

    if let Some(error) = body.get("error").filter(|e| is_truthy(e))
    {   let err = application_error(error);
        debug!("Application error in response: {}", err);
        return if err.is_retryable()
        {   AttemptOutcome::Retryable(err)
        } else
        {   AttemptOutcome::Fatal(err)
        };
    }

    match body
    {   Value::Object(mut map) if map.contains_key("result") => {
          AttemptOutcome::Success(
            map.remove("result").unwrap_or(Value::Null)
          )
        }
      , whole => AttemptOutcome::Success(whole)
    }
}

/// Map a transport failure onto the error taxonomy
pub fn transport_error(failure: TransportFailure) -> Error
{   match failure
    {   TransportFailure::Timeout(after) => Error::Transport
        {   kind: TransportKind::Timeout
          , message: format!("no response within {:?}", after)
        }
      , TransportFailure::Network(msg) => Error::Transport
        {   kind: TransportKind::Network
          , message: msg
        }
      , TransportFailure::Other(msg) => Error::Transport
        {   kind: TransportKind::Other
          , message: msg
        }
    }
}

fn application_error(error: &Value) -> Error
{   match serde_json::from_value::<ErrorPayload>(error.clone())
    {   Ok(payload) => Error::Application
        {   message: payload.describe()
          , code: payload.code
        }
      , Err(_) => {
          // Shapes outside the contract: bare strings, float codes, missing code
          let code = error.get("code")
            .and_then(|c| c.as_f64())
            .map(|c| ApplicationCode::Number(c as i64))
            .unwrap_or(ApplicationCode::Number(CODE_OTHER));
          let message = error.get("message")
            .or_else(|| error.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| error.to_string());
          Error::Application
          {   code
            , message
          }
        }
    }
}

/// JavaScript-style truthiness of the `error` field
fn is_truthy(value: &Value) -> bool
{   match value
    {   Value::Null => false
      , Value::Bool(b) => *b
      , Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true)
      , Value::String(s) => !s.is_empty()
      , Value::Array(_) | Value::Object(_) => true
    }
}

fn truncate(body: &str, max: usize) -> String
{   match body.char_indices().nth(max)
    {   Some((idx, _)) => format!("{}...", &body[..idx])
      , None => body.to_string()
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use std::time::Duration;
    use serde_json::json;
    use crate::error::{CODE_NETWORK, CODE_PROTOCOL, CODE_TIMEOUT};

    fn ok(body: &str) -> Result<HttpReply, TransportFailure>
    {   Ok(HttpReply::new(200, body))
    }

    fn fatal_code(outcome: AttemptOutcome) -> i64
    {   match outcome
        {   AttemptOutcome::Fatal(e) => e.code()
          , other => panic!("expected fatal, got {:?}", other)
        }
    }

    fn retryable_code(outcome: AttemptOutcome) -> i64
    {   match outcome
        {   AttemptOutcome::Retryable(e) => e.code()
          , other => panic!("expected retryable, got {:?}", other)
        }
    }

    #[test]
    fn test_result_field_is_unwrapped()
    {   assert_eq!(
          classify(ok(r#"{"result": [1, 2]}"#)),
          AttemptOutcome::Success(json!([1, 2]))
        );
    }

    #[test]
    fn test_null_result_is_still_a_result()
    {   assert_eq!(
          classify(ok(r#"{"result": null, "id": 3}"#)),
          AttemptOutcome::Success(Value::Null)
        );
    }

    #[test]
    fn test_body_without_result_or_error_is_the_result()
    {   assert_eq!(
          classify(ok(r#"{"page": 1, "data": "x"}"#)),
          AttemptOutcome::Success(json!({"page": 1, "data": "x"}))
        );
        assert_eq!(
          classify(ok(r#"{"error": null, "value": 1}"#)),
          AttemptOutcome::Success(json!({"error": null, "value": 1}))
        );
    }

    #[test]
    fn test_status_codes()
    {   assert_eq!(fatal_code(classify(Ok(HttpReply::new(404, "")))), 404);
        assert_eq!(fatal_code(classify(Ok(HttpReply::new(429, "")))), 429);
        assert_eq!(retryable_code(classify(Ok(HttpReply::new(502, "")))), 502);
    }

    #[test]
    fn test_non_2xx_wins_over_body()
    {   let outcome = classify(Ok(HttpReply::new(400, r#"{"result": 1}"#)));
        assert_eq!(fatal_code(outcome), 400);
    }

    #[test]
    fn test_invalid_json_is_fatal()
    {   assert_eq!(fatal_code(classify(ok("{\"result\": "))), CODE_PROTOCOL);
    }

    #[test]
    fn test_application_error_is_fatal_by_default()
    {   match classify(ok(r#"{"error": {"code": 4001, "message": "bad symbol"}}"#))
        {   AttemptOutcome::Fatal(Error::Application { code, message }) => {
              assert_eq!(code, ApplicationCode::Number(4001));
              assert_eq!(message, "bad symbol");
            }
          , other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn test_application_error_retry_allow_list()
    {   assert_eq!(
          retryable_code(classify(ok(r#"{"error": {"code": 503}}"#))),
          503
        );
        assert_eq!(
          retryable_code(classify(ok(r#"{"error": {"code": "502", "error": "upstream"}}"#))),
          502
        );
        assert!(matches!(
          classify(ok(r#"{"error": {"code": "SERVER_BUSY"}}"#)),
          AttemptOutcome::Retryable(_)
        ));
    }

    #[test]
    fn test_malformed_error_object_still_classified()
    {   match classify(ok(r#"{"error": "maintenance"}"#))
        {   AttemptOutcome::Fatal(Error::Application { message, .. }) => {
              assert_eq!(message, "maintenance");
            }
          , other => panic!("unexpected {:?}", other)
        }
        assert_eq!(
          fatal_code(classify(ok(r#"{"error": {"code": 12.0, "message": 5}}"#))),
          12
        );
    }

    #[test]
    fn test_transport_failures_are_retryable()
    {   assert_eq!(
          retryable_code(classify(Err(TransportFailure::Timeout(Duration::from_secs(1))))),
          CODE_TIMEOUT
        );
        assert_eq!(
          retryable_code(classify(Err(TransportFailure::Network("refused".into())))),
          CODE_NETWORK
        );
        assert!(matches!(
          classify(Err(TransportFailure::Other("odd".into()))),
          AttemptOutcome::Retryable(_)
        ));
    }

    #[test]
    fn test_truncate_long_bodies()
    {   let long = "x".repeat(300);
        assert_eq!(truncate(&long, 256).len(), 259);
        assert_eq!(truncate("short", 256), "short");
    }
}
