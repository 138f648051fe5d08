//! Wire protocol types between host and worker.
//!
//! Every frame is a JSON object with a `tag`. Requests are read as raw JSON
//! first so that echoes can mirror them unchanged and unknown tags can be
//! skipped without failing the connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::format::FormatNode;

/// Tags the worker understands.
pub const KNOWN_TAGS: &[&str] = &["echo", "sleep-echo", "run", "delref", "stop"];

/// Execute code in a scope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunRequest {
    pub id: Value,
    pub scope: String,
    pub code: String,
    /// `None` runs with the scope as both globals and locals.
    #[serde(default)]
    pub locals: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
enum Tagged {
    Echo {
        #[allow(dead_code)]
        id: Value,
    },
    SleepEcho {
        #[allow(dead_code)]
        id: Value,
    },
    Run(RunRequest),
    Delref {
        #[serde(rename = "ref")]
        handle: String,
    },
    Stop,
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Mirror the frame back.
    Echo { message: Value },
    /// Mirror the frame back after `delay`.
    SleepEcho { message: Value, delay: Duration },
    Run(RunRequest),
    /// Release a reference handle.
    Delref { handle: String },
    /// Stop reading from this connection.
    Stop,
    /// Well-formed frame with a tag this worker does not know.
    Unknown { tag: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not an object with a string 'tag'")]
    MissingTag,

    #[error("malformed '{tag}' request: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Request {
    pub fn parse(message: Value) -> Result<Self, ProtocolError> {
        let tag = message
            .get("tag")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTag)?;
        if !KNOWN_TAGS.contains(&tag) {
            return Ok(Self::Unknown {
                tag: tag.to_string(),
            });
        }

        let tagged = Tagged::deserialize(&message).map_err(|source| ProtocolError::Malformed {
            tag: tag.to_string(),
            source,
        })?;
        Ok(match tagged {
            Tagged::Echo { .. } => Self::Echo { message },
            Tagged::SleepEcho { .. } => Self::SleepEcho {
                delay: delay(message.get("sleep").unwrap_or(&Value::Null)),
                message,
            },
            Tagged::Run(run) => Self::Run(run),
            Tagged::Delref { handle } => Self::Delref { handle },
            Tagged::Stop => Self::Stop,
        })
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Echo { .. } => "echo",
            Self::SleepEcho { .. } => "sleep-echo",
            Self::Run(_) => "run",
            Self::Delref { .. } => "delref",
            Self::Stop => "stop",
            Self::Unknown { tag } => tag,
        }
    }
}

/// Seconds as a duration; negative, non-finite or non-numeric is zero.
/// Values too large for a `Duration` saturate.
fn delay(seconds: &Value) -> Duration {
    match seconds.as_f64() {
        Some(s) if s.is_finite() && s > 0.0 => {
            Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)
        }
        _ => Duration::ZERO,
    }
}

/// Outcome of a run, correlated by the request's `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Response {
    Result {
        id: Value,
        result: FormatNode,
    },
    Error {
        id: Value,
        /// Runtime error type name.
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "str")]
        message: String,
    },
}

impl Response {
    pub fn id(&self) -> &Value {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => id,
        }
    }
}

/// Single line printed on stdout once the listener is up (or has failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum Handshake {
    Ready { addr: String, port: u16 },
    Error { msg: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn echo_keeps_whole_message() {
        let message = json!({"tag": "echo", "id": 3, "payload": [1, 2]});
        let req = Request::parse(message.clone()).unwrap();
        assert_eq!(req, Request::Echo { message });
    }

    #[test]
    fn echo_keeps_numbers_verbatim() {
        let line = r#"{"id":1,"tag":"echo","x":123456789012345678901234567890,"y":0.1}"#;
        let message: Value = serde_json::from_str(line).unwrap();
        let Request::Echo { message } = Request::parse(message).unwrap() else {
            panic!("expected echo");
        };
        assert_eq!(serde_json::to_string(&message).unwrap(), line);
    }

    #[test]
    fn sleep_echo_delay() {
        let parse = |sleep: Value| match Request::parse(json!({"tag": "sleep-echo", "id": 1, "sleep": sleep})) {
            Ok(Request::SleepEcho { delay, .. }) => delay,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(parse(json!(0.25)), Duration::from_millis(250));
        assert_eq!(parse(json!(2)), Duration::from_secs(2));
        assert_eq!(parse(json!(-1.0)), Duration::ZERO);
        assert_eq!(parse(json!("soon")), Duration::ZERO);
        assert_eq!(parse(Value::Null), Duration::ZERO);
        assert_eq!(parse(json!(1e300)), Duration::MAX);
    }

    #[test]
    fn run_request_fields() {
        let req = Request::parse(json!({
            "tag": "run",
            "id": "r1",
            "scope": "@main",
            "code": "x = 1",
            "locals": {"y": 2}
        }))
        .unwrap();
        let Request::Run(run) = req else {
            panic!("expected run");
        };
        assert_eq!(run.id, json!("r1"));
        assert_eq!(run.scope, "@main");
        assert_eq!(run.locals.unwrap()["y"], json!(2));

        let req = Request::parse(json!({
            "tag": "run", "id": 2, "scope": "Main", "code": "", "locals": null
        }))
        .unwrap();
        assert!(matches!(req, Request::Run(RunRequest { locals: None, .. })));
    }

    #[test]
    fn delref_and_stop() {
        assert_eq!(
            Request::parse(json!({"tag": "delref", "ref": "12"})).unwrap(),
            Request::Delref {
                handle: "12".into()
            }
        );
        assert_eq!(Request::parse(json!({"tag": "stop"})).unwrap(), Request::Stop);
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let req = Request::parse(json!({"tag": "ping", "id": 1})).unwrap();
        assert_eq!(req.tag(), "ping");
    }

    #[test]
    fn malformed_requests() {
        assert!(matches!(
            Request::parse(json!({"id": 1})),
            Err(ProtocolError::MissingTag)
        ));
        assert!(matches!(
            Request::parse(json!([1, 2])),
            Err(ProtocolError::MissingTag)
        ));
        assert!(matches!(
            Request::parse(json!({"tag": "echo"})),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            Request::parse(json!({"tag": "run", "id": 1, "scope": "@a"})),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            Request::parse(json!({"tag": "delref", "ref": 12})),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn result_response_wire_shape() {
        let resp = Response::Result {
            id: json!("r1"),
            result: FormatNode::BigInt("1073741824".into()),
        };
        insta::assert_json_snapshot!(resp, @r#"
        {
          "tag": "result",
          "id": "r1",
          "result": {
            "t": "int",
            "v": "1073741824"
          }
        }
        "#);
    }

    #[test]
    fn error_response_wire_shape() {
        let resp = Response::Error {
            id: json!("a"),
            kind: "ValueError".into(),
            message: "x".into(),
        };
        insta::assert_json_snapshot!(resp, @r#"
        {
          "tag": "error",
          "id": "a",
          "type": "ValueError",
          "str": "x"
        }
        "#);
    }

    #[test]
    fn handshake_wire_shape() {
        let ready = Handshake::Ready {
            addr: "127.0.0.1".into(),
            port: 40123,
        };
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            json!({"status": "READY", "addr": "127.0.0.1", "port": 40123})
        );
        let error = Handshake::Error {
            msg: "Address already in use".into(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"status": "ERROR", "msg": "Address already in use"})
        );
    }
}
