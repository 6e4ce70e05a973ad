use serde_json::Value;
use std::ops::ControlFlow;

use tweetbase_types::RawPost;

/// A decoded record from the stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Post(RawPost),
    /// Any other control or status object (limit notices, stall warnings, ...)
    Notice(Value),
    /// The platform is closing the connection
    Disconnect { code: i64, reason: Option<String> },
}

impl StreamEvent {
    /// Decode one line. Blank lines and empty objects carry nothing and give `None`.
    pub fn parse(line: &str) -> serde_json::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(line)?;
        if let Some(disconnect) = value.get("disconnect") {
            return Ok(Some(StreamEvent::Disconnect {
                code: disconnect.get("code").and_then(Value::as_i64).unwrap_or(1),
                reason: disconnect
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }));
        }
        if value.get("text").is_some() {
            return Ok(Some(StreamEvent::Post(serde_json::from_value(value)?)));
        }
        match &value {
            Value::Object(map) if map.is_empty() => Ok(None),
            _ => Ok(Some(StreamEvent::Notice(value))),
        }
    }
}

/// Receives stream events synchronously on the reading thread.
/// Returning `Break` closes the stream.
pub trait StreamHandler {
    fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()>;
}

impl<F> StreamHandler for F
where
    F: FnMut(StreamEvent) -> ControlFlow<()>,
{
    fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_post() {
        let line = r#"{"id": 7, "text": "hi", "created_at": "Wed Oct 28 14:05:09 +0000 2015", "user": {"id": 1}}"#;
        match StreamEvent::parse(line).unwrap() {
            Some(StreamEvent::Post(post)) => assert_eq!(post.id, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_disconnect() {
        let line = r#"{"disconnect": {"code": 7, "stream_name": "x", "reason": "admin logout"}}"#;
        match StreamEvent::parse(line).unwrap() {
            Some(StreamEvent::Disconnect { code, reason }) => {
                assert_eq!(code, 7);
                assert_eq!(reason.as_deref(), Some("admin logout"));
            }
            other => panic!("unexpected {:?}", other),
        }

        match StreamEvent::parse(r#"{"disconnect": {}}"#).unwrap() {
            Some(StreamEvent::Disconnect { code, reason }) => {
                assert_eq!(code, 1);
                assert!(reason.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_notice_and_keepalive() {
        let notice = StreamEvent::parse(r#"{"limit": {"track": 12}}"#).unwrap();
        assert!(matches!(notice, Some(StreamEvent::Notice(v)) if v["limit"]["track"] == 12));
        assert!(StreamEvent::parse("").unwrap().is_none());
        assert!(StreamEvent::parse("  \r").unwrap().is_none());
        assert!(StreamEvent::parse("{}").unwrap().is_none());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(StreamEvent::parse("{not json").is_err());
        // has text but no usable post shape
        assert!(StreamEvent::parse(r#"{"text": "x"}"#).is_err());
    }

    #[test]
    fn test_closure_is_a_handler() {
        let mut seen = 0;
        let mut handler = |_event: StreamEvent| {
            seen += 1;
            ControlFlow::Continue(())
        };
        assert!(handler.on_event(StreamEvent::Notice(Value::Null)).is_continue());
        assert_eq!(seen, 1);
    }
}
