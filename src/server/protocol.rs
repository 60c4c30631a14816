//! Line protocol spoken by the TCP server.
//!
//! Requests are single CRLF-terminated lines:
//!
//! ```text
//! PUT <key> <value>
//! GET <key>
//! DELETE <key>
//! PING
//! STATUS
//! QUIT
//! ```
//!
//! Responses:
//!
//! ```text
//! +OK [detail]
//! +VALUE <value>
//! +PONG
//! -ERR <message>
//! ```
//!
//! Command words are case-insensitive; keys and values are
//! whitespace-delimited tokens (values may contain spaces — `PUT` treats
//! everything after the key as the value).

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Ping,
    Status,
    Quit,
}

/// A server response, serialized as one CRLF-terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Value(String),
    Pong,
    Err(String),
}

impl Response {
    /// Wire form including the trailing CRLF.
    pub fn serialize(&self) -> String {
        match self {
            Response::Ok(None) => "+OK\r\n".to_string(),
            Response::Ok(Some(detail)) => format!("+OK {}\r\n", detail),
            Response::Value(value) => format!("+VALUE {}\r\n", value),
            Response::Pong => "+PONG\r\n".to_string(),
            Response::Err(msg) => format!("-ERR {}\r\n", msg),
        }
    }
}

/// Parses one request line (without its line terminator).
pub fn parse(line: &str) -> Result<Request, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty command".to_string());
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_ascii_uppercase();

    match command.as_str() {
        "PUT" => {
            let key = parts.next().ok_or("PUT requires a key and a value")?;
            let value = parts.next().ok_or("PUT requires a value")?;
            Ok(Request::Put {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "GET" => {
            let key = parts.next().ok_or("GET requires a key")?;
            Ok(Request::Get {
                key: key.to_string(),
            })
        }
        "DELETE" => {
            let key = parts.next().ok_or("DELETE requires a key")?;
            Ok(Request::Delete {
                key: key.to_string(),
            })
        }
        "PING" => Ok(Request::Ping),
        "STATUS" => Ok(Request::Status),
        "QUIT" => Ok(Request::Quit),
        other => Err(format!("unknown command: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, Request, Response};

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            parse("PUT k v").unwrap(),
            Request::Put {
                key: "k".into(),
                value: "v".into()
            }
        );
        assert_eq!(
            parse("PUT k a value with spaces").unwrap(),
            Request::Put {
                key: "k".into(),
                value: "a value with spaces".into()
            }
        );
        assert_eq!(parse("GET k").unwrap(), Request::Get { key: "k".into() });
        assert_eq!(parse("delete k").unwrap(), Request::Delete { key: "k".into() });
        assert_eq!(parse("ping").unwrap(), Request::Ping);
        assert_eq!(parse("QUIT").unwrap(), Request::Quit);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse("").is_err());
        assert!(parse("PUT k").is_err());
        assert!(parse("GET").is_err());
        assert!(parse("NONSENSE x").is_err());
    }

    #[test]
    fn test_serialize_responses() {
        assert_eq!(Response::Ok(None).serialize(), "+OK\r\n");
        assert_eq!(Response::Ok(Some("deleted".into())).serialize(), "+OK deleted\r\n");
        assert_eq!(Response::Value("v".into()).serialize(), "+VALUE v\r\n");
        assert_eq!(Response::Pong.serialize(), "+PONG\r\n");
        assert_eq!(Response::Err("bad".into()).serialize(), "-ERR bad\r\n");
    }
}
