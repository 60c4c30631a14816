//! REPL command parser (collaborator).
//!
//! Parses the interactive shell's textual commands and dispatches them to
//! the engine:
//!
//! ```text
//! put("key","value")
//! get("key")
//! delete("key")
//! ls
//! flush
//! clear
//! ```
//!
//! The parser is line-oriented and deliberately small; quoted arguments
//! may contain any character except an unescaped double quote.

use thiserror::Error;

use crate::engine::Engine;

/// A parsed REPL command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Ls,
    Flush,
    Clear,
}

/// Errors produced while parsing a command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed arguments: expected {0}")]
    BadArguments(&'static str),
}

/// Parses one input line.
pub fn parse(input: &str) -> Result<Command, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    match input {
        "ls" => return Ok(Command::Ls),
        "flush" => return Ok(Command::Flush),
        "clear" => return Ok(Command::Clear),
        _ => {}
    }

    if let Some(args) = call_args(input, "put") {
        let (key, rest) = quoted(args).ok_or(ParseError::BadArguments("put(\"k\",\"v\")"))?;
        let rest = rest
            .strip_prefix(',')
            .map(str::trim_start)
            .ok_or(ParseError::BadArguments("put(\"k\",\"v\")"))?;
        let (value, rest) = quoted(rest).ok_or(ParseError::BadArguments("put(\"k\",\"v\")"))?;
        if !rest.is_empty() {
            return Err(ParseError::BadArguments("put(\"k\",\"v\")"));
        }
        return Ok(Command::Put { key, value });
    }

    if let Some(args) = call_args(input, "get") {
        let (key, rest) = quoted(args).ok_or(ParseError::BadArguments("get(\"k\")"))?;
        if !rest.is_empty() {
            return Err(ParseError::BadArguments("get(\"k\")"));
        }
        return Ok(Command::Get { key });
    }

    if let Some(args) = call_args(input, "delete") {
        let (key, rest) = quoted(args).ok_or(ParseError::BadArguments("delete(\"k\")"))?;
        if !rest.is_empty() {
            return Err(ParseError::BadArguments("delete(\"k\")"));
        }
        return Ok(Command::Delete { key });
    }

    let name: String = input.chars().take_while(|c| c.is_alphanumeric()).collect();
    Err(ParseError::UnknownCommand(if name.is_empty() {
        input.to_string()
    } else {
        name
    }))
}

/// `name( inner )` → `inner` (trimmed), or `None`.
fn call_args<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(name)?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let rest = rest.strip_suffix(')')?;
    Some(rest.trim())
}

/// Leading `"..."` → (contents, remainder after the closing quote).
fn quoted(input: &str) -> Option<(String, &str)> {
    let rest = input.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some((rest[..end].to_string(), rest[end + 1..].trim_start()))
}

/// Executes a parsed command, returning the line(s) to print.
pub fn execute(engine: &Engine, command: Command) -> String {
    match command {
        Command::Put { key, value } => {
            if engine.put(key.into_bytes(), value.into_bytes()) {
                "OK".to_string()
            } else {
                "ERR write failed".to_string()
            }
        }
        Command::Get { key } => match engine.get(key.as_bytes()) {
            Ok(Some(entry)) => String::from_utf8_lossy(&entry.value).into_owned(),
            Ok(None) => "NOT FOUND".to_string(),
            Err(e) => format!("ERR {}", e),
        },
        Command::Delete { key } => {
            if engine.delete(key.into_bytes()) {
                "OK".to_string()
            } else {
                "NOT FOUND".to_string()
            }
        }
        Command::Ls => engine.ls(),
        Command::Flush => match engine.flush() {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERR {}", e),
        },
        Command::Clear => match engine.clear_data() {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERR {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, Command, ParseError};

    #[test]
    fn test_parse_put() {
        assert_eq!(
            parse("put(\"k\",\"v\")").unwrap(),
            Command::Put {
                key: "k".into(),
                value: "v".into()
            }
        );
        // Whitespace tolerance.
        assert_eq!(
            parse("  put( \"a key\", \"a value\" )  ").unwrap(),
            Command::Put {
                key: "a key".into(),
                value: "a value".into()
            }
        );
    }

    #[test]
    fn test_parse_get_and_delete() {
        assert_eq!(parse("get(\"k\")").unwrap(), Command::Get { key: "k".into() });
        assert_eq!(
            parse("delete(\"k\")").unwrap(),
            Command::Delete { key: "k".into() }
        );
    }

    #[test]
    fn test_parse_bare_words() {
        assert_eq!(parse("ls").unwrap(), Command::Ls);
        assert_eq!(parse("flush").unwrap(), Command::Flush);
        assert_eq!(parse("clear").unwrap(), Command::Clear);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert!(matches!(parse("putt(\"k\",\"v\")"), Err(ParseError::UnknownCommand(_))));
        assert!(matches!(parse("put(k,v)"), Err(ParseError::BadArguments(_))));
        assert!(matches!(parse("get(\"k\"), extra"), Err(ParseError::UnknownCommand(_))));
        assert!(matches!(parse("put(\"k\")"), Err(ParseError::BadArguments(_))));
    }

    #[test]
    fn test_parse_empty_strings() {
        assert_eq!(
            parse("put(\"\",\"\")").unwrap(),
            Command::Put {
                key: String::new(),
                value: String::new()
            }
        );
    }
}
