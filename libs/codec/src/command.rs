//! Command grammar for the Remote Sensor Protocol
//!
//! Parses and formats the textual payload carried inside a frame. The
//! grammar is deliberately small: `sensor-update` with one or more quoted
//! name / value pairs, `broadcast` with a quoted event name, and the relay
//! control command `group` with a quoted group name.
//!
//! Quoting rule: inside a quoted token a literal `"` is written as a doubled
//! `""`, so the name `d"d` travels as `"d""d"`.

use crate::error::ProtocolError;
use std::fmt;

/// Tagged value carried by a sensor update
///
/// The wire format does not distinguish value types beyond quoting, so the
/// codec pins down an explicit schema: bare tokens are numbers or booleans,
/// quoted tokens are text. Adapters choose the variant at emission time
/// instead of relying on ad-hoc stringification.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Bare numeric literal, e.g. `17` or `-3.5`
    Number(f64),
    /// Quoted string, e.g. `"on"`
    Text(String),
    /// Bare `true` / `false`
    Bool(bool),
}

impl Value {
    fn write_token(&self, out: &mut String) {
        match self {
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Text(s) => write_quoted(out, s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One named value inside a `sensor-update` payload
#[derive(Debug, Clone, PartialEq)]
pub struct SensorValue {
    /// Sensor name as announced to the host
    pub name: String,
    /// Current value
    pub value: Value,
}

impl SensorValue {
    /// Convenience constructor
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A decoded protocol command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `sensor-update "<name>" <value> ...` - one or more pairs
    SensorUpdate {
        /// Name/value pairs in payload order
        values: Vec<SensorValue>,
    },
    /// `broadcast "<event>"` - zero-payload event notification
    Broadcast {
        /// Event name
        event: String,
    },
    /// `group "<name>"` - relay membership declaration
    Group {
        /// Group name
        name: String,
    },
}

impl Command {
    /// Single-pair sensor update, the shape emitted by `send_value`
    pub fn sensor_update(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Command::SensorUpdate {
            values: vec![SensorValue::new(name, value)],
        }
    }

    /// Broadcast event
    pub fn broadcast(event: impl Into<String>) -> Self {
        Command::Broadcast {
            event: event.into(),
        }
    }

    /// Group join command
    pub fn group(name: impl Into<String>) -> Self {
        Command::Group { name: name.into() }
    }

    /// Render the textual payload (without the length prefix)
    pub fn to_payload(&self) -> String {
        let mut out = String::with_capacity(32);
        match self {
            Command::SensorUpdate { values } => {
                out.push_str("sensor-update");
                for sv in values {
                    out.push(' ');
                    write_quoted(&mut out, &sv.name);
                    out.push(' ');
                    sv.value.write_token(&mut out);
                }
            }
            Command::Broadcast { event } => {
                out.push_str("broadcast ");
                write_quoted(&mut out, event);
            }
            Command::Group { name } => {
                out.push_str("group ");
                write_quoted(&mut out, name);
            }
        }
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_payload())
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push_str("\"\"");
        } else {
            out.push(c);
        }
    }
    out.push('"');
}

/// Parse a frame payload into a [`Command`]
///
/// The caller has already stripped the length prefix. Unknown keywords and
/// grammar violations yield [`ProtocolError::Malformed`]; the stream itself
/// stays in sync because the frame boundary was established by the framing
/// layer.
pub fn parse_command(payload: &[u8]) -> Result<Command, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|e| ProtocolError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;

    let mut lexer = Lexer::new(text);
    let keyword = match lexer.next_token()? {
        Some(Token::Bare(word)) => word,
        Some(Token::Quoted(_)) => {
            return Err(ProtocolError::malformed("expected command keyword", text))
        }
        None => return Err(ProtocolError::malformed("empty payload", text)),
    };

    match keyword.as_str() {
        "sensor-update" => parse_sensor_update(&mut lexer, text),
        "broadcast" => match lexer.next_token()? {
            Some(Token::Quoted(event)) => Ok(Command::Broadcast { event }),
            _ => Err(ProtocolError::malformed(
                "broadcast requires a quoted event name",
                text,
            )),
        },
        "group" => match lexer.next_token()? {
            Some(Token::Quoted(name)) => Ok(Command::Group { name }),
            _ => Err(ProtocolError::malformed(
                "group requires a quoted group name",
                text,
            )),
        },
        other => Err(ProtocolError::malformed(
            format!("unknown command keyword {:?}", other),
            text,
        )),
    }
}

fn parse_sensor_update(lexer: &mut Lexer<'_>, text: &str) -> Result<Command, ProtocolError> {
    let mut values = Vec::new();
    loop {
        let name = match lexer.next_token()? {
            Some(Token::Quoted(name)) => name,
            Some(Token::Bare(_)) => {
                return Err(ProtocolError::malformed(
                    "sensor name must be quoted",
                    text,
                ))
            }
            None => break,
        };
        let value = match lexer.next_token()? {
            Some(Token::Quoted(s)) => Value::Text(s),
            Some(Token::Bare(word)) => parse_bare_value(&word, text)?,
            None => {
                return Err(ProtocolError::malformed(
                    format!("sensor {:?} has no value", name),
                    text,
                ))
            }
        };
        values.push(SensorValue { name, value });
    }

    if values.is_empty() {
        return Err(ProtocolError::malformed(
            "sensor-update requires at least one name/value pair",
            text,
        ));
    }
    Ok(Command::SensorUpdate { values })
}

fn parse_bare_value(word: &str, text: &str) -> Result<Value, ProtocolError> {
    if let Ok(n) = word.parse::<f64>() {
        return Ok(Value::Number(n));
    }
    match word {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(ProtocolError::malformed(
            format!("bare value {:?} is neither numeric nor boolean", word),
            text,
        )),
    }
}

enum Token {
    /// Unquoted run of non-space characters
    Bare(String),
    /// Quoted string with `""` folded back to `"`
    Quoted(String),
}

/// Character-level tokenizer for the payload grammar
///
/// Mirrors the protocol's two token shapes. Quote folding happens here so
/// the command parsers above only see clean strings.
struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        while matches!(self.chars.peek(), Some(' ')) {
            self.chars.next();
        }
        match self.chars.peek() {
            None => Ok(None),
            Some('"') => {
                self.chars.next();
                self.read_quoted().map(|s| Some(Token::Quoted(s)))
            }
            Some(_) => {
                let mut word = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c == ' ' {
                        break;
                    }
                    word.push(c);
                    self.chars.next();
                }
                Ok(Some(Token::Bare(word)))
            }
        }
    }

    fn read_quoted(&mut self) -> Result<String, ProtocolError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('"') => {
                    // Doubled quote is an escaped literal quote
                    if matches!(self.chars.peek(), Some('"')) {
                        self.chars.next();
                        out.push('"');
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => {
                    return Err(ProtocolError::malformed(
                        "unterminated quoted token",
                        &out,
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_update_roundtrip() {
        let cmd = Command::sensor_update("temperature", 21.5);
        assert_eq!(cmd.to_payload(), r#"sensor-update "temperature" 21.5"#);
        assert_eq!(parse_command(cmd.to_payload().as_bytes()).unwrap(), cmd);
    }

    #[test]
    fn test_broadcast_roundtrip() {
        let cmd = Command::broadcast("button-pressed");
        assert_eq!(cmd.to_payload(), r#"broadcast "button-pressed""#);
        assert_eq!(parse_command(cmd.to_payload().as_bytes()).unwrap(), cmd);
    }

    #[test]
    fn test_group_roundtrip() {
        let cmd = Command::group("lab-42");
        assert_eq!(parse_command(br#"group "lab-42""#).unwrap(), cmd);
    }

    #[test]
    fn test_multiple_pairs() {
        let cmd = parse_command(br#"sensor-update "a" 1 "c" "c-value""#).unwrap();
        assert_eq!(
            cmd,
            Command::SensorUpdate {
                values: vec![
                    SensorValue::new("a", 1.0),
                    SensorValue::new("c", "c-value"),
                ],
            }
        );
    }

    #[test]
    fn test_doubled_quote_escaping() {
        // 'd"d' as a name, 'd-val"ue' as a value
        let cmd = parse_command(br#"sensor-update "d""d" "d-val""ue""#).unwrap();
        assert_eq!(
            cmd,
            Command::SensorUpdate {
                values: vec![SensorValue::new("d\"d", "d-val\"ue")],
            }
        );
        // Quotes are re-doubled on the way out
        assert_eq!(cmd.to_payload(), r#"sensor-update "d""d" "d-val""ue""#);
    }

    #[test]
    fn test_bool_values() {
        let cmd = parse_command(br#"sensor-update "switch" true"#).unwrap();
        assert_eq!(
            cmd,
            Command::SensorUpdate {
                values: vec![SensorValue::new("switch", true)],
            }
        );
    }

    #[test]
    fn test_negative_and_fractional_numbers() {
        let cmd = parse_command(br#"sensor-update "depth" -3.25"#).unwrap();
        assert_eq!(
            cmd,
            Command::SensorUpdate {
                values: vec![SensorValue::new("depth", -3.25)],
            }
        );
    }

    #[test]
    fn test_rejects_unknown_keyword() {
        let err = parse_command(br#"poke "a" 1"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_bare_sensor_name() {
        let err = parse_command(br#"sensor-update a 1"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_rejects_missing_value() {
        let err = parse_command(br#"sensor-update "a""#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_malformed_preview_respects_char_boundaries() {
        // A multibyte char straddling the preview cutoff must not panic
        // the parser; the command is rejected and the link stays usable.
        let payload = format!("{}é-and-more-garbage", "x".repeat(79));
        let err = parse_command(payload.as_bytes()).unwrap_err();
        match err {
            ProtocolError::Malformed { payload, .. } => {
                assert!(payload.ends_with("..."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let err = parse_command(&[0x73, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8 { .. }));
    }
}
