//! GDB/MI output record parser
//!
//! Grammar (GDB manual, "GDB/MI Output Syntax"):
//!
//! ```text
//! result-record  → [token] "^" result-class ("," result)*
//! async-record   → [token] ("*" | "+" | "=") async-class ("," result)*
//! stream-record  → ("~" | "@" | "&") c-string
//! result         → variable "=" value
//! value          → c-string | tuple | list
//! tuple          → "{}" | "{" result ("," result)* "}"
//! list           → "[]" | "[" value ("," value)* "]" | "[" result ("," result)* "]"
//! ```
//!
//! Anything that does not start like an MI record is returned as
//! [`MiRecord::Raw`] rather than rejected.

use std::fmt;

/// A parsed MI value.
#[derive(Debug, Clone, PartialEq)]
pub enum MiValue {
    Const(String),
    Tuple(Results),
    /// List of bare values
    List(Vec<MiValue>),
    /// List of `name=value` results (`children=[child={..},child={..}]`)
    ResultList(Results),
}

impl MiValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a field of a tuple (or of a result list).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(results) | MiValue::ResultList(results) => results.get(key),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MiValue::as_str)
    }

    /// Elements of a list, ignoring result names. Empty for non-lists.
    #[must_use]
    pub fn items(&self) -> Vec<&MiValue> {
        match self {
            MiValue::List(values) => values.iter().collect(),
            MiValue::ResultList(results) => results.iter().map(|(_, v)| v).collect(),
            // GDB prints `[]` and `{}` interchangeably for empty collections
            MiValue::Tuple(results) if results.is_empty() => Vec::new(),
            MiValue::Tuple(_) | MiValue::Const(_) => Vec::new(),
        }
    }
}

/// Ordered `name=value` pairs of a record or tuple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results(Vec<(String, MiValue)>);

impl Results {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MiValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MiValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` - execution state changes (`running`, `stopped`)
    Exec,
    /// `+` - progress of slow operations
    Status,
    /// `=` - supplementary notifications (`thread-group-started`, ...)
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MiRecord {
    Result { token: Option<u64>, class: ResultClass, results: Results },
    Async { token: Option<u64>, kind: AsyncKind, class: String, results: Results },
    Stream { kind: StreamKind, text: String },
    /// The `(gdb)` prompt that terminates each output batch
    Prompt,
    /// A line that is not MI output
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiParseError {
    pub line: String,
    pub position: usize,
    pub reason: &'static str,
}

impl fmt::Display for MiParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at column {} in {:?}", self.reason, self.position, self.line)
    }
}

impl std::error::Error for MiParseError {}

/// Parse one line of GDB/MI output.
///
/// # Errors
/// Returns an error when a line starts like an MI record but its body is malformed
pub fn parse_line(line: &str) -> Result<MiRecord, MiParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return Ok(MiRecord::Prompt);
    }

    let mut cursor = Cursor { line, bytes: line.as_bytes(), pos: 0 };
    let token = cursor.token();

    match cursor.peek() {
        Some(b'^') => {
            cursor.pos += 1;
            let class = match cursor.word() {
                "done" => ResultClass::Done,
                "running" => ResultClass::Running,
                "connected" => ResultClass::Connected,
                "error" => ResultClass::Error,
                "exit" => ResultClass::Exit,
                _ => return Err(cursor.error("unknown result class")),
            };
            let results = cursor.trailing_results()?;
            Ok(MiRecord::Result { token, class, results })
        }
        Some(sigil @ (b'*' | b'+' | b'=')) => {
            cursor.pos += 1;
            let kind = match sigil {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let class = cursor.word().to_string();
            let results = cursor.trailing_results()?;
            Ok(MiRecord::Async { token, kind, class, results })
        }
        Some(sigil @ (b'~' | b'@' | b'&')) if token.is_none() => {
            cursor.pos += 1;
            let kind = match sigil {
                b'~' => StreamKind::Console,
                b'@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let text = cursor.c_string()?;
            Ok(MiRecord::Stream { kind, text })
        }
        _ => Ok(MiRecord::Raw(line.to_string())),
    }
}

struct Cursor<'a> {
    line: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, reason: &'static str) -> MiParseError {
        MiParseError { line: self.line.to_string(), position: self.pos, reason }
    }

    fn expect(&mut self, byte: u8, reason: &'static str) -> Result<(), MiParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn token(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.line[start..self.pos].parse().ok()
    }

    /// Record class or result variable: everything up to `,` `=` or end.
    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b',' && b != b'=') {
            self.pos += 1;
        }
        &self.line[start..self.pos]
    }

    fn trailing_results(&mut self) -> Result<Results, MiParseError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        if self.peek().is_some() {
            return Err(self.error("trailing characters after record"));
        }
        Ok(Results(results))
    }

    fn result(&mut self) -> Result<(String, MiValue), MiParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b'=') {
            if matches!(self.peek(), Some(b',' | b'{' | b'}' | b'[' | b']' | b'"')) {
                return Err(self.error("expected result variable"));
            }
            self.pos += 1;
        }
        let name = self.line[start..self.pos].to_string();
        self.expect(b'=', "expected '=' after variable")?;
        let value = self.value()?;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"') => self.c_string().map(MiValue::Const),
            Some(b'{') => self.tuple(),
            Some(b'[') => self.list(),
            _ => Err(self.error("expected value")),
        }
    }

    fn tuple(&mut self) -> Result<MiValue, MiParseError> {
        self.expect(b'{', "expected '{'")?;
        let mut results = Vec::new();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(MiValue::Tuple(Results(results)));
        }
        loop {
            results.push(self.result()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(MiValue::Tuple(Results(results)));
                }
                _ => return Err(self.error("unterminated tuple")),
            }
        }
    }

    fn list(&mut self) -> Result<MiValue, MiParseError> {
        self.expect(b'[', "expected '['")?;
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(MiValue::List(Vec::new()));
        }

        let of_values = matches!(self.peek(), Some(b'"' | b'{' | b'['));
        let mut values = Vec::new();
        let mut results = Vec::new();
        loop {
            if of_values {
                values.push(self.value()?);
            } else {
                results.push(self.result()?);
            }
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(if of_values {
                        MiValue::List(values)
                    } else {
                        MiValue::ResultList(Results(results))
                    });
                }
                _ => return Err(self.error("unterminated list")),
            }
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        self.expect(b'"', "expected '\"'")?;
        let mut out = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match byte {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("dangling escape"));
                    };
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            // Up to three octal digits
                            let mut code = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(u8::try_from(code & 0xff).unwrap_or(b'?'));
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Quote a string as an MI c-string argument.
#[must_use]
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
