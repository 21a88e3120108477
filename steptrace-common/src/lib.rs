//! # Shared Trace Model (Tracer ↔ Timeline Consumers)
//!
//! Defines the document produced by the `tracer` binary and read back by
//! anything that renders an execution timeline. The producer builds these
//! values from live debugger reads; consumers parse them with
//! [`TraceDocument::from_reader`].
//!
//! ## Document Shape
//!
//! ```text
//! { "steps": [Step, ...], "totalSteps": N }
//! ```
//!
//! Every [`Step`] carries a snapshot of the top-of-stack frame
//! ([`FrameInfo`]) whose locals are [`VariableSnapshot`]s. Snapshots are
//! immutable records: the next step supersedes them, nothing updates them.
//!
//! ## Key Types
//!
//! - [`Step`] - One entry of the trace, tagged with a [`StepKind`]
//! - [`VariableSnapshot`] - Name, declared type, value, address, structure
//! - [`SnapshotValue`] - Tagged union for the dynamically typed value
//! - [`Locals`] - Insertion-ordered name → snapshot mapping

use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

// ============================================================================
// Constants
// ============================================================================

/// Hard cap on the number of array elements captured per snapshot.
///
/// Arrays with more logical elements are truncated silently.
pub const MAX_ARRAY_ELEMENTS: usize = 100;

/// Placeholder reported for a variable whose address could not be resolved.
pub const NULL_ADDRESS: &str = "0x0";

// ============================================================================
// Step Kinds
// ============================================================================

/// Semantic kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A new aggregate variable appeared, or execution entered a constructor
    ObjectCreation,
    /// Execution entered a destructor
    ObjectDestruction,
    /// A new scalar variable appeared
    VariableDeclaration,
    /// A new pointer variable appeared
    PointerDeclaration,
    /// A new array variable appeared
    ArrayDeclaration,
    /// An existing variable changed value
    Assignment,
    /// Execution moved without an attributable state change
    LineExecution,
    /// Synthetic terminal step: run completed, hit the step limit, or got stuck
    ProgramEnd,
    /// Synthetic terminal step: wall-clock budget exceeded
    Timeout,
}

impl StepKind {
    /// Returns true for the synthetic kinds that close a trace.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, StepKind::ProgramEnd | StepKind::Timeout)
    }

    /// Wire name of this kind (`"object_creation"`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::ObjectCreation => "object_creation",
            StepKind::ObjectDestruction => "object_destruction",
            StepKind::VariableDeclaration => "variable_declaration",
            StepKind::PointerDeclaration => "pointer_declaration",
            StepKind::ArrayDeclaration => "array_declaration",
            StepKind::Assignment => "assignment",
            StepKind::LineExecution => "line_execution",
            StepKind::ProgramEnd => "program_end",
            StepKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Variable Snapshots
// ============================================================================

/// Structural classification of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralKind {
    /// Plain value (numbers, booleans, strings, enums, unclassified members)
    #[default]
    Scalar,
    /// Pointer; the address-sized value is never dereferenced
    Pointer,
    /// Array; `value` holds at most [`MAX_ARRAY_ELEMENTS`] element snapshots
    Array,
    /// Struct or class; `value` holds one level of member snapshots
    Class,
}

/// Where a variable binding comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Local variable of the frame
    #[default]
    Local,
    /// Function argument
    Argument,
}

/// Dynamically typed value of a snapshot.
///
/// Scalars are coerced from the debugger's textual rendering on a best-effort
/// basis; anything that fails to coerce stays [`SnapshotValue::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// The backend produced no textual value
    Null,
    /// Members of a struct/class, one level deep
    Aggregate(Vec<VariableSnapshot>),
    /// Leading elements of an array
    Array(Vec<VariableSnapshot>),
}

impl SnapshotValue {
    /// Child snapshots for aggregate and array values.
    #[must_use]
    pub fn children(&self) -> Option<&[VariableSnapshot]> {
        match self {
            SnapshotValue::Aggregate(children) | SnapshotValue::Array(children) => Some(children),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match value {
            serde_json::Value::Null => SnapshotValue::Null,
            serde_json::Value::Bool(b) => SnapshotValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SnapshotValue::Int(i),
                None => SnapshotValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => SnapshotValue::Text(s),
            serde_json::Value::Array(items) => SnapshotValue::Aggregate(
                items.into_iter().map(serde_json::from_value).collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(_) => {
                return Err(de::Error::custom("snapshot value cannot be an object"))
            }
        })
    }
}

/// Textual form used to detect value changes between steps.
///
/// Addresses are deliberately left out: only values participate.
impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotValue::Int(i) => write!(f, "{i}"),
            SnapshotValue::Float(x) => write!(f, "{x:?}"),
            SnapshotValue::Bool(b) => write!(f, "{b}"),
            SnapshotValue::Text(s) => f.write_str(s),
            SnapshotValue::Null => f.write_str("null"),
            SnapshotValue::Aggregate(children) | SnapshotValue::Array(children) => {
                f.write_str("[")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", child.name, child.value)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl Serialize for SnapshotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SnapshotValue::Int(i) => serializer.serialize_i64(*i),
            SnapshotValue::Float(x) => serializer.serialize_f64(*x),
            SnapshotValue::Bool(b) => serializer.serialize_bool(*b),
            SnapshotValue::Text(s) => serializer.serialize_str(s),
            SnapshotValue::Null => serializer.serialize_none(),
            SnapshotValue::Aggregate(children) | SnapshotValue::Array(children) => {
                let mut seq = serializer.serialize_seq(Some(children.len()))?;
                for child in children {
                    seq.serialize_element(child)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SnapshotValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        SnapshotValue::from_json(raw).map_err(de::Error::custom)
    }
}

/// Snapshot of one variable at one recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "VariableSnapshotRepr")]
pub struct VariableSnapshot {
    pub name: String,
    /// Declared type name as reported by the debugger
    #[serde(rename = "type")]
    pub declared_type: String,
    pub value: SnapshotValue,
    /// Load address; `None` serializes as [`NULL_ADDRESS`]
    #[serde(with = "hex_address")]
    pub address: Option<u64>,
    #[serde(rename = "primitive")]
    pub kind: StructuralKind,
    /// Declared type of a `class` snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub scope: VariableScope,
    pub is_alive: bool,
}

impl VariableSnapshot {
    /// Create a live local scalar snapshot.
    pub fn scalar(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        value: SnapshotValue,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            value,
            address: None,
            kind: StructuralKind::Scalar,
            class_name: None,
            scope: VariableScope::Local,
            is_alive: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariableSnapshotRepr {
    name: String,
    #[serde(rename = "type", default)]
    declared_type: String,
    #[serde(default = "null_value")]
    value: SnapshotValue,
    #[serde(with = "hex_address", default)]
    address: Option<u64>,
    #[serde(rename = "primitive", default)]
    kind: StructuralKind,
    #[serde(default)]
    class_name: Option<String>,
    #[serde(default)]
    scope: VariableScope,
    #[serde(default = "alive")]
    is_alive: bool,
}

fn null_value() -> SnapshotValue {
    SnapshotValue::Null
}

fn alive() -> bool {
    true
}

impl From<VariableSnapshotRepr> for VariableSnapshot {
    fn from(repr: VariableSnapshotRepr) -> Self {
        // Lists parse as aggregates; the structural kind disambiguates
        let value = match (repr.kind, repr.value) {
            (StructuralKind::Array, SnapshotValue::Aggregate(items)) => SnapshotValue::Array(items),
            (_, value) => value,
        };
        Self {
            name: repr.name,
            declared_type: repr.declared_type,
            value,
            address: repr.address,
            kind: repr.kind,
            class_name: repr.class_name,
            scope: repr.scope,
            is_alive: repr.is_alive,
        }
    }
}

/// Hex string encoding for optional addresses (`"0x7ffd..."`, `"0x0"`).
pub mod hex_address {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::NULL_ADDRESS;

    #[allow(clippy::ref_option)] // signature required by serde's `with`
    pub fn serialize<S: Serializer>(addr: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(a) => serializer.serialize_str(&format!("0x{a:x}")),
            None => serializer.serialize_str(NULL_ADDRESS),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        let Some(text) = text else {
            return Ok(None);
        };
        let digits = text.trim_start_matches("0x").trim_start_matches("0X");
        let addr = u64::from_str_radix(digits, 16)
            .map_err(|e| de::Error::custom(format!("invalid address {text:?}: {e}")))?;
        Ok((addr != 0).then_some(addr))
    }
}

// ============================================================================
// Locals
// ============================================================================

/// Insertion-ordered mapping from variable name to snapshot.
///
/// Order is the backend's enumeration order and drives classification
/// tie-breaks, so it survives serialization in both directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals(Vec<VariableSnapshot>);

impl Locals {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a snapshot. A repeated name replaces the earlier value but
    /// keeps its original position.
    pub fn insert(&mut self, snapshot: VariableSnapshot) {
        if let Some(slot) = self.0.iter_mut().find(|v| v.name == snapshot.name) {
            *slot = snapshot;
        } else {
            self.0.push(snapshot);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariableSnapshot> {
        self.0.iter().find(|v| v.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VariableSnapshot> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<VariableSnapshot> for Locals {
    fn from_iter<I: IntoIterator<Item = VariableSnapshot>>(iter: I) -> Self {
        let mut locals = Locals::new();
        for snapshot in iter {
            locals.insert(snapshot);
        }
        locals
    }
}

impl<'a> IntoIterator for &'a Locals {
    type Item = &'a VariableSnapshot;
    type IntoIter = std::slice::Iter<'a, VariableSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for Locals {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for snapshot in &self.0 {
            map.serialize_entry(&snapshot.name, snapshot)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Locals {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LocalsVisitor;

        impl<'de> Visitor<'de> for LocalsVisitor {
            type Value = Locals;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable name to snapshot")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Locals, A::Error> {
                let mut locals = Locals::new();
                while let Some((name, mut snapshot)) =
                    access.next_entry::<String, VariableSnapshot>()?
                {
                    snapshot.name = name;
                    locals.insert(snapshot);
                }
                Ok(locals)
            }
        }

        deserializer.deserialize_map(LocalsVisitor)
    }
}

// ============================================================================
// Frames and Steps
// ============================================================================

/// What the top-of-stack frame looked like at one recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub function: String,
    /// Source line, 0 when the frame has no line entry
    pub line: u32,
    /// Source file basename, `"unknown"` when the frame has no line entry
    pub file: String,
    pub locals: Locals,
}

/// Program state attached to a step.
///
/// Only `callStack` is populated; the other sections are kept empty for
/// consumers that expect the full shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    #[serde(default)]
    pub call_stack: Vec<FrameInfo>,
    #[serde(default)]
    pub globals: Locals,
    #[serde(default)]
    pub stack: Vec<VariableSnapshot>,
    #[serde(default)]
    pub heap: Locals,
}

impl StepState {
    /// State holding a single frame.
    #[must_use]
    pub fn with_frame(frame: FrameInfo) -> Self {
        Self { call_stack: vec![frame], ..Self::default() }
    }
}

/// Variable data copied onto the step that a variable drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableBinding {
    pub name: String,
    pub data_type: String,
    pub primitive: StructuralKind,
    pub value: SnapshotValue,
    #[serde(with = "hex_address")]
    pub address: Option<u64>,
    pub scope: VariableScope,
}

impl From<&VariableSnapshot> for VariableBinding {
    fn from(snapshot: &VariableSnapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            data_type: snapshot.declared_type.clone(),
            primitive: snapshot.kind,
            value: snapshot.value.clone(),
            address: snapshot.address,
            scope: snapshot.scope,
        }
    }
}

/// Kind-specific fields of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    /// Name of the variable that drove the classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(flatten)]
    pub binding: Option<VariableBinding>,
}

/// One entry of the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Position in the trace, assigned at append time
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub explanation: String,
    #[serde(flatten)]
    pub detail: StepDetail,
    pub state: StepState,
}

// ============================================================================
// Document
// ============================================================================

/// The complete output document of one tracing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDocument {
    pub steps: Vec<Step>,
    pub total_steps: usize,
}

impl TraceDocument {
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        let total_steps = steps.len();
        Self { steps, total_steps }
    }

    /// Write the document as one JSON value.
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying write fails
    pub fn to_writer<W: Write>(&self, writer: W, pretty: bool) -> serde_json::Result<()> {
        if pretty {
            serde_json::to_writer_pretty(writer, self)
        } else {
            serde_json::to_writer(writer, self)
        }
    }

    /// Parse a document previously written by [`TraceDocument::to_writer`].
    ///
    /// # Errors
    /// Returns an error if the input is not a valid trace document
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }

    /// Parse a trace document from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::from)
    }

    /// The closing step, if any.
    #[must_use]
    pub fn terminal_step(&self) -> Option<&Step> {
        self.steps.last().filter(|s| s.kind.is_terminal())
    }
}
