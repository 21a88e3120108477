//! # Frame Snapshot Extraction
//!
//! Turns the live variables of the top frame into immutable
//! [`VariableSnapshot`]s. Structural classification, first match wins:
//!
//! ```text
//!   backend type class is aggregate   → class    (one level of members)
//!   type name contains '*'            → pointer  (never dereferenced)
//!   type name contains '[' or array   → array    (≤ MAX_ARRAY_ELEMENTS)
//!   otherwise                         → scalar
//! ```
//!
//! Members and elements are recorded as scalars with their own coerced
//! value; members carry an address, array elements do not.

pub mod coerce;

use log::warn;

use steptrace_common::{FrameInfo, Locals, SnapshotValue, StructuralKind, VariableSnapshot, MAX_ARRAY_ELEMENTS};

pub use self::coerce::coerce_value;
use crate::backend::{DebugBackend, FrameLocation, TypeClass, VariableInfo};
use crate::domain::{BackendError, ThreadId};

/// File name reported for frames without a line entry.
pub const UNKNOWN_FILE: &str = "unknown";

/// Structural kind implied by a variable's description.
#[must_use]
pub fn structural_kind(info: &VariableInfo) -> StructuralKind {
    if info.type_class == TypeClass::Aggregate {
        StructuralKind::Class
    } else if info.type_name.contains('*') {
        StructuralKind::Pointer
    } else if info.type_name.contains('[') || info.type_class == TypeClass::Array {
        StructuralKind::Array
    } else {
        StructuralKind::Scalar
    }
}

/// Snapshot the top frame of `thread`.
///
/// A variable the backend refuses to describe is skipped; losing the
/// debugger itself is an error.
///
/// # Errors
/// Returns an error if the frame's variables cannot be enumerated
pub fn snapshot_frame<B: DebugBackend>(
    backend: &mut B,
    thread: ThreadId,
    location: &FrameLocation,
) -> Result<FrameInfo, BackendError> {
    let variables = backend.frame_variables(thread)?;

    let mut locals = Locals::new();
    for var in &variables {
        match snapshot_variable(backend, var) {
            Ok(snapshot) => locals.insert(snapshot),
            Err(BackendError::CommandFailed { command, message }) => {
                warn!("Skipping unreadable variable in {} ({command}: {message})", location.function);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(FrameInfo {
        function: location.function.clone(),
        line: location.line.unwrap_or(0),
        file: location.file.as_ref().map_or_else(|| UNKNOWN_FILE.to_string(), |f| f.name.clone()),
        locals,
    })
}

/// Snapshot one top-level variable.
///
/// # Errors
/// Returns an error if the backend cannot describe the variable or its children
pub fn snapshot_variable<B: DebugBackend>(
    backend: &mut B,
    var: &B::Variable,
) -> Result<VariableSnapshot, BackendError> {
    let info = backend.describe(var)?;
    let address = backend.address_of(var)?;
    let kind = structural_kind(&info);

    let (value, class_name) = match kind {
        StructuralKind::Class => {
            let members = backend.children(var, usize::MAX)?;
            let mut values = Vec::with_capacity(members.len());
            for member in &members {
                values.push(nested_snapshot(backend, member, true)?);
            }
            (SnapshotValue::Aggregate(values), Some(info.type_name.clone()))
        }
        StructuralKind::Array => {
            let elements = backend.children(var, MAX_ARRAY_ELEMENTS)?;
            let mut values = Vec::with_capacity(elements.len().min(MAX_ARRAY_ELEMENTS));
            for (index, element) in elements.iter().take(MAX_ARRAY_ELEMENTS).enumerate() {
                let mut snapshot = nested_snapshot(backend, element, false)?;
                snapshot.name = format!("[{index}]");
                values.push(snapshot);
            }
            (SnapshotValue::Array(values), None)
        }
        StructuralKind::Pointer | StructuralKind::Scalar => {
            (coerce_value(&info.type_name, info.value.as_deref()), None)
        }
    };

    Ok(VariableSnapshot {
        name: info.name,
        declared_type: info.type_name,
        value,
        address,
        kind,
        class_name,
        scope: info.scope,
        is_alive: true,
    })
}

/// Member or element snapshot: one level only, always scalar.
fn nested_snapshot<B: DebugBackend>(
    backend: &mut B,
    var: &B::Variable,
    with_address: bool,
) -> Result<VariableSnapshot, BackendError> {
    let info = backend.describe(var)?;
    let address = if with_address { backend.address_of(var)? } else { None };
    Ok(VariableSnapshot {
        value: coerce_value(&info.type_name, info.value.as_deref()),
        address,
        scope: info.scope,
        ..VariableSnapshot::scalar(info.name, info.type_name, SnapshotValue::Null)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LaunchOptions;
    use crate::testing::{ReplayBackend, ReplayScript, ReplayStop, ReplayVariable};
    use steptrace_common::VariableScope;

    fn info(type_name: &str, type_class: TypeClass) -> VariableInfo {
        VariableInfo {
            name: "v".to_string(),
            type_name: type_name.to_string(),
            value: None,
            type_class,
            child_count: 0,
            scope: VariableScope::Local,
        }
    }

    fn snapshot_of(variables: Vec<ReplayVariable>) -> FrameInfo {
        let stop = ReplayStop::at("main", "/src/main.cpp", 5).with_variables(variables);
        let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![stop]));
        backend.launch(&LaunchOptions { stop_at_entry: true }).unwrap();
        let thread = backend.selected_thread().unwrap().unwrap();
        let location = backend.selected_frame(thread).unwrap().unwrap();
        snapshot_frame(&mut backend, thread, &location).unwrap()
    }

    #[test]
    fn test_structural_kind_order() {
        assert_eq!(structural_kind(&info("Point", TypeClass::Aggregate)), StructuralKind::Class);
        assert_eq!(structural_kind(&info("Point *", TypeClass::Scalar)), StructuralKind::Pointer);
        assert_eq!(structural_kind(&info("int [4]", TypeClass::Array)), StructuralKind::Array);
        assert_eq!(structural_kind(&info("char *[2]", TypeClass::Array)), StructuralKind::Pointer);
        assert_eq!(structural_kind(&info("std::vector<int>", TypeClass::Array)), StructuralKind::Array);
        assert_eq!(structural_kind(&info("int", TypeClass::Scalar)), StructuralKind::Scalar);
    }

    #[test]
    fn test_frame_metadata() {
        let frame = snapshot_of(vec![ReplayVariable::scalar("x", "int", "5")]);
        assert_eq!(frame.function, "main");
        assert_eq!(frame.line, 5);
        assert_eq!(frame.file, "main.cpp");
        assert_eq!(frame.locals.get("x").unwrap().value, SnapshotValue::Int(5));
    }

    #[test]
    fn test_frame_without_line_entry() {
        let location = FrameLocation { function: "_start".to_string(), file: None, line: None };
        let stop = ReplayStop::without_line_info("_start");
        let mut backend = ReplayBackend::new(ReplayScript::from_stops(vec![stop]));
        backend.launch(&LaunchOptions { stop_at_entry: true }).unwrap();
        let frame = snapshot_frame(&mut backend, crate::domain::ThreadId(1), &location).unwrap();
        assert_eq!(frame.line, 0);
        assert_eq!(frame.file, UNKNOWN_FILE);
        assert!(frame.locals.is_empty());
    }

    #[test]
    fn test_class_members_one_level() {
        let point = ReplayVariable::aggregate(
            "p",
            "Point",
            vec![
                ReplayVariable::scalar("x", "int", "1").with_address(0x1000),
                ReplayVariable::aggregate("inner", "Inner", vec![ReplayVariable::scalar("z", "int", "9")]),
            ],
        )
        .with_address(0x1000);

        let frame = snapshot_of(vec![point]);
        let p = frame.locals.get("p").unwrap();
        assert_eq!(p.kind, StructuralKind::Class);
        assert_eq!(p.class_name.as_deref(), Some("Point"));
        assert_eq!(p.address, Some(0x1000));

        let members = p.value.children().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].value, SnapshotValue::Int(1));
        assert_eq!(members[0].address, Some(0x1000));
        // Nested aggregates are not expanded further
        assert_eq!(members[1].kind, StructuralKind::Scalar);
        assert_eq!(members[1].value, SnapshotValue::Text("{...}".into()));
    }

    #[test]
    fn test_array_truncated_without_addresses() {
        let elements = (0..150)
            .map(|i| ReplayVariable::scalar("elem", "int", &i.to_string()).with_address(0x2000 + i))
            .collect();
        let frame = snapshot_of(vec![ReplayVariable::array("big", "int [150]", elements)]);

        let big = frame.locals.get("big").unwrap();
        assert_eq!(big.kind, StructuralKind::Array);
        let items = big.value.children().unwrap();
        assert_eq!(items.len(), MAX_ARRAY_ELEMENTS);
        assert_eq!(items[7].name, "[7]");
        assert_eq!(items[7].value, SnapshotValue::Int(7));
        assert!(items.iter().all(|e| e.address.is_none()));
    }

    #[test]
    fn test_pointer_not_dereferenced() {
        let target = ReplayVariable::scalar("*node", "Node", "{...}");
        let pointer = ReplayVariable::scalar("node", "Node *", "0x55550000")
            .with_children(vec![target]);
        let frame = snapshot_of(vec![pointer]);

        let node = frame.locals.get("node").unwrap();
        assert_eq!(node.kind, StructuralKind::Pointer);
        assert_eq!(node.value, SnapshotValue::Text("0x55550000".into()));
        assert!(node.value.children().is_none());
    }

    #[test]
    fn test_missing_address_and_value() {
        let frame = snapshot_of(vec![ReplayVariable::unavailable("r", "int")]);
        let r = frame.locals.get("r").unwrap();
        assert_eq!(r.address, None);
        assert_eq!(r.value, SnapshotValue::Null);
    }
}
