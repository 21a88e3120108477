//! Step classification
//!
//! Compares the current frame's locals with the previous recorded step and
//! picks exactly one kind. Rules are evaluated in a fixed order and the
//! first match wins:
//!
//! 1. a variable absent from the previous step (first in enumeration order):
//!    class → object creation, pointer → pointer declaration,
//!    array → array declaration, otherwise variable declaration
//! 2. a variable whose textual value changed → assignment
//! 3. the function is a constructor (`A::A`) → object creation,
//!    or a destructor (`A::~A`) → object destruction
//! 4. line execution

use steptrace_common::{FrameInfo, Locals, StepKind, StructuralKind, VariableSnapshot};

/// Result of classifying one recorded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepClass {
    /// `variable` is `None` when inferred from a constructor name
    ObjectCreation { class_name: String, variable: Option<String> },
    ObjectDestruction { class_name: String },
    VariableDeclaration { variable: String },
    PointerDeclaration { variable: String },
    ArrayDeclaration { variable: String },
    Assignment { variable: String },
    LineExecution,
}

impl StepClass {
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            StepClass::ObjectCreation { .. } => StepKind::ObjectCreation,
            StepClass::ObjectDestruction { .. } => StepKind::ObjectDestruction,
            StepClass::VariableDeclaration { .. } => StepKind::VariableDeclaration,
            StepClass::PointerDeclaration { .. } => StepKind::PointerDeclaration,
            StepClass::ArrayDeclaration { .. } => StepKind::ArrayDeclaration,
            StepClass::Assignment { .. } => StepKind::Assignment,
            StepClass::LineExecution => StepKind::LineExecution,
        }
    }

    /// The variable that drove the classification, if any.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            StepClass::ObjectCreation { variable, .. } => variable.as_deref(),
            StepClass::VariableDeclaration { variable }
            | StepClass::PointerDeclaration { variable }
            | StepClass::ArrayDeclaration { variable }
            | StepClass::Assignment { variable } => Some(variable),
            StepClass::ObjectDestruction { .. } | StepClass::LineExecution => None,
        }
    }

    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        match self {
            StepClass::ObjectCreation { class_name, .. } | StepClass::ObjectDestruction { class_name } => {
                Some(class_name)
            }
            _ => None,
        }
    }

    /// Human-readable explanation for a step at `line`.
    #[must_use]
    pub fn explain(&self, line: u32) -> String {
        match self {
            StepClass::ObjectCreation { class_name, variable: Some(variable) } => {
                format!("Created {class_name} object '{variable}'")
            }
            StepClass::ObjectCreation { class_name, variable: None } => {
                format!("Constructing {class_name} object")
            }
            StepClass::ObjectDestruction { class_name } => format!("Destroying {class_name} object"),
            StepClass::VariableDeclaration { variable } => format!("Declared variable '{variable}'"),
            StepClass::PointerDeclaration { variable } => format!("Declared pointer '{variable}'"),
            StepClass::ArrayDeclaration { variable } => format!("Declared array '{variable}'"),
            StepClass::Assignment { variable } => format!("Assigned new value to '{variable}'"),
            StepClass::LineExecution => format!("Executing line {line}"),
        }
    }
}

/// Classify the step whose frame is `current`, given the locals of the
/// previous recorded step.
#[must_use]
pub fn classify(current: &FrameInfo, previous: &Locals) -> StepClass {
    if let Some(var) = current.locals.iter().find(|v| !previous.contains(&v.name)) {
        return declaration(var);
    }

    let changed = current.locals.iter().find(|v| {
        previous.get(&v.name).is_some_and(|before| before.value.to_string() != v.value.to_string())
    });
    if let Some(var) = changed {
        return StepClass::Assignment { variable: var.name.clone() };
    }

    lifecycle_from_name(&current.function).unwrap_or(StepClass::LineExecution)
}

fn declaration(var: &VariableSnapshot) -> StepClass {
    let variable = var.name.clone();
    match var.kind {
        StructuralKind::Class => StepClass::ObjectCreation {
            class_name: var.class_name.clone().unwrap_or_else(|| var.declared_type.clone()),
            variable: Some(variable),
        },
        StructuralKind::Pointer => StepClass::PointerDeclaration { variable },
        StructuralKind::Array => StepClass::ArrayDeclaration { variable },
        StructuralKind::Scalar => StepClass::VariableDeclaration { variable },
    }
}

/// Constructor/destructor inference from a qualified function name.
///
/// The parameter list is ignored and the name is split at its last `::`
/// outside template arguments. The member is compared against the last
/// component of the qualifier with its template arguments removed, so
/// `ns::Box<std::string>::Box` is a constructor. Any member starting with
/// `~` is a destructor.
#[must_use]
pub fn lifecycle_from_name(function: &str) -> Option<StepClass> {
    let name = function.split('(').next().unwrap_or(function).trim();
    let (qualifier, member) = split_last_scope(name)?;
    if qualifier.is_empty() {
        return None;
    }

    let bare = strip_template_args(qualifier);
    let class = bare.rsplit("::").next().unwrap_or(&bare);

    if member == class {
        Some(StepClass::ObjectCreation { class_name: qualifier.to_string(), variable: None })
    } else if member.starts_with('~') {
        Some(StepClass::ObjectDestruction { class_name: qualifier.to_string() })
    } else {
        None
    }
}

/// Split at the last `::` that is not inside `<...>`.
fn split_last_scope(name: &str) -> Option<(&str, &str)> {
    let bytes = name.as_bytes();
    let mut depth = 0usize;
    let mut last = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                last = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    last.map(|at| (&name[..at], &name[at + 2..]))
}

/// `ns::Holder<std::basic_string<char> >` → `ns::Holder`
fn strip_template_args(name: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim_end().to_string()
}
