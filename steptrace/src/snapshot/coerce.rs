//! Best-effort conversion of debugger text into typed snapshot values.
//!
//! The declared type name picks the target representation. Anything that
//! fails to parse is kept verbatim as text.

use steptrace_common::SnapshotValue;

/// Coerce a rendered value according to its declared type.
///
/// | declared type contains | result                                   |
/// |------------------------|------------------------------------------|
/// | `int`                  | [`SnapshotValue::Int`]                   |
/// | `float` / `double`     | [`SnapshotValue::Float`] (finite only)   |
/// | `bool`                 | [`SnapshotValue::Bool`] (`true` or not)  |
/// | anything else          | text, outer double quotes stripped       |
///
/// Matching is case-insensitive. A missing value is [`SnapshotValue::Null`].
#[must_use]
pub fn coerce_value(type_name: &str, raw: Option<&str>) -> SnapshotValue {
    let Some(raw) = raw else {
        return SnapshotValue::Null;
    };
    let lowered = type_name.to_lowercase();

    if lowered.contains("int") {
        return raw.trim().parse().map_or_else(|_| text(raw), SnapshotValue::Int);
    }
    if lowered.contains("float") || lowered.contains("double") {
        // non-finite floats have no JSON number form
        return raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map_or_else(|| text(raw), SnapshotValue::Float);
    }
    if lowered.contains("bool") {
        return SnapshotValue::Bool(raw.trim().eq_ignore_ascii_case("true"));
    }

    match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => text(inner),
        None => text(raw),
    }
}

fn text(raw: &str) -> SnapshotValue {
    SnapshotValue::Text(raw.to_string())
}
