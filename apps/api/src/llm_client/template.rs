use serde_json::{Map, Value};

use super::GenerationError;

/// Substitutes `{{ name }}` placeholders with values from `variables`.
///
/// String values are inserted verbatim, `null` as an empty string, and any other
/// JSON value in its compact JSON form. An unterminated `{{` is kept literally.
pub fn render(template: &str, variables: &Map<String, Value>) -> Result<String, GenerationError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let name = after_open[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| GenerationError::MissingVariable(name.to_string()))?;
        match value {
            Value::String(s) => out.push_str(s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }

        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
