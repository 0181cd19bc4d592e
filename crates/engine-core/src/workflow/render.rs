//! Template rendering grammar (spec.md §6).
//!
//! `{{ identifier }}` is replaced by `data[identifier]`, falling back to the
//! empty string when the key is missing or `null`. `{{ identifier ?? literal
//! }}` substitutes `literal` instead of the empty string in that case. When
//! `data[identifier]` is an array of strings it expands to `\n`-joined
//! `<li>...</li>` items. Every other value stringifies via its default
//! `Display`/`to_string` coercion.

use serde_json::Value;

/// Render `template` against `data` (an object `Value`; non-object inputs
/// behave as if every lookup misses).
pub fn render(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                out.push_str(&render_expr(after_open[..end].trim(), data));
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated tag: emit the rest verbatim.
                out.push_str(rest);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_expr(expr: &str, data: &Value) -> String {
    let (ident, default) = match expr.split_once("??") {
        Some((id, lit)) => (id.trim(), Some(strip_quotes(lit.trim()))),
        None => (expr, None),
    };

    match data.get(ident) {
        Some(Value::Array(items)) if !items.is_empty() && items.iter().all(Value::is_string) => items
            .iter()
            .map(|v| format!("<li>{}</li>", v.as_str().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => default.unwrap_or_default().to_string(),
        Some(value) => stringify(value),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn strip_quotes(s: &str) -> &str {
    let bare = s.strip_prefix('"').and_then(|s| s.strip_suffix('"'));
    let bare = bare.or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    bare.unwrap_or(s)
}

/// Build the `{email, ...contact.data, ...execution.context}` merge used by
/// the SEND_EMAIL step (§4.1).
pub fn email_template_data(contact_email: &str, contact_data: &Value, execution_context: &Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("email".to_string(), Value::String(contact_email.to_string()));
    merge_object(&mut map, contact_data);
    merge_object(&mut map, execution_context);
    Value::Object(map)
}

/// Build the `{email, ...contact.data}` merge used by campaign sends (§4.4).
pub fn campaign_template_data(contact_email: &str, contact_data: &Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("email".to_string(), Value::String(contact_email.to_string()));
    merge_object(&mut map, contact_data);
    Value::Object(map)
}

fn merge_object(into: &mut serde_json::Map<String, Value>, value: &Value) {
    if let Value::Object(obj) = value {
        for (k, v) in obj {
            into.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_simple_identifier() {
        let data = json!({"name": "Alice"});
        assert_eq!(render("Hi {{name}}!", &data), "Hi Alice!");
    }

    #[test]
    fn missing_identifier_renders_empty_string() {
        let data = json!({});
        assert_eq!(render("Hi {{name}}!", &data), "Hi !");
    }

    #[test]
    fn null_value_renders_empty_string() {
        let data = json!({"name": null});
        assert_eq!(render("Hi {{name}}!", &data), "Hi !");
    }

    #[test]
    fn nullish_coalescing_falls_back_to_literal() {
        let data = json!({});
        assert_eq!(render("Hi {{ name ?? \"friend\" }}!", &data), "Hi friend!");
    }

    #[test]
    fn nullish_coalescing_unused_when_value_present() {
        let data = json!({"name": "Bob"});
        assert_eq!(render("Hi {{ name ?? \"friend\" }}!", &data), "Hi Bob!");
    }

    #[test]
    fn array_of_strings_expands_to_joined_list_items() {
        let data = json!({"items": ["a", "b", "c"]});
        assert_eq!(render("{{items}}", &data), "<li>a</li>\n<li>b</li>\n<li>c</li>");
    }

    #[test]
    fn numeric_value_stringifies_via_default_coercion() {
        let data = json!({"count": 3});
        assert_eq!(render("{{count}} items", &data), "3 items");
    }

    #[test]
    fn email_template_data_merges_contact_then_context_over_email() {
        let data = email_template_data("a@x.com", &json!({"plan": "pro"}), &json!({"plan": "override"}));
        assert_eq!(data["email"], "a@x.com");
        assert_eq!(data["plan"], "override");
    }

    #[test]
    fn campaign_template_data_has_no_execution_context() {
        let data = campaign_template_data("a@x.com", &json!({"name": "Alice"}));
        assert_eq!(data["email"], "a@x.com");
        assert_eq!(data["name"], "Alice");
    }

    #[test]
    fn unterminated_tag_is_emitted_verbatim() {
        let data = json!({});
        assert_eq!(render("hello {{broken", &data), "hello {{broken");
    }
}
