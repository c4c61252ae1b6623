//! Request decoding: query strings, bodies and merged parameters.

use serde_json::{Map, Value};

/// Decode one `application/x-www-form-urlencoded` component; `+` is a space.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Parse query string into a map of strings. Later duplicates win.
pub fn parse_query_string(query: &str) -> Map<String, Value> {
    let mut result = Map::new();
    if query.is_empty() {
        return result;
    }

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(pair), String::new()),
        };
        result.insert(key, Value::String(value));
    }

    result
}

/// Parse a request body according to its content type.
///
/// JSON bodies are kept as parsed; form bodies become an object of strings.
/// Unknown content types, empty bodies and malformed JSON give `None`.
pub fn parse_body(content_type: Option<&str>, body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    let content_type = content_type?.to_lowercase();

    if content_type.starts_with("application/json") {
        serde_json::from_str(body).ok()
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let form = parse_query_string(body);
        (!form.is_empty()).then_some(Value::Object(form))
    } else {
        None
    }
}

/// Merge query and body parameters; body keys win. Only object bodies
/// contribute parameters.
pub fn merge_params(query: &Map<String, Value>, body: Option<&Value>) -> Map<String, Value> {
    let mut params = query.clone();
    if let Some(Value::Object(fields)) = body {
        for (key, value) in fields {
            params.insert(key.clone(), value.clone());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_query_string() {
        let query = parse_query_string("name=Ann+Lee&city=K%C3%B6ln&flag&name2=a%26b");
        assert_eq!(
            Value::Object(query),
            json!({"name": "Ann Lee", "city": "Köln", "flag": "", "name2": "a&b"})
        );
        assert!(parse_query_string("").is_empty());
    }

    #[test]
    fn test_parse_json_body() {
        let body = parse_body(Some("application/json; charset=utf-8"), r#"{"id": 3}"#);
        assert_eq!(body, Some(json!({"id": 3})));
        assert_eq!(parse_body(Some("application/json"), "{oops"), None);
    }

    #[test]
    fn test_parse_form_body() {
        let body = parse_body(Some("application/x-www-form-urlencoded"), "title=Hello+world&n=1");
        assert_eq!(body, Some(json!({"title": "Hello world", "n": "1"})));
    }

    #[test]
    fn test_unknown_or_empty_body() {
        assert_eq!(parse_body(Some("text/plain"), "hi"), None);
        assert_eq!(parse_body(None, "hi"), None);
        assert_eq!(parse_body(Some("application/json"), "  "), None);
    }

    #[test]
    fn test_body_wins_over_query() {
        let query = parse_query_string("id=1&page=2");
        let body = json!({"id": 9, "extra": true});
        assert_eq!(
            Value::Object(merge_params(&query, Some(&body))),
            json!({"id": 9, "page": "2", "extra": true})
        );
        assert_eq!(merge_params(&query, Some(&json!([1]))), query);
    }
}
