use std::cmp::Ordering;

use serde_json::Value;

/// Compares dotted version strings component by component as integers.
/// Missing components count as zero, so `"2.2"` equals `"2.2.0"`.
pub fn compare_versions(first: &str, second: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u64>().unwrap_or(0)
            })
            .collect()
    };
    let first = parse(first);
    let second = parse(second);
    let len = first.len().max(second.len());
    for i in 0..len {
        let a = first.get(i).copied().unwrap_or(0);
        let b = second.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Appends the `_=<millis>` cache-busting parameter.
pub fn with_cache_buster(url: &str, millis: i64) -> String {
    let separator = if url.contains('?') { "&_=" } else { "?_=" };
    format!("{}{}{}", url, separator, millis)
}

/// Ids arrive as strings or numbers depending on the endpoint.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
