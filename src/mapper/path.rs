use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// A dotted source path such as `repository_versions[0].RepositoryVersions.id`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn new(expr: &str) -> FieldPath {
        let mut segments = vec![];
        for part in expr.split('.').filter(|p| !p.is_empty()) {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                segments.push(Segment::Field(name.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                match stripped.find(']') {
                    Some(end) => {
                        let inner = &stripped[..end];
                        match inner.parse::<usize>() {
                            Ok(index) => segments.push(Segment::Index(index)),
                            Err(_) => segments.push(Segment::Field(inner.to_string())),
                        }
                        rest = &stripped[end + 1..];
                    }
                    None => {
                        segments.push(Segment::Field(rest.to_string()));
                        rest = "";
                    }
                }
            }
        }
        FieldPath {
            raw: expr.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks the path; `None` when any step is missing.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Field(name), Value::Object(map)) => map.get(name)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Declarative `(output attribute, source path)` table.
#[derive(Debug, Clone)]
pub struct FieldTable {
    entries: Vec<(String, FieldPath)>,
}

impl FieldTable {
    pub fn new(entries: &[(&str, &str)]) -> FieldTable {
        FieldTable {
            entries: entries
                .iter()
                .map(|(output, source)| (output.to_string(), FieldPath::new(source)))
                .collect(),
        }
    }

    /// Builds the attribute map for `item`. Paths that resolve to nothing are
    /// left out instead of being set to null.
    pub fn apply(&self, item: &Value) -> Map<String, Value> {
        let mut attributes = Map::new();
        for (output, path) in &self.entries {
            if let Some(value) = path.resolve(item) {
                attributes.insert(output.clone(), value.clone());
            }
        }
        attributes
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolves_nested_fields_and_indices() {
        let item = json!({
            "HostStackVersions": {"id": 3, "state": "CURRENT"},
            "repository_versions": [
                {"RepositoryVersions": {"id": 1, "repository_version": "2.2.0.1-885"}},
                {"RepositoryVersions": {"id": 2}}
            ]
        });
        assert_eq!(FieldPath::new("HostStackVersions.state").resolve(&item), Some(&json!("CURRENT")));
        assert_eq!(
            FieldPath::new("repository_versions[0].RepositoryVersions.repository_version").resolve(&item),
            Some(&json!("2.2.0.1-885"))
        );
        assert_eq!(
            FieldPath::new("repository_versions[1].RepositoryVersions.id").resolve(&item),
            Some(&json!(2))
        );
        assert_eq!(FieldPath::new("repository_versions[5].RepositoryVersions.id").resolve(&item), None);
        assert_eq!(FieldPath::new("HostStackVersions.missing").resolve(&item), None);
        assert_eq!(FieldPath::new("HostStackVersions.state.deeper").resolve(&item), None);
    }

    #[test]
    fn parses_chained_indices() {
        let item = json!({"matrix": [[1, 2], [3, 4]]});
        assert_eq!(FieldPath::new("matrix[1][0]").resolve(&item), Some(&json!(3)));
    }

    #[test]
    fn table_omits_unresolved_paths() {
        let table = FieldTable::new(&[
            ("host_name", "Hosts.host_name"),
            ("rack", "Hosts.rack_info"),
            ("disk_total", "metrics.disk.disk_total"),
        ]);
        let attributes = table.apply(&json!({"Hosts": {"host_name": "h1", "rack_info": null}}));
        assert_eq!(attributes.get("host_name"), Some(&json!("h1")));
        assert_eq!(attributes.get("rack"), Some(&json!(null)));
        assert!(!attributes.contains_key("disk_total"));
    }
}
