//! Result aggregation and mapping-file I/O
//!
//! Merges per-worker partial results once the pool has joined and writes
//! the title -> record mapping as 4-space indented JSON, sorted by title,
//! with non-ASCII text kept as-is.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::path::Path;
use tracing::info;
use wikiner_core::{NerMapping, Result, WikinerError};

/// Per-worker Title -> record map
pub type PartialResult = NerMapping;

/// Union of partial results; later partials win on duplicate titles
pub fn merge<I>(partials: I) -> NerMapping
where
    I: IntoIterator<Item = PartialResult>,
{
    let mut merged = NerMapping::new();
    for partial in partials {
        merged.extend(partial);
    }
    merged
}

/// Serialize a mapping the way it is stored on disk
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Write a mapping to `destination`, creating parent directories
pub fn persist(mapping: &NerMapping, destination: &Path) -> Result<()> {
    write_json(mapping, destination)?;
    info!(
        entries = mapping.len(),
        path = %destination.display(),
        "mapping written"
    );
    Ok(())
}

/// Write any serializable document in the mapping-file style
pub fn write_json<T: Serialize>(value: &T, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WikinerError::io(parent, e))?;
    }

    let bytes = to_pretty_json(value)?;
    std::fs::write(destination, bytes).map_err(|e| WikinerError::io(destination, e))
}

/// Read a mapping file produced by a previous run
pub fn load_mapping(path: &Path) -> Result<NerMapping> {
    let content = std::fs::read_to_string(path).map_err(|e| WikinerError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| WikinerError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikiner_core::{Category, EntityRecord, Qid, Title};

    fn title(s: &str) -> Title {
        Title::parse(s).unwrap()
    }

    #[test]
    fn test_merge_is_union() {
        let mut a = PartialResult::new();
        a.insert(title("A"), EntityRecord::unresolved());
        let mut b = PartialResult::new();
        b.insert(
            title("B"),
            EntityRecord::resolved(Qid::new("Q2"), Some(Category::Event)),
        );

        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&title("B")].category, Some(Category::Event));
    }

    #[test]
    fn test_merge_later_partial_wins() {
        let mut a = PartialResult::new();
        a.insert(title("Dup"), EntityRecord::unresolved());
        let mut b = PartialResult::new();
        b.insert(title("Dup"), EntityRecord::resolved(Qid::new("Q9"), None));

        let merged = merge(vec![a, b]);
        assert_eq!(merged[&title("Dup")].identifier, Some(Qid::new("Q9")));
    }

    #[test]
    fn test_pretty_json_layout() {
        let mut mapping = NerMapping::new();
        mapping.insert(
            title("महात्मा गांधी"),
            EntityRecord::resolved(Qid::new("Q1001"), Some(Category::Person)),
        );
        mapping.insert(title("Unknown"), EntityRecord::unresolved());

        let text = String::from_utf8(to_pretty_json(&mapping).unwrap()).unwrap();
        let expected = "{\n    \"Unknown\": {\n        \"identifier\": null\n    },\n    \"महात्मा_गांधी\": {\n        \"identifier\": \"Q1001\",\n        \"category\": \"PERSON\"\n    }\n}\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ner_list.json");

        let mut mapping = NerMapping::new();
        mapping.insert(
            title("Paris"),
            EntityRecord::resolved(Qid::new("Q90"), Some(Category::Location)),
        );
        persist(&mapping, &path).unwrap();

        assert_eq!(load_mapping(&path).unwrap(), mapping);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_mapping(&path),
            Err(WikinerError::Json { .. })
        ));
        assert!(matches!(
            load_mapping(&dir.path().join("missing.json")),
            Err(WikinerError::Io { .. })
        ));
    }
}
