//! Ratings files: corpora, topics, query groups, queries and their judgments.

use crate::domain::{Ancestry, Evaluation, Query, QueryDefinition};
use crate::error::{RankevalError, Result};
use crate::judgment::{Judgment, JudgmentSet};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_ID_FIELD: &str = "id";
/// Placeholder whose value names a query.
pub const QUERY_PLACEHOLDER: &str = "$query";

#[derive(Debug, Deserialize)]
struct RatingsFile {
    index: Option<String>,
    corpora_file: Option<String>,
    #[serde(default = "default_id_field")]
    id_field: String,
    #[serde(default)]
    topics: Vec<TopicEntry>,
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    #[serde(alias = "description")]
    name: String,
    #[serde(default)]
    query_groups: Vec<GroupEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name: String,
    template: Option<String>,
    #[serde(default)]
    queries: Vec<Value>,
    #[serde(default)]
    relevant_documents: RelevantDocuments,
}

#[derive(Debug, Deserialize)]
struct QueryEntry {
    template: Option<String>,
    #[serde(default)]
    placeholders: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelevantDocuments {
    /// `{docId: {grade, gain}}`
    PerDocument(BTreeMap<String, DocumentRating>),
    /// `{grade: [docId, ...]}`
    Grouped(BTreeMap<String, Vec<String>>),
}

impl Default for RelevantDocuments {
    fn default() -> Self {
        RelevantDocuments::PerDocument(BTreeMap::new())
    }
}

#[derive(Debug, Deserialize)]
struct DocumentRating {
    grade: Option<Decimal>,
    gain: Option<Decimal>,
}

impl RelevantDocuments {
    fn into_judgments(self) -> Result<JudgmentSet> {
        let mut judgments = HashMap::new();
        match self {
            RelevantDocuments::PerDocument(documents) => {
                for (doc_id, rating) in documents {
                    let judgment = match (rating.grade, rating.gain) {
                        (Some(grade), Some(gain)) => Judgment::with_gain(grade, gain),
                        (Some(grade), None) => Judgment::new(grade),
                        // legacy files only carry a gain, which is really the grade
                        (None, Some(gain)) => Judgment::new(gain),
                        (None, None) => {
                            return Err(RankevalError::Config(format!(
                                "document {} has neither grade nor gain",
                                doc_id
                            )))
                        }
                    };
                    judgment.validate()?;
                    judgments.insert(doc_id, judgment);
                }
            }
            RelevantDocuments::Grouped(groups) => {
                for (grade, doc_ids) in groups {
                    let grade: Decimal = grade.trim().parse().map_err(|_| {
                        RankevalError::Config(format!("invalid grade '{}' in relevant_documents", grade))
                    })?;
                    let judgment = Judgment::new(grade);
                    judgment.validate()?;
                    for doc_id in doc_ids {
                        judgments.insert(doc_id, judgment.clone());
                    }
                }
            }
        }
        Ok(JudgmentSet::new(judgments))
    }
}

/// Query name: the `$query` placeholder when it is a string, else the
/// canonical JSON of the query node.
fn query_name(node: &Value, entry: &QueryEntry) -> String {
    match entry.placeholders.get(QUERY_PLACEHOLDER) {
        Some(Value::String(text)) => text.clone(),
        _ => node.to_string(),
    }
}

/// Adds every query of one ratings document to `evaluation`. Returns the index
/// the document declares, if any.
pub fn parse_ratings(text: &str, fallback_corpus: &str, evaluation: &mut Evaluation) -> Result<Option<String>> {
    let file: RatingsFile = serde_json::from_str(text)
        .map_err(|e| RankevalError::Config(format!("malformed ratings in {}: {}", fallback_corpus, e)))?;
    let corpus_name = file
        .corpora_file
        .clone()
        .unwrap_or_else(|| fallback_corpus.to_string());

    let mut added = 0;
    for topic in file.topics {
        for group in topic.query_groups {
            let judgments = group.relevant_documents.into_judgments()?;
            let ancestry = Ancestry {
                corpus: corpus_name.clone(),
                topic: topic.name.clone(),
                query_group: group.name.clone(),
            };
            let query_group = evaluation.group_at(&ancestry);
            for node in group.queries {
                let entry: QueryEntry = serde_json::from_value(node.clone()).map_err(|e| {
                    RankevalError::Config(format!("malformed query in group {}: {}", group.name, e))
                })?;
                let name = query_name(&node, &entry);
                let definition = QueryDefinition {
                    template: entry.template,
                    default_template: group.template.clone(),
                    placeholders: entry.placeholders,
                    raw: node,
                };
                let before = query_group.queries().len();
                query_group.query(&name, || {
                    Query::new(
                        name.clone(),
                        ancestry.clone(),
                        definition,
                        judgments.clone(),
                        file.id_field.clone(),
                    )
                });
                if query_group.queries().len() > before {
                    added += 1;
                } else {
                    log::warn!("Duplicate query '{}' in group {} ignored", name, group.name);
                }
            }
        }
    }
    log::debug!("Corpus {}: {} queries", corpus_name, added);
    Ok(file.index)
}

/// Ratings files under `path`: the file itself, or every `*.json` below it, sorted.
pub fn ratings_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(RankevalError::Config(format!(
            "ratings path {} does not exist",
            path.display()
        )));
    }
    let files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    if files.is_empty() {
        return Err(RankevalError::Config(format!(
            "no ratings files found in {}",
            path.display()
        )));
    }
    Ok(files)
}

/// Load every ratings file under `path` into `evaluation`. Returns the first
/// index declared by a ratings file.
pub fn load_ratings(path: &Path, evaluation: &mut Evaluation) -> Result<Option<String>> {
    let mut index = None;
    for file in ratings_files(path)? {
        let text = std::fs::read_to_string(&file).map_err(|e| {
            RankevalError::Config(format!("Failed to read ratings {}: {}", file.display(), e))
        })?;
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let declared = parse_ratings(&text, &stem, evaluation)?;
        if index.is_none() {
            index = declared;
        }
    }
    log::info!(
        "Loaded {} queries in {} corpora from {}",
        evaluation.query_count(),
        evaluation.corpora().len(),
        path.display()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASSES: &str = r#"{
        "index": "core1",
        "corpora_file": "electric_basses.bulk",
        "id_field": "sku",
        "topics": [{
            "description": "Fender basses",
            "query_groups": [{
                "name": "Brand",
                "template": "only_q.json",
                "queries": [
                    { "placeholders": { "$query": "fender" } },
                    { "template": "fuzzy.json", "placeholders": { "$query": "fendr" } },
                    { "placeholders": { "$query": "fender" } }
                ],
                "relevant_documents": {
                    "1": { "grade": 3 },
                    "2": { "gain": 2 },
                    "3": { "grade": 1, "gain": 5 }
                }
            }]
        }]
    }"#;

    #[test]
    fn test_parse_tree_and_judgments() {
        let mut evaluation = Evaluation::new("e", vec![]);
        let index = parse_ratings(BASSES, "fallback", &mut evaluation).unwrap();
        assert_eq!(index.as_deref(), Some("core1"));

        let corpus = &evaluation.corpora()[0];
        assert_eq!(corpus.name(), "electric_basses.bulk");
        let group = &corpus.topics()[0].query_groups()[0];
        assert_eq!(corpus.topics()[0].name(), "Fender basses");
        assert_eq!(group.queries().len(), 2);

        let fender = &group.queries()[0];
        assert_eq!(fender.name(), "fender");
        assert_eq!(fender.id_field(), "sku");
        assert_eq!(fender.definition().default_template.as_deref(), Some("only_q.json"));
        assert_eq!(fender.definition().template, None);
        assert_eq!(group.queries()[1].definition().template.as_deref(), Some("fuzzy.json"));

        let judgments = fender.judgments();
        assert_eq!(judgments.len(), 3);
        assert_eq!(judgments.get("2").unwrap().grade(), Decimal::from(2));
        assert_eq!(judgments.get("3").unwrap().gain(), Decimal::from(5));
    }

    #[test]
    fn test_grouped_relevant_documents() {
        let text = r#"{ "topics": [{ "name": "t", "query_groups": [{
            "name": "g",
            "queries": [{ "placeholders": { "$term": "x" } }],
            "relevant_documents": { "3": ["a", "b"], "1": ["c"] } }] }] }"#;
        let mut evaluation = Evaluation::new("e", vec![]);
        let index = parse_ratings(text, "stem", &mut evaluation).unwrap();
        assert_eq!(index, None);

        let corpus = &evaluation.corpora()[0];
        assert_eq!(corpus.name(), "stem");
        let query = &corpus.topics()[0].query_groups()[0].queries()[0];
        assert_eq!(query.name(), r#"{"placeholders":{"$term":"x"}}"#);
        assert_eq!(query.id_field(), DEFAULT_ID_FIELD);
        assert_eq!(query.judgments().get("b").unwrap().grade(), Decimal::from(3));
        assert_eq!(query.judgments().get("c").unwrap().gain(), Decimal::ONE);
    }

    #[test]
    fn test_out_of_range_grades_rejected() {
        let per_document = r#"{ "topics": [{ "name": "t", "query_groups": [{
            "name": "g",
            "queries": [{ "placeholders": { "$query": "x" } }],
            "relevant_documents": { "a": { "grade": 100 } } }] }] }"#;
        let mut evaluation = Evaluation::new("e", vec![]);
        let err = parse_ratings(per_document, "c", &mut evaluation).unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)), "{:?}", err);

        let grouped = r#"{ "topics": [{ "name": "t", "query_groups": [{
            "name": "g",
            "queries": [{ "placeholders": { "$query": "x" } }],
            "relevant_documents": { "96": ["a"] } }] }] }"#;
        let mut evaluation = Evaluation::new("e", vec![]);
        let err = parse_ratings(grouped, "c", &mut evaluation).unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)), "{:?}", err);
    }

    #[test]
    fn test_malformed_ratings_are_config_errors() {
        let mut evaluation = Evaluation::new("e", vec![]);
        let err = parse_ratings("{ not json", "x", &mut evaluation).unwrap_err();
        assert!(err.is_fatal());

        let text = r#"{ "topics": [{ "name": "t", "query_groups": [{ "name": "g",
            "queries": [], "relevant_documents": { "a": {} } }] }] }"#;
        assert!(matches!(
            parse_ratings(text, "x", &mut evaluation),
            Err(RankevalError::Config(_))
        ));
    }

    #[test]
    fn test_load_directory_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.json"), BASSES).unwrap();
        let other = r#"{ "index": "core2", "topics": [{ "name": "t", "query_groups": [{ "name": "g",
            "queries": [{ "placeholders": { "$query": "q" } }] }] }] }"#;
        fs::write(dir.path().join("a.json"), other).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut evaluation = Evaluation::new("e", vec![]);
        let index = load_ratings(dir.path(), &mut evaluation).unwrap();
        assert_eq!(index.as_deref(), Some("core2"));
        let names: Vec<&str> = evaluation.corpora().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "electric_basses.bulk"]);
        assert_eq!(evaluation.query_count(), 3);
    }

    #[test]
    fn test_missing_ratings_path() {
        let mut evaluation = Evaluation::new("e", vec![]);
        let err = load_ratings(Path::new("/nonexistent/ratings"), &mut evaluation).unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)));
    }
}
