use std::fs;
use std::sync::Arc;

use craml::dataset::Table;
use craml::extrapolate::{Extrapolator, SimilarityTagger, evidence_column};
use craml::models::RuleFile;
use craml::ollama::{Embedder, OllamaError};
use craml::utils::build_pool;
use craml::KeywordSet;
use tempfile::tempdir;

fn rules(name: &str, csv: &str) -> RuleFile {
    RuleFile::from_reader(name, csv.as_bytes()).unwrap()
}

fn extracted(dir: &std::path::Path, name: &str, rows: &[(&str, &str)]) -> std::path::PathBuf {
    let mut table = Table::new(vec!["id".into(), "text".into()]);
    for (id, text) in rows {
        table.push_row(vec![id.to_string(), text.to_string()]);
    }
    let path = dir.join(name);
    table.write(&path).unwrap();
    path
}

#[test]
fn highest_priority_rule_decides_the_row() {
    let file = rules("audit", "rule,prio,tagA,tagB\nfraud,1,1,0\nwaste,2,0,1\n");
    let extrapolator = Extrapolator::new(vec![file]);

    assert_eq!(extrapolator.tags(), &["tagA", "tagB"]);
    assert_eq!(
        extrapolator.classify("we found fraud|and plenty of waste"),
        vec![false, true]
    );
    assert_eq!(extrapolator.classify("only fraud here"), vec![true, false]);
    assert_eq!(extrapolator.classify("nothing"), vec![false, false]);
}

#[test]
fn single_rule_yields_exactly_its_encoding() {
    let file = rules("one", "rule,prio,x,y,z\nkickback,0,1,0,1\n");
    let extrapolator = Extrapolator::new(vec![file]);
    assert_eq!(extrapolator.classify("kickback"), vec![true, false, true]);
}

#[test]
fn regex_rules_match_chunks() {
    let file = rules("re", "rule,prio,fraud\n\"REGEX:::bri(be|bery)\",1,1\n");
    let extrapolator = Extrapolator::new(vec![file]);
    assert_eq!(extrapolator.classify("offered a bribe"), vec![true]);
    assert_eq!(extrapolator.classify("a bridge"), vec![false]);
}

#[test]
fn shared_tags_are_or_combined_across_rule_files() {
    let first = rules("first", "rule,prio,fraud\nscheme,1,1\n");
    let second = rules("second", "rule,prio,fraud,waste\ninvoice,5,0,1\n");
    let extrapolator = Extrapolator::new(vec![first, second]);

    assert_eq!(extrapolator.tags(), &["fraud", "waste"]);
    assert_eq!(extrapolator.classify("a scheme|an invoice"), vec![true, true]);
}

#[test]
fn run_writes_one_classified_file_per_input() {
    let dir = tempdir().unwrap();
    let a = extracted(dir.path(), "a.csv", &[("1", "fraud and waste"), ("2", "calm")]);
    let b = extracted(dir.path(), "b.csv", &[("3", "fraud")]);

    let file = rules("audit", "rule,prio,tagA,tagB\nfraud,1,1,0\nwaste,2,0,1\n");
    let pool = build_pool(2).unwrap();
    let out = dir.path().join("classified");
    let outputs = Extrapolator::new(vec![file]).run(&[a, b], &out, &pool).unwrap();

    assert_eq!(outputs, vec![out.join("a.csv"), out.join("b.csv")]);
    let table = Table::read(&outputs[0]).unwrap();
    assert_eq!(table.headers(), &["id", "text", "tagA", "tagB"]);
    assert_eq!(table.rows()[0][2..], ["0".to_string(), "1".to_string()]);
    assert_eq!(table.rows()[1][2..], ["0".to_string(), "0".to_string()]);
    assert!(fs::read_to_string(&outputs[1]).unwrap().contains("fraud,1,0"));
}

/// Rule text points along x; chunks carry a fixed angle to it.
struct AngleEmbedder;

impl Embedder for AngleEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OllamaError> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("exact") {
                    vec![3.0, 4.0]
                } else if t.contains("close") {
                    vec![4.0, 3.0]
                } else {
                    vec![1.0, 0.0]
                }
            })
            .collect())
    }
}

fn tagger() -> SimilarityTagger {
    let file = rules("sim", "rule,prio,fraud\nfraud rule,1,1\n");
    let mut keywords = KeywordSet::new();
    keywords.insert("fraud", ["fraud"]);
    SimilarityTagger::new(Arc::new(AngleEmbedder), &[file], &keywords, 0.6).unwrap()
}

#[test]
fn similarity_equal_to_threshold_is_not_positive() {
    let labels = tagger().tag_context("fraud exact").unwrap();
    assert_eq!(labels, vec![(false, Vec::<String>::new())]);
}

#[test]
fn similarity_above_threshold_keeps_evidence() {
    let labels = tagger().tag_context("fraud exact|fraud close|close but no keyword").unwrap();
    assert_eq!(labels, vec![(true, vec!["fraud close".to_string()])]);
}

#[test]
fn similarity_run_adds_evidence_column() {
    let dir = tempdir().unwrap();
    let input = extracted(dir.path(), "part.csv", &[("1", "fraud close"), ("2", "fraud exact")]);

    let outputs = tagger().run(&[input], &dir.path().join("out")).unwrap();

    let table = Table::read(&outputs[0]).unwrap();
    let evidence = table.column_index(&evidence_column("fraud")).unwrap();
    let flag = table.column_index("fraud").unwrap();
    assert_eq!(table.rows()[0][flag], "1");
    assert_eq!(table.rows()[0][evidence], "fraud close");
    assert_eq!(table.rows()[1][flag], "0");
    assert_eq!(table.rows()[1][evidence], "");
}
