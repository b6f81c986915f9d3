use std::path::{Path, PathBuf};

use craml::classifier::{ModelKind, TagModel, Trainer};
use craml::dataset::Table;
use craml::models::RuleFile;
use craml::training::{TrainingOptions, TrainingSetBuilder};
use craml::utils::build_pool;
use tempfile::tempdir;

fn extracted(dir: &Path, name: &str, contexts: &[&str]) -> PathBuf {
    let mut table = Table::new(vec!["id".into(), "text".into()]);
    for (i, context) in contexts.iter().enumerate() {
        table.push_row(vec![i.to_string(), context.to_string()]);
    }
    let path = dir.join(name);
    table.write(&path).unwrap();
    path
}

#[test]
fn shared_chunk_keeps_the_higher_priority_encoding() {
    let dir = tempdir().unwrap();
    let input = extracted(dir.path(), "part.csv", &["audit fraud"]);
    let rules =
        RuleFile::from_reader("audit", "rule,prio,tagA,tagB\naudit,1,1,0\nfraud,2,0,1\n".as_bytes())
            .unwrap();

    let pool = build_pool(1).unwrap();
    let output = dir.path().join("audit.csv");
    let set = TrainingSetBuilder::new(&rules, TrainingOptions::default())
        .build(&[input], &output, &pool)
        .unwrap();

    assert_eq!(set.rows, 1);
    let table = Table::read(&output).unwrap();
    assert_eq!(table.headers(), &["chunk", "tagA", "tagB"]);
    assert_eq!(table.rows()[0], vec!["audit fraud".to_string(), "0".into(), "1".into()]);
}

#[test]
fn negatives_never_outnumber_positives_per_file() {
    let dir = tempdir().unwrap();
    let a = extracted(dir.path(), "a.csv", &["fraud one|calm a1|calm a2|calm a3"]);
    let b = extracted(dir.path(), "b.csv", &["calm b1|calm b2"]);
    let c = extracted(dir.path(), "c.csv", &["fraud x|fraud y|calm c"]);
    let rules = RuleFile::from_reader("r", "rule,prio,fraud\nfraud,1,1\n".as_bytes()).unwrap();

    let options = TrainingOptions {
        negative_sampling: true,
        ..TrainingOptions::default()
    };
    let pool = build_pool(2).unwrap();
    let output = dir.path().join("r.csv");
    let set = TrainingSetBuilder::new(&rules, options)
        .build(&[a, b, c], &output, &pool)
        .unwrap();

    let counts: Vec<(usize, usize)> = set.files.iter().map(|f| (f.positives, f.negatives)).collect();
    assert_eq!(counts, vec![(1, 1), (0, 0), (2, 1)]);
    assert_eq!(set.rows, 5);

    let table = Table::read(&output).unwrap();
    for row in table.rows() {
        let positive = row[0].contains("fraud");
        assert_eq!(row[1], if positive { "1" } else { "0" });
    }
}

#[test]
fn unmatched_corpus_writes_an_empty_set() {
    let dir = tempdir().unwrap();
    let input = extracted(dir.path(), "quiet.csv", &["nothing|at all"]);
    let rules = RuleFile::from_reader("r", "rule,prio,fraud\nfraud,1,1\n".as_bytes()).unwrap();

    let pool = build_pool(1).unwrap();
    let output = dir.path().join("r.csv");
    let set = TrainingSetBuilder::new(&rules, TrainingOptions::default())
        .build(&[input], &output, &pool)
        .unwrap();

    assert_eq!(set.rows, 0);
    assert!(Table::read(&output).unwrap().is_empty());
}

#[test]
fn trained_models_are_saved_per_tag_and_reload() {
    let dir = tempdir().unwrap();
    let mut corpus = Table::new(vec!["chunk".into(), "fraud".into()]);
    for i in 0..10 {
        corpus.push_row(vec![format!("fraud scheme kickback bribe case{i}"), "1".into()]);
        corpus.push_row(vec![format!("routine paperwork filing review case{i}"), "0".into()]);
    }
    let path = dir.path().join("audit.csv");
    corpus.write(&path).unwrap();

    let clf = dir.path().join("clf");
    let trainer = Trainer::from_corpus(&path, ModelKind::NaiveBayes, 1.0, &clf).unwrap();
    let reports: Vec<_> = trainer.reports().collect::<Result<_, _>>().unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].test_rows, 4);
    assert_eq!(reports[0].train_rows, 16);
    assert_eq!(reports[0].model_path, clf.join("NB_1.0-fraud.json"));

    let model = TagModel::load(&reports[0].model_path).unwrap();
    assert_eq!(model.tag(), "fraud");
    assert_eq!(model.identity.rules, "audit");
    assert!(model.predict("a kickback scheme"));
    assert!(!model.predict("routine paperwork"));
}
