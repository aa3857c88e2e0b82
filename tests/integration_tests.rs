use defect_bench::core::report::OutputFormat;
use defect_bench::core::Pipeline;
use defect_bench::{BenchEngine, BenchPipeline, CliConfig, DefectCategory, LocalStorage, Verdict};
use std::io::Read;
use tempfile::TempDir;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn cli_config(corpus: String, output_dir: Option<String>) -> CliConfig {
    CliConfig {
        corpus: Some(corpus),
        category: vec![],
        threshold: None,
        config: None,
        output_dir,
        archive: None,
        format: OutputFormat::Text,
        disable_rule: vec![],
        dry_run: false,
        verbose: false,
        log_json: false,
    }
}

#[tokio::test]
async fn test_end_to_end_toml_corpus() {
    // Setup temporary directory for output
    let temp_dir = TempDir::new().unwrap();
    let output_dir = temp_dir.path().to_str().unwrap().to_string();

    let mut config = cli_config(fixture("corpus.toml"), Some(output_dir.clone()));
    config.archive = Some("bench_report.zip".to_string());

    let pipeline = BenchPipeline::new(LocalStorage::default(), config);
    let engine = BenchEngine::new(pipeline);
    let run = engine.run().await.unwrap();

    assert_eq!(run.report.total(), 10);
    assert_eq!(run.report.correct(), 10);
    assert_eq!(run.report.per_category().len(), DefectCategory::ALL.len());
    assert!(run.report.meets_threshold(100.0));
    assert_eq!(run.written.len(), 4);

    // Verify output files exist
    for name in ["report.json", "per_category.csv", "fragments.csv", "bench_report.zip"] {
        assert!(temp_dir.path().join(name).exists(), "missing {name}");
    }

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(temp_dir.path().join("report.json")).unwrap()).unwrap();
    assert_eq!(json["passed"], true);
    assert!(json["execution_time_ms"].is_u64());
    assert_eq!(json["report"]["correct"], 10);

    // Verify ZIP content
    let zip_data = std::fs::read(temp_dir.path().join("bench_report.zip")).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data)).unwrap();
    assert_eq!(archive.len(), 3);
    let mut fragments_csv = String::new();
    archive
        .by_name("fragments.csv")
        .unwrap()
        .read_to_string(&mut fragments_csv)
        .unwrap();
    assert!(fragments_csv.contains("bo-past-end,BufferOverflow,Unsafe,Unsafe,true"));
}

#[tokio::test]
async fn test_json_and_csv_corpora() {
    let json = BenchPipeline::new(LocalStorage::default(), cli_config(fixture("corpus.json"), None));
    let fragments = json.extract().await.unwrap();
    assert_eq!(fragments.len(), 3);
    let report = json.score(fragments).await.unwrap();
    assert_eq!(report.correct(), 3);

    let csv = BenchPipeline::new(LocalStorage::default(), cli_config(fixture("corpus.csv"), None));
    let fragments = csv.extract().await.unwrap();
    assert_eq!(fragments[0].expected_verdict(), Verdict::Safe);
    let report = csv.score(fragments).await.unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.correct(), 3);
}

#[tokio::test]
async fn test_category_filter_and_disabled_rule() {
    let mut config = cli_config(fixture("corpus.toml"), None);
    config.category = vec![DefectCategory::NullDeref, DefectCategory::DataRace];
    config.disable_rule = vec![DefectCategory::DataRace];

    let engine = BenchEngine::new(BenchPipeline::new(LocalStorage::default(), config));
    let run = engine.run().await.unwrap();

    assert_eq!(run.report.total(), 3);
    assert_eq!(run.report.correct(), 2);
    assert_eq!(run.report.unknown(), 1);
    assert!(!run.report.meets_threshold(100.0));
    assert!(run.written.is_empty());
}

#[tokio::test]
async fn test_broken_corpus_aborts_run() {
    let temp_dir = TempDir::new().unwrap();
    let corpus = temp_dir.path().join("broken.json");
    std::fs::write(
        &corpus,
        r#"[{"id": "x", "category": "NullDeref", "source_text": "*p = 1;"}]"#,
    )
    .unwrap();

    let config = cli_config(corpus.to_str().unwrap().to_string(), None);
    let engine = BenchEngine::new(BenchPipeline::new(LocalStorage::default(), config));
    let err = engine.run().await.unwrap_err();
    assert!(matches!(
        err,
        defect_bench::BenchError::CorpusFormatError { ref fragment, .. } if fragment == "x"
    ));
}

#[tokio::test]
async fn test_dry_run_counts_without_scoring() {
    let engine = BenchEngine::new(BenchPipeline::new(
        LocalStorage::default(),
        cli_config(fixture("corpus.toml"), None),
    ));
    let counts = engine.dry_run().await.unwrap();
    assert_eq!(counts.values().sum::<usize>(), 10);
    assert_eq!(counts.get(&DefectCategory::BufferOverflow), Some(&2));
}
