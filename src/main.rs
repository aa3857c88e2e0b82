use clap::Parser;
use defect_bench::core::report::{self, OutputFormat, ReportDocument};
use defect_bench::core::ConfigProvider;
use defect_bench::utils::error::BenchError;
use defect_bench::utils::{logger, validation::Validate};
use defect_bench::{BenchEngine, BenchPipeline, CliConfig, HarnessConfig, LocalStorage};

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting defect-bench CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let exit_code = match &cli.config {
        Some(path) => match HarnessConfig::from_file(path) {
            Ok(file_config) => {
                tracing::info!("📄 Loaded configuration from {}", path);
                let config = file_config.with_cli_overrides(&cli);
                run(config, &cli).await
            }
            Err(e) => exit_on_error(&e),
        },
        None => run(cli.clone(), &cli).await,
    };

    std::process::exit(exit_code);
}

async fn run<C: ConfigProvider + Validate + 'static>(config: C, cli: &CliConfig) -> i32 {
    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        return 1;
    }

    let corpus = config.corpus_path().to_string();
    let threshold = config.threshold();
    let pipeline = BenchPipeline::new(LocalStorage::default(), config);

    // Ctrl-C：停止評分，仍輸出部分報表
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⏹️ Interrupt received, finishing with a partial report");
            cancel.cancel();
        }
    });

    let engine = BenchEngine::new(pipeline);

    if cli.dry_run {
        return match engine.dry_run().await {
            Ok(counts) => {
                for (category, count) in &counts {
                    println!("{:<16} {:>6}", category.as_str(), count);
                }
                println!("✅ Corpus {} is valid ({} fragments)", corpus, counts.values().sum::<usize>());
                0
            }
            Err(e) => exit_on_error(&e),
        };
    }

    match engine.run().await {
        Ok(run) => {
            match cli.format {
                OutputFormat::Text => print!("{}", report::render_text(&run.report, threshold)),
                OutputFormat::Json => match ReportDocument::new(&run.report, &corpus, threshold, run.elapsed).to_json() {
                    Ok(json) => println!("{}", json),
                    Err(e) => return exit_on_error(&e),
                },
            }

            if report::passed(&run.report, threshold) {
                tracing::info!("✅ Accuracy {:.1}% meets threshold {:.1}%", run.report.accuracy(), threshold);
                0
            } else {
                tracing::warn!("📉 Accuracy {:.1}% below threshold {:.1}%", run.report.accuracy(), threshold);
                1
            }
        }
        Err(e) => exit_on_error(&e),
    }
}

fn exit_on_error(e: &BenchError) -> i32 {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Benchmark failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    e.severity().exit_code()
}
