use crate::core::Pipeline;
use crate::domain::model::{DefectCategory, Fragment, ScoreReport};
use crate::utils::error::Result;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// 一次完整執行的產出
#[derive(Debug, Clone)]
pub struct BenchRun {
    pub report: ScoreReport,
    pub written: Vec<String>,
    /// 評分階段耗時
    pub elapsed: Duration,
}

pub struct BenchEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> BenchEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<BenchRun> {
        tracing::info!("🚀 Starting benchmark run");

        // Extract
        tracing::info!("📥 Loading corpus...");
        let fragments = self.pipeline.extract().await?;
        tracing::info!("📦 Loaded {} fragments", fragments.len());

        // Score
        tracing::info!("🧪 Classifying fragments...");
        let started = Instant::now();
        let report = self.pipeline.score(fragments).await?;
        let elapsed = started.elapsed();
        tracing::info!(
            "📊 Scored {} fragments in {:?}: {} correct ({:.1}%), {} unknown",
            report.total(),
            elapsed,
            report.correct(),
            report.accuracy(),
            report.unknown()
        );

        // Report
        let written = self.pipeline.report(&report, elapsed).await?;
        for path in &written {
            tracing::info!("📁 Report saved to: {}", path);
        }

        Ok(BenchRun {
            report,
            written,
            elapsed,
        })
    }

    /// `--dry-run`：只載入語料，回報每個類別的數量
    pub async fn dry_run(&self) -> Result<BTreeMap<DefectCategory, usize>> {
        tracing::info!("🧪 Dry run: loading corpus only");
        let fragments: Vec<Fragment> = self.pipeline.extract().await?;

        let mut counts = BTreeMap::new();
        for fragment in &fragments {
            *counts.entry(fragment.category()).or_insert(0) += 1;
        }
        tracing::info!("📦 Corpus holds {} fragments in {} categories", fragments.len(), counts.len());
        Ok(counts)
    }
}
