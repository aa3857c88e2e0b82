use crate::domain::model::{DefectCategory, Fragment, ScoreReport};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 報表輸出設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSettings {
    pub output_dir: Option<String>,
    pub formats: Vec<String>,
    pub archive_filename: Option<String>,
}

pub trait ConfigProvider: Send + Sync {
    fn corpus_path(&self) -> &str;
    /// 空集合代表不過濾
    fn categories(&self) -> &[DefectCategory];
    fn threshold(&self) -> f64;
    fn disabled_rules(&self) -> &[DefectCategory];
    fn report_settings(&self) -> ReportSettings;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<Fragment>>;
    async fn score(&self, fragments: Vec<Fragment>) -> Result<ScoreReport>;
    /// `elapsed`：評分階段花費的時間，寫進報表的執行資訊
    async fn report(&self, report: &ScoreReport, elapsed: Duration) -> Result<Vec<String>>;
}
