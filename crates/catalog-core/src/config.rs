//! 扫描配置
//!
//! 依次叠加默认值、可选的配置文件和 `CATALOG_` 前缀的环境变量。

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{CatalogError, Result};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// 扫描配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// 扫描根目录
    pub root: String,
    /// 日志级别
    pub log_level: String,
    /// 输出格式
    pub output: OutputFormat,
    /// 患者ID过滤表达式
    pub case_filter: String,
    /// 检查描述过滤表达式
    pub study_filter: String,
    /// 序列模态过滤表达式
    pub series_filter: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            log_level: "info".to_string(),
            output: OutputFormat::Text,
            case_filter: String::new(),
            study_filter: String::new(),
            series_filter: String::new(),
        }
    }
}

impl ScanConfig {
    /// 加载配置，`config_path` 为空时只使用默认值和环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("root", defaults.root)?
            .set_default("log_level", defaults.log_level)?
            .set_default("output", "text")?
            .set_default("case_filter", defaults.case_filter)?
            .set_default("study_filter", defaults.study_filter)?
            .set_default("series_filter", defaults.series_filter)?;

        if let Some(path) = config_path {
            debug!("读取配置文件: {}", path);
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("CATALOG"))
            .build()?;

        let config: ScanConfig = settings.try_deserialize()?;
        info!("配置加载成功: root={:?}", config.root);
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.root.trim().is_empty() {
            return Err(CatalogError::Config("扫描根目录不能为空".to_string()));
        }
        Ok(())
    }
}
