//! 错误定义模块

use std::path::PathBuf;
use thiserror::Error;

/// 影像目录统一错误类型
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("无法读取目录 {path:?}: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("目录遍历错误: {0}")]
    Walk(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl From<::config::ConfigError> for CatalogError {
    fn from(err: ::config::ConfigError) -> Self {
        CatalogError::Config(err.to_string())
    }
}

/// 影像目录统一结果类型
pub type Result<T> = std::result::Result<T, CatalogError>;
