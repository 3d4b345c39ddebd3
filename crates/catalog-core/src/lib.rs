//! # Catalog Core
//!
//! 影像目录的核心模块，提供目录数据结构、错误定义、扫描配置和复合排序工具。

pub mod config;
pub mod error;
pub mod models;
pub mod utils;

pub use crate::config::{OutputFormat, ScanConfig};
pub use error::{CatalogError, Result};
pub use models::*;
pub use utils::composite_sort;
