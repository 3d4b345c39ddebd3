//! 元数据提取接口
//!
//! 发现流程只通过 [`MetadataReader`] 访问影像文件，具体格式解析由实现者负责。

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 元数据提取错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// 不是DICOM文件，静默跳过
    #[error("不是DICOM文件")]
    NotAContainer,

    /// 是DICOM文件但结构损坏
    #[error("DICOM结构错误: {0}")]
    Structural(String),
}

/// 读取单个文件的元数据
pub trait MetadataReader {
    fn read(&self, path: &Path) -> Result<Container, ExtractError>;
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    /// DICOMDIR 等目录级索引
    Index(StructuredIndex),
    /// 含像素数据的单个影像
    Image(ImageAttributes),
    /// 可解析但不含像素数据
    Other,
}

/// 可查询的属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    PatientId,
    StudyDate,
    StudyTime,
    StudyDescription,
    SeriesNumber,
    Modality,
    InstanceNumber,
}

/// 单个影像的分组属性，缺失的属性为 `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageAttributes {
    pub patient_id: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub study_description: Option<String>,
    pub series_number: Option<String>,
    pub modality: Option<String>,
    pub instance_number: Option<String>,
}

impl ImageAttributes {
    /// 获取属性值
    pub fn attribute(&self, attribute: Attribute) -> Option<&str> {
        let value = match attribute {
            Attribute::PatientId => &self.patient_id,
            Attribute::StudyDate => &self.study_date,
            Attribute::StudyTime => &self.study_time,
            Attribute::StudyDescription => &self.study_description,
            Attribute::SeriesNumber => &self.series_number,
            Attribute::Modality => &self.modality,
            Attribute::InstanceNumber => &self.instance_number,
        };
        value.as_deref()
    }

    /// 获取属性值，缺失时为空字符串
    pub fn attribute_or_empty(&self, attribute: Attribute) -> &str {
        self.attribute(attribute).unwrap_or_default()
    }
}

/// 索引中的一个成员实例
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedInstance {
    pub path: PathBuf,
    pub patient_id: String,
    pub study_date: String,
    pub study_time: String,
    pub study_description: String,
    pub series_number: String,
    pub modality: String,
    pub instance_number: String,
}

/// 目录级索引（DICOMDIR）及其引用的成员实例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredIndex {
    location: PathBuf,
    members: Vec<IndexedInstance>,
}

impl StructuredIndex {
    pub fn new(location: impl Into<PathBuf>, members: Vec<IndexedInstance>) -> Self {
        Self {
            location: location.into(),
            members,
        }
    }

    /// 索引文件路径
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexedInstance> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl IntoIterator for StructuredIndex {
    type Item = IndexedInstance;
    type IntoIter = std::vec::IntoIter<IndexedInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

impl<'a> IntoIterator for &'a StructuredIndex {
    type Item = &'a IndexedInstance;
    type IntoIter = std::slice::Iter<'a, IndexedInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}
