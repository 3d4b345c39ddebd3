//! DICOM数据解析器
//!
//! 基于 dicom-rs 读取单个DICOM文件和DICOMDIR，提取分组所需的元数据。

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject, InMemDicomObject};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::reader::{
    Container, ExtractError, ImageAttributes, IndexedInstance, MetadataReader, StructuredIndex,
};

/// Media Storage Directory Storage (DICOMDIR)
const MEDIA_STORAGE_DIRECTORY_SOP_CLASS_UID: &str = "1.2.840.10008.1.3.10";

/// 文件前导区长度
const PREAMBLE_LEN: usize = 128;

const DICM_MAGIC: &[u8; 4] = b"DICM";

/// DICOM数据解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomParser;

impl DicomParser {
    /// 创建新的DICOM解析器
    pub fn new() -> Self {
        Self
    }

    /// 解析DICOM文件
    pub fn parse_file(file_path: &Path) -> Result<Container, ExtractError> {
        match Self::has_dicom_magic(file_path) {
            Ok(true) => {}
            Ok(false) => return Err(ExtractError::NotAContainer),
            Err(e) => {
                return Err(ExtractError::Structural(format!("无法打开文件: {}", e)));
            }
        }

        let obj = open_file(file_path).map_err(|e| {
            warn!("DICOM文件解析失败: {:?}, 错误: {}", file_path, e);
            ExtractError::Structural(e.to_string())
        })?;

        if Self::is_dicomdir(&obj) {
            match Self::extract_index(file_path, &obj) {
                Some(index) => {
                    debug!("发现DICOMDIR: {:?}, 成员数: {}", file_path, index.len());
                    return Ok(Container::Index(index));
                }
                None => debug!("DICOMDIR缺少目录记录序列: {:?}", file_path),
            }
        }

        if obj.element(tags::PIXEL_DATA).is_ok() {
            Ok(Container::Image(Self::extract_attributes(&obj)))
        } else {
            debug!("DICOM文件不含像素数据: {:?}", file_path);
            Ok(Container::Other)
        }
    }

    /// 检查前导区之后的 `DICM` 标识；文件过短视为非DICOM
    fn has_dicom_magic(file_path: &Path) -> io::Result<bool> {
        let mut header = [0u8; PREAMBLE_LEN + 4];
        let mut file = File::open(file_path)?;
        match file.read_exact(&mut header) {
            Ok(()) => Ok(&header[PREAMBLE_LEN..] == DICM_MAGIC),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_dicomdir(obj: &DefaultDicomObject) -> bool {
        let sop_class = obj
            .meta()
            .media_storage_sop_class_uid
            .trim_end_matches(['\0', ' ']);
        sop_class == MEDIA_STORAGE_DIRECTORY_SOP_CLASS_UID
    }

    /// 提取单个影像的分组属性
    fn extract_attributes(obj: &InMemDicomObject) -> ImageAttributes {
        ImageAttributes {
            patient_id: Self::get_string_element(obj, tags::PATIENT_ID),
            study_date: Self::get_string_element(obj, tags::STUDY_DATE),
            study_time: Self::get_string_element(obj, tags::STUDY_TIME),
            study_description: Self::get_string_element(obj, tags::STUDY_DESCRIPTION),
            series_number: Self::get_string_element(obj, tags::SERIES_NUMBER),
            modality: Self::get_string_element(obj, tags::MODALITY),
            instance_number: Self::get_string_element(obj, tags::INSTANCE_NUMBER),
        }
    }

    /// 按文件顺序遍历目录记录序列
    ///
    /// PATIENT / STUDY / SERIES 记录更新当前层级，带 Referenced File ID 的记录成为成员，
    /// 路径相对于DICOMDIR所在目录。
    fn extract_index(file_path: &Path, obj: &DefaultDicomObject) -> Option<StructuredIndex> {
        let records = obj.element(tags::DIRECTORY_RECORD_SEQUENCE).ok()?.items()?;
        let base = file_path.parent().unwrap_or_else(|| Path::new(""));

        let mut current = IndexedInstance::default();
        let mut members = Vec::new();
        let mut seen_patient = false;
        let mut orphans = 0usize;

        for record in records {
            let get = |tag| Self::get_string_element(record, tag).unwrap_or_default();

            match get(tags::DIRECTORY_RECORD_TYPE).as_str() {
                "PATIENT" => {
                    seen_patient = true;
                    current = IndexedInstance {
                        patient_id: get(tags::PATIENT_ID),
                        ..Default::default()
                    };
                }
                "STUDY" => {
                    current.study_date = get(tags::STUDY_DATE);
                    current.study_time = get(tags::STUDY_TIME);
                    current.study_description = get(tags::STUDY_DESCRIPTION);
                    current.series_number.clear();
                    current.modality.clear();
                }
                "SERIES" => {
                    current.series_number = get(tags::SERIES_NUMBER);
                    current.modality = get(tags::MODALITY);
                }
                _ => {
                    let Some(file_id) = Self::get_string_element(record, tags::REFERENCED_FILE_ID)
                    else {
                        continue;
                    };
                    if !seen_patient {
                        orphans += 1;
                    }
                    members.push(IndexedInstance {
                        path: Self::resolve_file_id(base, &file_id),
                        instance_number: get(tags::INSTANCE_NUMBER),
                        ..current.clone()
                    });
                }
            }
        }

        if orphans > 0 {
            warn!(
                "DICOMDIR中有 {} 条成员记录出现在患者记录之前，患者ID记为空: {:?}",
                orphans, file_path
            );
        }

        Some(StructuredIndex::new(file_path, members))
    }

    /// Referenced File ID 的各分量以 `\` 分隔
    fn resolve_file_id(base: &Path, file_id: &str) -> PathBuf {
        file_id
            .split('\\')
            .map(str::trim)
            .filter(|component| !component.is_empty())
            .fold(base.to_path_buf(), |path, component| path.join(component))
    }

    /// 获取字符串类型元素的值，去掉填充字符
    fn get_string_element(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
        let element = obj.element(tag).ok()?;
        match element.to_str() {
            Ok(value) => Some(value.trim_matches(['\0', ' ']).to_string()),
            Err(e) => {
                debug!("标签 {:?} 无法转换为字符串: {}", tag, e);
                None
            }
        }
    }
}

impl MetadataReader for DicomParser {
    fn read(&self, path: &Path) -> Result<Container, ExtractError> {
        Self::parse_file(path)
    }
}
