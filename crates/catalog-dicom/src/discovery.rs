//! DICOM发现流程
//!
//! [`Discovery`] 每次推进一个目录：列出目录中的文件，逐个分类为 DICOMDIR 索引、
//! 单个影像或非影像文件，并写入 [`Catalog`]。
//!
//! 排除范围保证 DICOMDIR 引用的子目录不会被再次单独分类。读取结构损坏的文件时，
//! 所在目录同样成为排除范围，其子目录被跳过。

use catalog_core::{Catalog, CatalogError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::reader::{Attribute, Container, ExtractError, MetadataReader};

/// 单个目录的扫描结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryReport {
    /// 相对于扫描根目录的路径，根目录本身为空字符串
    pub directory: String,
    /// 目录中是否发现影像
    pub found_image: bool,
    /// 本目录的诊断信息，多条以换行分隔
    pub diagnostics: String,
}

/// 单步推进结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Progress(DirectoryReport),
    Exhausted,
}

/// 可逐步推进的DICOM发现流程
pub struct Discovery<R> {
    root: PathBuf,
    walker: Option<walkdir::IntoIter>,
    exclusion: Option<PathBuf>,
    unreadable: Option<PathBuf>,
    reader: R,
    catalog: Catalog,
}

impl<R: MetadataReader> Discovery<R> {
    /// 创建发现流程；根路径不是目录时，每一步都直接返回 [`Step::Exhausted`]
    pub fn new(root: impl AsRef<Path>, reader: R) -> Self {
        let root = root.as_ref().to_path_buf();
        let walker = if root.is_dir() {
            Some(WalkDir::new(&root).sort_by_file_name().into_iter())
        } else {
            warn!("扫描路径不是目录: {:?}", root);
            None
        };

        Self {
            catalog: Catalog::new(&root),
            root,
            walker,
            exclusion: None,
            unreadable: None,
            reader,
        }
    }

    /// 扫描根路径
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 当前已构建的目录
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 结束扫描并取出目录
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    /// 推进一个目录
    pub fn step(&mut self) -> Result<Step> {
        let excluded = self.exclusion.clone();
        let Some(mut directory) = self.next_directory(excluded.as_deref())? else {
            return Ok(Step::Exhausted);
        };

        if let Some(excluded) = excluded {
            while directory.starts_with(&excluded) {
                debug!("跳过已被索引覆盖的目录: {:?}", directory);
                match self.next_directory(Some(&excluded))? {
                    Some(next) => directory = next,
                    None => {
                        self.exclusion = None;
                        return Ok(Step::Exhausted);
                    }
                }
            }
            self.exclusion = None;
        }

        let files = match list_files(&directory) {
            Ok(files) => files,
            Err(e) => {
                error!("{}", e);
                self.unreadable = Some(directory);
                return Err(e);
            }
        };

        let mut found_image = false;
        let mut diagnostics = Vec::new();

        for file in files {
            match self.reader.read(&file) {
                Err(ExtractError::NotAContainer) => {
                    debug!("非DICOM文件: {:?}", file);
                }
                Err(ExtractError::Structural(reason)) => {
                    warn!("读取DICOM文件出错: {:?}: {}", file, reason);
                    diagnostics.push(format!("读取 {} 时出错: {}", file.display(), reason));
                    self.exclusion = Some(directory.clone());
                }
                Ok(Container::Index(index)) => {
                    info!("发现DICOMDIR: {:?}, 成员数: {}", file, index.len());
                    self.exclusion = Some(directory.clone());
                    for member in index {
                        self.catalog.add(
                            member.path.display(),
                            member.patient_id,
                            member.study_date,
                            member.study_time,
                            member.study_description,
                            member.series_number,
                            member.modality,
                            member.instance_number,
                        );
                    }
                    found_image = true;
                }
                Ok(Container::Image(attributes)) => {
                    // 没有实例号的影像不入目录，但目录仍记为发现影像
                    if let Some(instance_number) = attributes.attribute(Attribute::InstanceNumber) {
                        self.catalog.add(
                            file.display(),
                            attributes.attribute_or_empty(Attribute::PatientId),
                            attributes.attribute_or_empty(Attribute::StudyDate),
                            attributes.attribute_or_empty(Attribute::StudyTime),
                            attributes.attribute_or_empty(Attribute::StudyDescription),
                            attributes.attribute_or_empty(Attribute::SeriesNumber),
                            attributes.attribute_or_empty(Attribute::Modality),
                            instance_number,
                        );
                    } else {
                        debug!("影像缺少实例号，未加入目录: {:?}", file);
                    }
                    found_image = true;
                }
                Ok(Container::Other) => {
                    debug!("DICOM文件不含影像: {:?}", file);
                }
            }
        }

        let relative = directory
            .strip_prefix(&self.root)
            .unwrap_or(&directory)
            .display()
            .to_string();

        if found_image {
            info!("在 '{}' 中发现DICOM影像", relative);
        }

        Ok(Step::Progress(DirectoryReport {
            directory: relative,
            found_image,
            diagnostics: diagnostics.join("\n"),
        }))
    }

    /// 取下一个目录；已报告过的不可读目录和排除范围内的遍历错误都不报错
    fn next_directory(&mut self, excluded: Option<&Path>) -> Result<Option<PathBuf>> {
        let Some(walker) = self.walker.as_mut() else {
            return Ok(None);
        };

        for entry in walker.by_ref() {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => return Ok(Some(entry.into_path())),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf);
                    if path.is_some() && path == self.unreadable {
                        debug!("忽略已报告的不可读目录: {:?}", path);
                        continue;
                    }
                    if let (Some(path), Some(excluded)) = (&path, excluded) {
                        if path.starts_with(excluded) {
                            debug!("忽略排除范围内的遍历错误: {:?}: {}", path, e);
                            continue;
                        }
                    }
                    let message = e.to_string();
                    return Err(match (path, e.into_io_error()) {
                        (Some(path), Some(source)) => {
                            CatalogError::UnreadableDirectory { path, source }
                        }
                        _ => CatalogError::Walk(message),
                    });
                }
            }
        }

        Ok(None)
    }
}

impl<R: MetadataReader> Iterator for Discovery<R> {
    type Item = Result<DirectoryReport>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Step::Progress(report)) => Some(Ok(report)),
            Ok(Step::Exhausted) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// 列出目录中的非目录项，按文件名排序
fn list_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let unreadable = |source| CatalogError::UnreadableDirectory {
        path: directory.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(directory).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_dir() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ImageAttributes, IndexedInstance, StructuredIndex};
    use std::fs;

    /// 按文件内容分类的测试读取器
    ///
    /// - `IMAGE|patient|series|instance`，`-` 表示属性缺失
    /// - `INDEX|member;member;...`，成员为 `相对路径:patient:instance`
    /// - `BROKEN`：结构错误
    /// - `OTHER`：不含像素数据
    /// - 其它内容：非DICOM
    struct FakeReader;

    impl MetadataReader for FakeReader {
        fn read(&self, path: &Path) -> std::result::Result<Container, ExtractError> {
            let content = fs::read_to_string(path).map_err(|_| ExtractError::NotAContainer)?;
            let mut fields = content.trim().split('|');
            let optional = |value: Option<&str>| value.filter(|v| *v != "-").map(str::to_string);

            match fields.next() {
                Some("IMAGE") => Ok(Container::Image(ImageAttributes {
                    patient_id: optional(fields.next()),
                    series_number: optional(fields.next()),
                    instance_number: optional(fields.next()),
                    modality: Some("CT".to_string()),
                    ..Default::default()
                })),
                Some("INDEX") => {
                    let base = path.parent().unwrap();
                    let members = fields
                        .next()
                        .unwrap_or_default()
                        .split(';')
                        .map(|member| {
                            let parts: Vec<_> = member.split(':').collect();
                            IndexedInstance {
                                path: base.join(parts[0]),
                                patient_id: parts[1].to_string(),
                                series_number: "1".to_string(),
                                modality: "MR".to_string(),
                                instance_number: parts[2].to_string(),
                                ..Default::default()
                            }
                        })
                        .collect();
                    Ok(Container::Index(StructuredIndex::new(path, members)))
                }
                Some("BROKEN") => Err(ExtractError::Structural("garbled header".to_string())),
                Some("OTHER") => Ok(Container::Other),
                _ => Err(ExtractError::NotAContainer),
            }
        }
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn collect_reports(discovery: &mut Discovery<FakeReader>) -> Vec<DirectoryReport> {
        let mut reports = Vec::new();
        while let Step::Progress(report) = discovery.step().unwrap() {
            reports.push(report);
        }
        reports
    }

    #[test]
    fn test_invalid_file_reports_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad/broken.dcm", "BROKEN");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        let reports = collect_reports(&mut discovery);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].directory, "");
        assert_eq!(reports[1].directory, "bad");
        assert!(!reports[1].found_image);
        assert!(reports[1].diagnostics.contains("broken.dcm"));
        assert!(discovery.catalog().is_empty());
    }

    #[test]
    fn test_index_members_added_and_subdirectories_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "media/DICOMDIR",
            "INDEX|IMAGES/IM1:7:1;IMAGES/IM2:7:2;IMAGES/IM3:8:1",
        );
        // 已被索引覆盖，不应再单独分类
        write(dir.path(), "media/IMAGES/IM1", "IMAGE|7|1|1");
        write(dir.path(), "media/IMAGES/deep/IM9", "IMAGE|7|1|9");
        write(dir.path(), "other/loose.dcm", "IMAGE|9|4|1");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        let reports = collect_reports(&mut discovery);

        let directories: Vec<_> = reports.iter().map(|r| r.directory.as_str()).collect();
        assert_eq!(directories, vec!["", "media", "other"]);
        assert!(reports[1].found_image);
        assert!(reports[1].diagnostics.is_empty());

        let catalog = discovery.into_catalog();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.patient_count(), 3);

        let series = catalog.patient("7").unwrap().values().next().unwrap();
        let images = series.values().next().unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].path.ends_with("IM1"));
    }

    #[test]
    fn test_image_without_instance_number_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.dcm", "IMAGE|1|2|-");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        let reports = collect_reports(&mut discovery);

        assert_eq!(reports.len(), 1);
        assert!(reports[0].found_image);
        assert!(discovery.catalog().is_empty());
    }

    #[test]
    fn test_missing_attributes_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.dcm", "IMAGE|-|-|3");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        collect_reports(&mut discovery);

        let studies = discovery.catalog().patient("").unwrap();
        let (study, series_map) = studies.iter().next().unwrap();
        assert_eq!(study.date, "");
        let (series, images) = series_map.iter().next().unwrap();
        assert_eq!(series.number, "");
        assert_eq!(series.modality, "CT");
        assert_eq!(images[0].instance_number, "3");
    }

    #[test]
    fn test_non_images_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "hello");
        write(dir.path(), "report.dcm", "OTHER");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        let reports = collect_reports(&mut discovery);

        assert_eq!(
            reports,
            vec![DirectoryReport {
                directory: String::new(),
                found_image: false,
                diagnostics: String::new(),
            }]
        );
    }

    #[test]
    fn test_structural_error_excludes_subdirectories_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "scan/a_broken.dcm", "BROKEN");
        write(dir.path(), "scan/b_image.dcm", "IMAGE|1|1|1");
        write(dir.path(), "scan/nested/c_image.dcm", "IMAGE|1|1|2");
        write(dir.path(), "zzz/d_image.dcm", "IMAGE|2|1|1");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        let reports = collect_reports(&mut discovery);

        let directories: Vec<_> = reports.iter().map(|r| r.directory.as_str()).collect();
        assert_eq!(directories, vec!["", "scan", "zzz"]);
        assert!(reports[1].found_image);
        assert!(!reports[1].diagnostics.is_empty());
        assert_eq!(discovery.catalog().len(), 2);
    }

    #[test]
    fn test_missing_root_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut discovery = Discovery::new(dir.path().join("missing"), FakeReader);

        assert_eq!(discovery.step().unwrap(), Step::Exhausted);
        assert_eq!(discovery.step().unwrap(), Step::Exhausted);
        assert!(discovery.next().is_none());
    }

    #[test]
    fn test_file_root_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "single.dcm", "IMAGE|1|1|1");

        let mut discovery = Discovery::new(dir.path().join("single.dcm"), FakeReader);
        assert_eq!(discovery.step().unwrap(), Step::Exhausted);
    }

    #[test]
    fn test_iterator_yields_every_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/x.dcm", "IMAGE|1|1|1");
        write(dir.path(), "a/b/y.dcm", "IMAGE|1|1|2");
        write(dir.path(), "c/z.txt", "text");

        let reports: Vec<_> = Discovery::new(dir.path(), FakeReader)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let found: Vec<_> = reports
            .iter()
            .map(|r| (PathBuf::from(&r.directory), r.found_image))
            .collect();
        assert_eq!(
            found,
            vec![
                (PathBuf::from(""), false),
                (PathBuf::from("a"), true),
                (Path::new("a").join("b"), true),
                (PathBuf::from("c"), false),
            ]
        );
    }

    #[test]
    fn test_repeated_scans_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "media/DICOMDIR", "INDEX|IM1:3:1;IM2:3:2");
        write(dir.path(), "p1/a.dcm", "IMAGE|10|1|1");
        write(dir.path(), "p1/b.dcm", "IMAGE|10|1|2");
        write(dir.path(), "p2/c.dcm", "IMAGE|2|5|1");

        let scan = || {
            let mut discovery = Discovery::new(dir.path(), FakeReader);
            collect_reports(&mut discovery);
            discovery.into_catalog()
        };

        let first = scan();
        let second = scan();
        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn test_unreadable_directory_inside_index_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "media/DICOMDIR", "INDEX|sub/IM1:1:1");
        write(dir.path(), "media/sub/IM1", "IMAGE|1|1|1");
        write(dir.path(), "zzz/loose.dcm", "IMAGE|2|1|1");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        assert!(matches!(discovery.step().unwrap(), Step::Progress(r) if r.directory.is_empty()));
        assert!(matches!(discovery.step().unwrap(), Step::Progress(r) if r.directory == "media"));

        fs::remove_dir_all(dir.path().join("media").join("sub")).unwrap();

        match discovery.step().unwrap() {
            Step::Progress(report) => assert_eq!(report.directory, "zzz"),
            Step::Exhausted => panic!("expected zzz"),
        }
        assert_eq!(discovery.step().unwrap(), Step::Exhausted);
        assert_eq!(discovery.catalog().len(), 2);
    }

    #[test]
    fn test_step_reports_unreadable_directory_then_continues() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/x.dcm", "IMAGE|1|1|1");
        write(dir.path(), "b/y.dcm", "IMAGE|2|1|1");

        let mut discovery = Discovery::new(dir.path(), FakeReader);
        assert!(matches!(discovery.step().unwrap(), Step::Progress(r) if r.directory.is_empty()));

        fs::remove_dir_all(dir.path().join("a")).unwrap();

        assert!(matches!(
            discovery.step(),
            Err(CatalogError::UnreadableDirectory { .. })
        ));
        match discovery.step().unwrap() {
            Step::Progress(report) => {
                assert_eq!(report.directory, "b");
                assert!(report.found_image);
            }
            Step::Exhausted => panic!("expected b"),
        }
        assert_eq!(discovery.step().unwrap(), Step::Exhausted);
        assert_eq!(discovery.catalog().len(), 1);
    }

    #[test]
    fn test_unlistable_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "plain.txt", "text");

        let result = list_files(&dir.path().join("plain.txt"));
        assert!(matches!(
            result,
            Err(CatalogError::UnreadableDirectory { .. })
        ));
    }
}
