//! 病例树
//!
//! 从 [`Catalog`] 生成可过滤、可逐级排除的病例树快照，用于浏览和导入选择。

use catalog_core::utils::or_not_available;
use catalog_core::Catalog;
use serde::Serialize;
use std::fmt;

/// 扁平的病例记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Case {
    pub patient_id: String,
    pub study_date: String,
    pub study_time: String,
    pub study_description: String,
    pub series_number: String,
    pub modality: String,
    pub path: String,
    pub instance_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageNode {
    pub path: String,
    pub number: String,
    /// 过滤后可见为 1，否则为 0
    pub visible_count: usize,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesNode {
    pub number: String,
    pub modality: String,
    pub images: Vec<ImageNode>,
    /// 过滤后可见的影像数
    pub visible_count: usize,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyNode {
    pub date: String,
    pub time: String,
    pub description: String,
    pub series: Vec<SeriesNode>,
    pub visible_count: usize,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientNode {
    pub id: String,
    pub studies: Vec<StudyNode>,
    pub visible_count: usize,
    pub active: bool,
}

/// 文本过滤器
///
/// 逗号分隔多个词，`-` 开头的词为排除词；不区分大小写的子串匹配。
/// 各词按书写顺序依次判断，第一个命中的词决定结果：命中排除词不通过，命中包含词通过。
/// 都未命中时，只有不含包含词的过滤器才通过。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFilter {
    terms: Vec<FilterTerm>,
    include_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterTerm {
    text: String,
    exclude: bool,
}

impl TextFilter {
    pub fn new(expression: &str) -> Self {
        let mut filter = Self::default();
        for term in expression.split(',').map(str::trim) {
            let (text, exclude) = match term.strip_prefix('-') {
                Some(excluded) => (excluded.trim(), true),
                None => (term, false),
            };
            if text.is_empty() {
                continue;
            }
            if !exclude {
                filter.include_count += 1;
            }
            filter.terms.push(FilterTerm {
                text: text.to_lowercase(),
                exclude,
            });
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn passes(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.terms
            .iter()
            .find(|term| text.contains(term.text.as_str()))
            .map_or(self.include_count == 0, |term| !term.exclude)
    }
}

/// 病例树
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CaseTree {
    pub patients: Vec<PatientNode>,
}

impl CaseTree {
    /// 患者按复合排序，其余各级保持插入顺序；初始时全部可见、全部启用
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let patients = catalog
            .list_patients()
            .into_iter()
            .map(|(id, studies)| PatientNode {
                id: id.to_string(),
                studies: studies
                    .iter()
                    .map(|(study, series_map)| StudyNode {
                        date: study.date.clone(),
                        time: study.time.clone(),
                        description: study.description.clone(),
                        series: series_map
                            .iter()
                            .map(|(series, images)| SeriesNode {
                                number: series.number.clone(),
                                modality: series.modality.clone(),
                                images: images
                                    .iter()
                                    .map(|image| ImageNode {
                                        path: image.path.clone(),
                                        number: image.instance_number.clone(),
                                        visible_count: 0,
                                        active: true,
                                    })
                                    .collect(),
                                visible_count: 0,
                                active: true,
                            })
                            .collect(),
                        visible_count: 0,
                        active: true,
                    })
                    .collect(),
                visible_count: 0,
                active: true,
            })
            .collect();

        let mut tree = Self { patients };
        tree.apply_filters(
            &TextFilter::default(),
            &TextFilter::default(),
            &TextFilter::default(),
        );
        tree
    }

    /// 按患者ID、检查描述、序列模态过滤，重新计算各节点的可见影像数
    pub fn apply_filters(&mut self, case: &TextFilter, study: &TextFilter, series: &TextFilter) {
        for patient in &mut self.patients {
            let patient_passes = case.passes(&patient.id);
            for study_node in &mut patient.studies {
                let study_passes = patient_passes && study.passes(&study_node.description);
                for series_node in &mut study_node.series {
                    let visible = study_passes && series.passes(&series_node.modality);
                    for image in &mut series_node.images {
                        image.visible_count = usize::from(visible);
                    }
                    series_node.visible_count = if visible { series_node.images.len() } else { 0 };
                }
                study_node.visible_count =
                    study_node.series.iter().map(|s| s.visible_count).sum();
            }
            patient.visible_count = patient.studies.iter().map(|s| s.visible_count).sum();
        }
    }

    /// 可见影像数
    pub fn visible_count(&self) -> usize {
        self.patients.iter().map(|p| p.visible_count).sum()
    }

    /// 展开为可见且整条路径都启用的病例
    pub fn selected_cases(&self) -> Vec<Case> {
        let mut cases = Vec::new();
        for patient in self.patients.iter().filter(|p| p.active) {
            for study in patient.studies.iter().filter(|s| s.active) {
                for series in study.series.iter().filter(|s| s.active) {
                    for image in &series.images {
                        if !image.active || image.visible_count == 0 {
                            continue;
                        }
                        cases.push(Case {
                            patient_id: patient.id.clone(),
                            study_date: study.date.clone(),
                            study_time: study.time.clone(),
                            study_description: study.description.clone(),
                            series_number: series.number.clone(),
                            modality: series.modality.clone(),
                            path: image.path.clone(),
                            instance_number: image.number.clone(),
                        });
                    }
                }
            }
        }
        cases
    }
}

/// 只输出可见节点
impl fmt::Display for CaseTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        for patient in self.patients.iter().filter(|p| p.visible_count > 0) {
            lines.push(format!("PatientID: {}", or_not_available(&patient.id)));
            for study in patient.studies.iter().filter(|s| s.visible_count > 0) {
                lines.push(format!(
                    "  Study date: {} at {}, Study description: {}",
                    or_not_available(&study.date),
                    or_not_available(&study.time),
                    or_not_available(&study.description)
                ));
                for series in study.series.iter().filter(|s| s.visible_count > 0) {
                    lines.push(format!(
                        "    Series number: {}, Modality: {}",
                        or_not_available(&series.number),
                        or_not_available(&series.modality)
                    ));
                    for image in &series.images {
                        lines.push(format!("      Image number: {}", or_not_available(&image.number)));
                    }
                }
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}
