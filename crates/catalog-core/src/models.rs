//! 影像目录数据模型
//!
//! 目录按 患者 → 检查 → 序列 → 实例 四级组织。三级映射都保持首次插入顺序，
//! 只有患者列表在输出时按复合排序重新排列。

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::utils::{composite_sort, or_not_available};

/// 影像实例（一个图像文件），创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub path: String,
    pub instance_number: String,
}

/// 检查键 (检查日期, 检查时间, 检查描述)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudyKey {
    pub date: String,
    pub time: String,
    pub description: String,
}

/// 序列键 (序列号, 模态)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub number: String,
    pub modality: String,
}

/// 保持插入顺序的映射
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, usize>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for OrderedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq, V: Eq> Eq for OrderedMap<K, V> {}

impl<K: Clone + Eq + Hash, V> OrderedMap<K, V> {
    /// 获取键对应的值，首次出现时插入默认值并追加到末尾
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let position = self.entries.len();
                self.index.insert(key.clone(), position);
                self.entries.push((key, V::default()));
                position
            }
        };
        &mut self.entries[position].1
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }
}

impl<K, V> OrderedMap<K, V> {
    /// 按插入顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(key, value)| (key, value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 一个序列中的实例，按插入顺序
pub type SeriesInstances = Vec<InstanceRecord>;
/// 一个检查中的序列
pub type StudySeries = OrderedMap<SeriesKey, SeriesInstances>;
/// 一个患者的检查
pub type PatientStudies = OrderedMap<StudyKey, StudySeries>;

/// 扫描目录下发现的全部影像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    root: PathBuf,
    patients: OrderedMap<String, PatientStudies>,
    instance_count: usize,
}

impl Catalog {
    /// 创建以扫描路径为根的空目录
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            patients: OrderedMap::default(),
            instance_count: 0,
        }
    }

    /// 添加一个影像实例，必要时创建患者、检查、序列各级；所有字段都转为字符串
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        path: impl ToString,
        patient_id: impl ToString,
        study_date: impl ToString,
        study_time: impl ToString,
        study_description: impl ToString,
        series_number: impl ToString,
        modality: impl ToString,
        instance_number: impl ToString,
    ) {
        let study_key = StudyKey {
            date: study_date.to_string(),
            time: study_time.to_string(),
            description: study_description.to_string(),
        };
        let series_key = SeriesKey {
            number: series_number.to_string(),
            modality: modality.to_string(),
        };
        let record = InstanceRecord {
            path: path.to_string(),
            instance_number: instance_number.to_string(),
        };

        trace!("添加影像实例: {}", record.path);

        self.patients
            .get_or_insert_default(patient_id.to_string())
            .get_or_insert_default(study_key)
            .get_or_insert_default(series_key)
            .push(record);
        self.instance_count += 1;
    }

    /// 扫描根路径
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 按复合排序返回患者ID及其检查
    pub fn list_patients(&self) -> Vec<(&str, &PatientStudies)> {
        let (positions, _) = composite_sort(self.patients.keys());
        let patients: Vec<_> = self.patients.iter().collect();
        positions
            .into_iter()
            .map(|position| {
                let (id, studies) = patients[position];
                (id.as_str(), studies)
            })
            .collect()
    }

    /// 按插入顺序遍历患者
    pub fn patients(&self) -> impl Iterator<Item = (&String, &PatientStudies)> {
        self.patients.iter()
    }

    pub fn patient(&self, patient_id: &str) -> Option<&PatientStudies> {
        self.patients.get(&patient_id.to_string())
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    /// 实例总数
    pub fn len(&self) -> usize {
        self.instance_count
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count == 0
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        for (patient_id, studies) in self.patients.iter() {
            lines.push(format!("PatientID: {}", or_not_available(patient_id)));
            for (study, series_map) in studies.iter() {
                lines.push(format!(
                    "  Study date: {} at {}, Study description: {}",
                    or_not_available(&study.date),
                    or_not_available(&study.time),
                    or_not_available(&study.description)
                ));
                for (series, images) in series_map.iter() {
                    lines.push(format!(
                        "    Series number: {}, Modality: {}",
                        or_not_available(&series.number),
                        or_not_available(&series.modality)
                    ));
                    for image in images {
                        lines.push(format!(
                            "      Image number: {}",
                            or_not_available(&image.instance_number)
                        ));
                    }
                }
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}
