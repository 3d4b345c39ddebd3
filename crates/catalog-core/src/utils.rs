//! 通用工具函数

use std::collections::BTreeMap;

/// 空字段的显示占位符
pub const NOT_AVAILABLE: &str = "N.A.";

/// 空字符串显示为 `N.A.`
pub fn or_not_available(value: &str) -> &str {
    if value.is_empty() {
        NOT_AVAILABLE
    } else {
        value
    }
}

/// 数字前缀的排序键：去掉前导零后的数字串，按 (长度, 字典序) 比较即为数值大小比较，
/// 因此任意长度的数字前缀都不会溢出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NumericKey<'a> {
    len: usize,
    digits: &'a str,
}

fn numeric_key(id: &str) -> Option<NumericKey<'_>> {
    let run = id
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(id.len(), |(i, _)| i);

    if run == 0 {
        return None;
    }

    let digits = id[..run].trim_start_matches('0');
    Some(NumericKey {
        len: digits.len(),
        digits,
    })
}

/// 患者ID复合排序
///
/// 以数字开头的ID先按数字前缀的数值升序排列，数值相同时按字符串、再按原始位置排列；
/// 其余ID排在最后，按字符串、再按原始位置排列。例如 `"12_JaneDoe"` 排在
/// `"100_JohnSmith"` 之前。
///
/// 返回两个等长序列：原始位置的排列，以及排序后的ID。
pub fn composite_sort<I, S>(ids: I) -> (Vec<usize>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let ids: Vec<S> = ids.into_iter().collect();

    let mut numbers: BTreeMap<NumericKey<'_>, Vec<(&str, usize)>> = BTreeMap::new();
    let mut no_numbers: Vec<(&str, usize)> = Vec::new();

    for (index, id) in ids.iter().enumerate() {
        let id = id.as_ref();
        match numeric_key(id) {
            Some(key) => numbers.entry(key).or_default().push((id, index)),
            None => no_numbers.push((id, index)),
        }
    }

    no_numbers.sort_unstable();

    let ordered = numbers
        .into_values()
        .flat_map(|mut bucket| {
            bucket.sort_unstable();
            bucket
        })
        .chain(no_numbers);

    let mut positions = Vec::with_capacity(ids.len());
    let mut sorted = Vec::with_capacity(ids.len());
    for (id, index) in ordered {
        positions.push(index);
        sorted.push(id.to_string());
    }

    (positions, sorted)
}
