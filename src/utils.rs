use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::ProgressStyle;
use log::warn;
use serde_json::Value;
use walkdir::WalkDir;

use crate::model::IngestRecord;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// 读取 JSON 文件中的记录，文件内容可以是单个对象或数组
///
/// 无法解析的元素会被跳过。
pub fn read_records(path: &Path) -> Result<Vec<IngestRecord>> {
    let text = fs::read_to_string(path).with_context(|| format!("读取 {} 失败", path.display()))?;
    let value: Value =
        serde_json::from_str(&text).with_context(|| format!("解析 {} 失败", path.display()))?;

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items.into_iter().filter(|v| !v.is_null()) {
        match serde_json::from_value::<IngestRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!("跳过无效记录 ({}): {}", path.display(), e),
        }
    }
    Ok(records)
}

/// 收集路径下所有 `.json` 文件，路径本身是文件时直接返回
pub fn json_files(path: &Path) -> Vec<std::path::PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    files.sort();
    files
}
