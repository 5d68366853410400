use clap::ValueEnum;
use heed::types::DecodeIgnore;
use heed::{RoTxn, WithTls};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::codec::primary_key;
use super::gateway::{Emitter, Failure, Gateway, Scan};
use super::schema::{Collections, IndexName};
use crate::model::{Record, TagFilter};

/// 扫描时通道中最多缓存的记录数
const SCAN_BUFFER: usize = 64;

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// 查询参数
///
/// `start` 和 `end` 是按索引顺序数到的第几行（从 1 开始，两端都包含），
/// 只有在用户根目录下的记录才会被计数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub index: IndexName,
    pub direction: Direction,
    pub start: usize,
    pub end: usize,
    pub tag: Option<TagFilter>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            index: IndexName::Date,
            direction: Direction::Ascending,
            start: 1,
            end: usize::MAX,
            tag: None,
        }
    }
}

impl QueryParams {
    pub fn new(index: IndexName, direction: Direction) -> Self {
        Self { index, direction, ..Default::default() }
    }

    pub fn range(mut self, start: usize, end: usize) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn tag(mut self, tag: TagFilter) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// 扫描统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// 游标经过的行数
    pub visited: usize,
    /// 计入分页的行数
    pub counted: usize,
    /// 返回的行数
    pub matched: usize,
}

/// 按索引顺序扫描记录
pub fn scan(
    gw: &Gateway,
    cancel: &CancellationToken,
    params: QueryParams,
    root: String,
) -> Scan<Record, ScanSummary> {
    gw.scan(cancel, SCAN_BUFFER, move |rtxn, c, emitter| walk(rtxn, c, &params, &root, emitter))
}

fn walk(
    rtxn: &RoTxn<WithTls>,
    c: &Collections,
    params: &QueryParams,
    root: &str,
    emitter: &mut Emitter<Record>,
) -> Result<ScanSummary, Failure> {
    let mut summary = ScanSummary::default();
    if params.end < params.start {
        return Ok(summary);
    }

    for key in keys(rtxn, c, params)? {
        emitter.check()?;
        let key = key?;
        summary.visited += 1;

        if !key.starts_with(root) {
            continue;
        }
        summary.counted += 1;

        if summary.counted >= params.start {
            match c.images.get(rtxn, &key)? {
                Some(record) => {
                    if params.tag.as_ref().is_none_or(|tag| record.has_tag(tag)) {
                        emitter.emit(record)?;
                        summary.matched += 1;
                    }
                }
                None => warn!("索引项指向不存在的记录: {}", key),
            }
        }

        if summary.counted >= params.end {
            break;
        }
    }

    Ok(summary)
}

type KeyIter<'t> = Box<dyn Iterator<Item = heed::Result<String>> + 't>;

/// 按索引顺序返回主键，不解码记录本身
fn keys<'t>(
    rtxn: &'t RoTxn<WithTls>,
    c: &Collections,
    params: &QueryParams,
) -> heed::Result<KeyIter<'t>> {
    let ascending = params.direction == Direction::Ascending;
    let iter: KeyIter<'t> = match c.index_tree(params.index) {
        None => {
            let db = c.images.remap_data_type::<DecodeIgnore>();
            let to_key = |item: heed::Result<(&str, ())>| item.map(|(k, _)| k.to_owned());
            if ascending {
                Box::new(db.iter(rtxn)?.map(to_key))
            } else {
                Box::new(db.rev_iter(rtxn)?.map(to_key))
            }
        }
        Some(tree) => {
            let to_key = |item: heed::Result<(&[u8], ())>| {
                item.map(|(k, _)| primary_key(k).unwrap_or_default().to_owned())
            };
            if ascending {
                Box::new(tree.iter(rtxn)?.map(to_key))
            } else {
                Box::new(tree.rev_iter(rtxn)?.map(to_key))
            }
        }
    };
    Ok(iter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = QueryParams::default();
        assert_eq!(params.index, IndexName::Date);
        assert_eq!(params.direction, Direction::Ascending);
        assert_eq!((params.start, params.end), (1, usize::MAX));
        assert!(params.tag.is_none());
    }

    #[test]
    fn test_params_builder() {
        let params = QueryParams::new(IndexName::Size, Direction::Descending)
            .range(11, 20)
            .tag(TagFilter::new("category", "cat"));
        assert_eq!(params.index, IndexName::Size);
        assert_eq!((params.start, params.end), (11, 20));
        assert_eq!(params.tag, Some(TagFilter::new("category", "cat")));
    }
}
