//! 二级索引的键编码
//!
//! 索引树的键为 `排序值(8 字节大端) + 主键`，LMDB 按字节序比较，
//! 因此编码后的顺序与数值顺序一致，相同排序值再按主键排序。

/// 可以编码为 8 字节有序表示的排序值
pub trait SortValue: Copy {
    fn to_sortable(self) -> [u8; 8];
}

impl SortValue for u64 {
    fn to_sortable(self) -> [u8; 8] {
        self.to_be_bytes()
    }
}

impl SortValue for f64 {
    /// 正数翻转符号位，负数翻转全部位
    fn to_sortable(self) -> [u8; 8] {
        // -0.0 与 0.0 视为相同
        let value = if self == 0. { 0. } else { self };
        let bits = value.to_bits();
        let bits = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
        bits.to_be_bytes()
    }
}

pub fn index_key<V: SortValue>(value: V, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + key.len());
    buf.extend_from_slice(&value.to_sortable());
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// 从索引键中取出主键
pub fn primary_key(index_key: &[u8]) -> Option<&str> {
    index_key.get(8..).and_then(|k| std::str::from_utf8(k).ok())
}
