use clap::ValueEnum;
use heed::types::{Bytes, SerdeBincode, SerdeJson, Str, Unit};
use heed::{Database, Env, RwTxn, WithTls};
use log::info;
use serde::{Deserialize, Serialize};

use crate::model::{PersonSet, Record, Thumbnail};

/// 当前 schema 版本，修改库结构时递增
pub const SCHEMA_VERSION: u32 = 1;

/// 预留给将来新增的索引
pub const MAX_DBS: u32 = 8;

const VERSION_KEY: &str = "schema_version";

/// 三个逻辑集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Images,
    Thumbnails,
    Persons,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Thumbnails => "thumbnails",
            Self::Persons => "persons",
        }
    }
}

/// 可用于排序扫描的索引
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexName {
    /// 主键，即图片路径
    Name,
    /// 拍摄时间
    #[default]
    Date,
    /// 像素数量
    Size,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Date => "date",
            Self::Size => "size",
        }
    }
}

/// 索引定义
#[derive(Debug)]
pub struct IndexDef {
    pub collection: Collection,
    pub name: &'static str,
    pub key_path: &'static str,
    pub unique: bool,
    /// 存放索引的子库，`None` 表示直接使用主键树
    pub tree: Option<&'static str>,
}

pub const INDEXES: &[IndexDef] = &[
    IndexDef {
        collection: Collection::Images,
        name: "name",
        key_path: "image",
        unique: true,
        tree: None,
    },
    IndexDef {
        collection: Collection::Images,
        name: "date",
        key_path: "timestamp",
        unique: false,
        tree: Some("images.date"),
    },
    IndexDef {
        collection: Collection::Images,
        name: "size",
        key_path: "pixels",
        unique: false,
        tree: Some("images.size"),
    },
    IndexDef {
        collection: Collection::Thumbnails,
        name: "name",
        key_path: "name",
        unique: true,
        tree: None,
    },
    IndexDef {
        collection: Collection::Persons,
        name: "name",
        key_path: "name",
        unique: true,
        tree: None,
    },
];

/// 缩略图集合中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailRow {
    pub name: String,
    pub thumbnail: Option<Thumbnail>,
}

/// 人物集合中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRow {
    pub name: String,
    pub person: PersonSet,
}

pub type IndexTree = Database<Bytes, Unit>;

/// 所有库的句柄，句柄本身只是编号，可以随意复制
#[derive(Clone, Copy)]
pub struct Collections {
    pub images: Database<Str, SerdeJson<Record>>,
    pub by_date: IndexTree,
    pub by_size: IndexTree,
    pub thumbnails: Database<Str, SerdeBincode<ThumbnailRow>>,
    pub persons: Database<Str, SerdeJson<PersonRow>>,
    pub meta: Database<Str, SerdeBincode<u32>>,
}

impl Collections {
    /// 返回索引对应的子库
    pub fn index_tree(&self, index: IndexName) -> Option<IndexTree> {
        match index {
            IndexName::Name => None,
            IndexName::Date => Some(self.by_date),
            IndexName::Size => Some(self.by_size),
        }
    }
}

/// 初始化 schema，可重复调用
///
/// `create_database` 对已存在的库只会打开它，因此只有版本号落后时才会真正建库。
pub fn initialize_schema(env: &Env<WithTls>) -> heed::Result<Collections> {
    let mut wtxn = env.write_txn()?;
    let meta = env.create_database::<Str, SerdeBincode<u32>>(&mut wtxn, Some("meta"))?;
    let version = meta.get(&wtxn, VERSION_KEY)?.unwrap_or(0);

    let collections = create_collections(env, &mut wtxn, meta)?;

    if version < SCHEMA_VERSION {
        info!("升级数据库结构: v{} -> v{}", version, SCHEMA_VERSION);
        for def in INDEXES {
            info!(
                "索引 {}.{} on {} (unique: {})",
                def.collection.name(),
                def.name,
                def.key_path,
                def.unique
            );
        }
        meta.put(&mut wtxn, VERSION_KEY, &SCHEMA_VERSION)?;
    }

    wtxn.commit()?;
    Ok(collections)
}

fn create_collections(
    env: &Env<WithTls>,
    wtxn: &mut RwTxn,
    meta: Database<Str, SerdeBincode<u32>>,
) -> heed::Result<Collections> {
    Ok(Collections {
        images: env.create_database(wtxn, Some(Collection::Images.name()))?,
        by_date: env.create_database(wtxn, Some("images.date"))?,
        by_size: env.create_database(wtxn, Some("images.size"))?,
        thumbnails: env.create_database(wtxn, Some(Collection::Thumbnails.name()))?,
        persons: env.create_database(wtxn, Some(Collection::Persons.name()))?,
        meta,
    })
}

/// 读取已保存的 schema 版本
pub fn schema_version(collections: &Collections, rtxn: &heed::RoTxn<WithTls>) -> heed::Result<u32> {
    Ok(collections.meta.get(rtxn, VERSION_KEY)?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use heed::EnvOpenOptions;
    use tempfile::tempdir;

    use super::*;

    fn open_env(path: &std::path::Path) -> Env<WithTls> {
        unsafe { EnvOpenOptions::new().map_size(1 << 24).max_dbs(MAX_DBS).open(path).unwrap() }
    }

    #[test]
    fn test_initialize_idempotent() {
        let temp_dir = tempdir().unwrap();
        let env = open_env(temp_dir.path());

        let collections = initialize_schema(&env).unwrap();
        {
            let mut wtxn = env.write_txn().unwrap();
            collections.by_date.put(&mut wtxn, b"key".as_slice(), &()).unwrap();
            wtxn.commit().unwrap();
        }

        // 再次初始化不能丢失数据
        let collections = initialize_schema(&env).unwrap();
        let rtxn = env.read_txn().unwrap();
        assert_eq!(collections.by_date.len(&rtxn).unwrap(), 1);
        assert_eq!(schema_version(&collections, &rtxn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_index_defs() {
        let images = INDEXES.iter().filter(|d| d.collection == Collection::Images).count();
        assert_eq!(images, 3);
        assert!(INDEXES.iter().filter(|d| d.tree.is_none()).all(|d| d.unique));
    }
}
