use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::codec::index_key;
use super::gateway::{Failure, Gateway};
use super::schema::{Collection, PersonRow, ThumbnailRow};
use crate::error::{BlockedOn, CatalogError};
use crate::metrics;
use crate::model::{IngestRecord, PersonSet, Record, Thumbnail};

/// 一次 put 的结果，三行分别提交，可能部分成功
#[derive(Debug)]
pub struct PutOutcome {
    pub key: String,
    pub failures: Vec<(Collection, CatalogError)>,
}

impl PutOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// 部分失败时转换为 [`CatalogError::Write`]，由调用方决定是否重试
    pub fn into_result(self) -> Result<(), CatalogError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let failed = self.failures.into_iter().map(|(c, _)| c).collect();
        Err(CatalogError::Write { key: self.key, failed })
    }

    pub(crate) fn not_open(key: String) -> Self {
        let failures = [Collection::Images, Collection::Thumbnails, Collection::Persons]
            .into_iter()
            .map(|c| (c, CatalogError::NotOpen))
            .collect();
        Self { key, failures }
    }
}

/// 把一条记录拆成三行，分别用独立的事务写入
pub async fn put(gw: &Gateway, cancel: &CancellationToken, ingest: IngestRecord) -> PutOutcome {
    let (record, thumbnail, person) = ingest.split();
    let key = record.key.clone();

    let (r1, r2, r3) = tokio::join!(
        put_record(gw, cancel, record),
        put_thumbnail(gw, cancel, key.clone(), thumbnail),
        put_person(gw, cancel, key.clone(), person),
    );

    let mut failures = vec![];
    for (collection, result) in
        [(Collection::Images, r1), (Collection::Thumbnails, r2), (Collection::Persons, r3)]
    {
        match result {
            Ok(()) => metrics::inc_put(collection, true),
            Err(failure) => {
                metrics::inc_put(collection, false);
                let err = failure.into_error(BlockedOn::Write);
                warn!("写入 {} 失败: {}: {}", collection.name(), key, err);
                failures.push((collection, err));
            }
        }
    }

    if failures.is_empty() {
        debug!("写入记录: {}", key);
    }
    PutOutcome { key, failures }
}

/// 写入主记录，同一事务内替换旧的索引项
pub async fn put_record(
    gw: &Gateway,
    cancel: &CancellationToken,
    record: Record,
) -> Result<(), Failure> {
    gw.write(cancel, move |wtxn, c| {
        if let Some(old) = c.images.get(wtxn, &record.key)? {
            c.by_date.delete(wtxn, &index_key(old.timestamp, &old.key))?;
            c.by_size.delete(wtxn, &index_key(old.size, &old.key))?;
        }
        c.images.put(wtxn, &record.key, &record)?;
        c.by_date.put(wtxn, &index_key(record.timestamp, &record.key), &())?;
        c.by_size.put(wtxn, &index_key(record.size, &record.key), &())?;
        Ok(())
    })
    .await
}

pub async fn put_thumbnail(
    gw: &Gateway,
    cancel: &CancellationToken,
    name: String,
    thumbnail: Option<Thumbnail>,
) -> Result<(), Failure> {
    gw.write(cancel, move |wtxn, c| {
        c.thumbnails.put(wtxn, &name, &ThumbnailRow { name: name.clone(), thumbnail })?;
        Ok(())
    })
    .await
}

pub async fn put_person(
    gw: &Gateway,
    cancel: &CancellationToken,
    name: String,
    person: PersonSet,
) -> Result<(), Failure> {
    gw.write(cancel, move |wtxn, c| {
        c.persons.put(wtxn, &name, &PersonRow { name: name.clone(), person })?;
        Ok(())
    })
    .await
}
