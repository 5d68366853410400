mod codec;
mod gateway;
mod query;
mod schema;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use futures::{StreamExt, stream};
use heed::types::DecodeIgnore;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub use self::gateway::EngineOptions;
pub use self::gateway::Scan;
use self::gateway::{Connection, Failure, Gateway};
pub use self::query::{Direction, QueryParams, ScanSummary};
pub use self::schema::{Collection, INDEXES, IndexDef, IndexName, SCHEMA_VERSION};
use self::schema::{PersonRow, ThumbnailRow};
pub use self::writer::PutOutcome;
use crate::error::{BlockedOn, CatalogError, Result};
use crate::metrics;
use crate::model::{IngestRecord, PersonSet, Record, Thumbnail};
use crate::router::{Mode, Session, SessionContext, ShareClient};

/// 记录数量，共享模式下不做分页，返回无上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Exact(u64),
    Unbounded,
}

/// 一致性修复的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub restored_thumbnails: usize,
    pub restored_persons: usize,
    pub removed_orphans: usize,
}

/// 打开失败时的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, backoff: Duration::from_millis(50) }
    }
}

pub struct CatalogBuilder {
    path: PathBuf,
    engine: EngineOptions,
    retry: RetryPolicy,
    session: Arc<dyn SessionContext>,
    share_url: Option<String>,
}

impl CatalogBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            engine: EngineOptions::default(),
            retry: RetryPolicy::default(),
            session: Arc::new(Session::default()),
            share_url: None,
        }
    }

    pub fn map_size(mut self, map_size: usize) -> Self {
        self.engine.map_size = map_size;
        self
    }

    pub fn blocked_timeout(mut self, timeout: Duration) -> Self {
        self.engine.blocked_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionContext>) -> Self {
        self.session = session;
        self
    }

    pub fn share_url(mut self, url: impl Into<String>) -> Self {
        self.share_url = Some(url.into());
        self
    }

    /// 只创建实例，不打开存储
    pub fn build(self) -> Catalog {
        Catalog {
            path: self.path,
            engine: self.engine,
            retry: self.retry,
            conn: RwLock::new(None),
            writer: Arc::new(Mutex::new(())),
            session: self.session,
            share: ShareClient::new(self.share_url),
            last: StdMutex::new(QueryParams::default()),
        }
    }

    /// 创建实例并打开存储
    pub async fn open(self) -> Result<Catalog> {
        let catalog = self.build();
        catalog.open().await?;
        Ok(catalog)
    }
}

/// 图片目录存储
pub struct Catalog {
    path: PathBuf,
    engine: EngineOptions,
    retry: RetryPolicy,
    conn: RwLock<Option<Connection>>,
    /// 写事务排队用，跨越 reset 保持不变
    writer: Arc<Mutex<()>>,
    session: Arc<dyn SessionContext>,
    share: ShareClient,
    last: StdMutex<QueryParams>,
}

impl Catalog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &Arc<dyn SessionContext> {
        &self.session
    }

    pub fn mode(&self) -> Mode {
        Mode::resolve(self.session.as_ref())
    }

    pub async fn is_open(&self) -> bool {
        self.conn.read().await.is_some()
    }

    /// 打开存储，共享模式下直接跳过
    ///
    /// 被其他连接阻塞时按指数退避重试，仍然失败则返回 `Blocked(Open)`。
    pub async fn open(&self) -> Result<()> {
        if let Mode::Shared(token) = self.mode() {
            debug!("共享模式 {}，跳过打开本地存储", token);
            return Ok(());
        }

        let mut conn = self.conn.write().await;
        if conn.is_some() {
            return Ok(());
        }

        let start = Instant::now();
        *conn = Some(self.connect().await?);
        debug!("打开存储耗时: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
        Ok(())
    }

    /// 与 [`Catalog::open`] 相同，但只返回是否成功
    pub async fn try_open(&self) -> bool {
        match self.open().await {
            Ok(()) => true,
            Err(e) => {
                error!("打开存储失败: {}", e);
                false
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let mut backoff = self.retry.backoff;
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match gateway::open(&self.path, &self.engine).await {
                Ok(conn) => return Ok(conn),
                Err(Failure::Blocked) if attempt < attempts => {
                    warn!("存储被占用，{}ms 后重试 ({}/{})", backoff.as_millis(), attempt, attempts);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(Failure::Blocked) => break,
                Err(Failure::Engine(source)) => {
                    return Err(CatalogError::Open { path: self.path.clone(), source });
                }
                Err(failure) => return Err(failure.into_error(BlockedOn::Open)),
            }
        }
        Err(CatalogError::Blocked(BlockedOn::Open))
    }

    /// 删除并重建整个存储，不可恢复
    pub async fn reset(&self) -> Result<()> {
        let mut conn = self.conn.write().await;
        info!("重置存储: {}", self.path.display());
        gateway::delete_database(conn.take(), self.path.clone(), self.engine.blocked_timeout)
            .await
            .map_err(|f| f.into_error(BlockedOn::Reset))?;
        *conn = Some(self.connect().await?);
        Ok(())
    }

    async fn gateway(&self) -> Result<Gateway> {
        let conn = self.conn.read().await;
        let conn = conn.as_ref().ok_or(CatalogError::NotOpen)?;
        Ok(Gateway::new(conn.clone(), self.writer.clone(), self.engine.blocked_timeout))
    }

    /// 写入一条记录（记录、缩略图、人物三行分别提交）
    pub async fn put(&self, record: IngestRecord) -> PutOutcome {
        self.put_with(record, &CancellationToken::new()).await
    }

    pub async fn put_with(&self, record: IngestRecord, cancel: &CancellationToken) -> PutOutcome {
        match self.gateway().await {
            Ok(gw) => writer::put(&gw, cancel, record).await,
            Err(_) => PutOutcome::not_open(record.key),
        }
    }

    /// 依次写入多条记录
    pub async fn store_many(&self, records: Vec<IngestRecord>) -> Vec<PutOutcome> {
        stream::iter(records).then(|record| self.put(record)).collect().await
    }

    pub async fn thumbnail(&self, key: &str) -> Result<Option<Thumbnail>> {
        self.thumbnail_with(key, &CancellationToken::new()).await
    }

    /// 读取缩略图，记录存在但缩略图行缺失时补上一个空行
    pub async fn thumbnail_with(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Thumbnail>> {
        let gw = self.gateway().await?;
        let name = key.to_owned();
        let (row, has_record) = gw
            .read(cancel, move |rtxn, c| {
                let row = c.thumbnails.get(rtxn, &name)?;
                let has_record = row.is_none() && c.images.get(rtxn, &name)?.is_some();
                Ok((row, has_record))
            })
            .await?;

        if has_record {
            warn!("缩略图缺失，补写空行: {}", key);
            writer::put_thumbnail(&gw, cancel, key.to_owned(), None).await?;
        }
        Ok(row.and_then(|row| row.thumbnail))
    }

    pub async fn person_set(&self, key: &str) -> Result<Option<PersonSet>> {
        self.person_set_with(key, &CancellationToken::new()).await
    }

    /// 读取人物信息，记录存在但人物行缺失时补上一个空行
    pub async fn person_set_with(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PersonSet>> {
        let gw = self.gateway().await?;
        let name = key.to_owned();
        let (row, has_record) = gw
            .read(cancel, move |rtxn, c| {
                let row = c.persons.get(rtxn, &name)?;
                let has_record = row.is_none() && c.images.get(rtxn, &name)?.is_some();
                Ok((row, has_record))
            })
            .await?;

        if has_record {
            warn!("人物信息缺失，补写空行: {}", key);
            writer::put_person(&gw, cancel, key.to_owned(), PersonSet::default()).await?;
            return Ok(Some(PersonSet::default()));
        }
        Ok(row.map(|row| row.person))
    }

    /// 开始一次查询，结果逐条返回
    ///
    /// 本地模式下整个扫描使用同一个读事务（打开游标时的快照），
    /// 扫描期间提交的写入不会被看到，也不会读到写了一半的记录。
    pub async fn scan(&self, params: QueryParams, cancel: &CancellationToken) -> Result<RecordStream> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = params.clone();

        match self.mode() {
            Mode::Shared(token) => {
                let records = self.share.fetch(&token).await?;
                Ok(RecordStream::Remote(records.into_iter()))
            }
            Mode::Local => {
                let Some(root) = self.session.root() else {
                    debug!("未登录，返回空结果");
                    return Ok(RecordStream::Empty);
                };
                let gw = self.gateway().await?;
                Ok(RecordStream::Local(query::scan(&gw, cancel, params, root)))
            }
        }
    }

    /// 按索引顺序查询记录
    pub async fn query_all(&self, params: QueryParams) -> Result<Vec<Record>> {
        self.query_all_with(params, &CancellationToken::new()).await
    }

    pub async fn query_all_with(
        &self,
        params: QueryParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let start = Instant::now();
        let index = params.index;
        let mode = self.mode();
        let records = match self.scan(params.clone(), cancel).await? {
            RecordStream::Local(scan) => {
                let (records, summary) = scan.finish().await?;
                debug!(
                    "扫描 {} 行，计入分页 {} 行，返回 {} 行",
                    summary.visited, summary.counted, summary.matched
                );
                records
            }
            RecordStream::Remote(records) => records.collect(),
            RecordStream::Empty => vec![],
        };

        let elapsed = start.elapsed().as_secs_f32();
        debug!(
            "查询 {} {:?} {}..={}: {} 条，耗时 {:.2}ms",
            index.as_str(),
            params.direction,
            params.start,
            params.end,
            records.len(),
            elapsed * 1000.
        );
        metrics::observe_query(index, &mode, records.len(), elapsed);
        Ok(records)
    }

    /// 使用上一次的参数重新查询
    pub async fn refresh(&self) -> Result<Vec<Record>> {
        let params = self.last.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.query_all(params).await
    }

    pub fn last_query(&self) -> QueryParams {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn count(&self) -> Result<Count> {
        self.count_with(&CancellationToken::new()).await
    }

    pub async fn count_with(&self, cancel: &CancellationToken) -> Result<Count> {
        if let Mode::Shared(_) = self.mode() {
            return Ok(Count::Unbounded);
        }
        let gw = self.gateway().await?;
        let n = gw.read(cancel, |rtxn, c| Ok(c.images.len(rtxn)?)).await?;
        Ok(Count::Exact(n))
    }

    /// 读取已保存的 schema 版本
    pub async fn schema_version(&self) -> Result<u32> {
        let gw = self.gateway().await?;
        let version = gw
            .read(&CancellationToken::new(), |rtxn, c| Ok(schema::schema_version(c, rtxn)?))
            .await?;
        Ok(version)
    }

    /// 以主记录为准修复三个集合之间的不一致
    ///
    /// 缺失的缩略图和人物行补为空行，没有主记录的孤立行会被删除。
    pub async fn repair(&self) -> Result<RepairReport> {
        let gw = self.gateway().await?;
        let report = gw
            .write(&CancellationToken::new(), |wtxn, c| {
                let mut report = RepairReport::default();

                let mut keys = vec![];
                let images = c.images.remap_data_type::<DecodeIgnore>();
                for item in images.iter(wtxn)? {
                    keys.push(item?.0.to_owned());
                }
                for key in &keys {
                    if c.thumbnails.get(wtxn, key)?.is_none() {
                        let row = ThumbnailRow { name: key.clone(), thumbnail: None };
                        c.thumbnails.put(wtxn, key, &row)?;
                        report.restored_thumbnails += 1;
                    }
                    if c.persons.get(wtxn, key)?.is_none() {
                        let row = PersonRow { name: key.clone(), person: PersonSet::default() };
                        c.persons.put(wtxn, key, &row)?;
                        report.restored_persons += 1;
                    }
                }

                let mut orphans = vec![];
                for item in c.thumbnails.remap_data_type::<DecodeIgnore>().iter(wtxn)? {
                    let name = item?.0;
                    if images.get(wtxn, name)?.is_none() {
                        orphans.push((Collection::Thumbnails, name.to_owned()));
                    }
                }
                for item in c.persons.remap_data_type::<DecodeIgnore>().iter(wtxn)? {
                    let name = item?.0;
                    if images.get(wtxn, name)?.is_none() {
                        orphans.push((Collection::Persons, name.to_owned()));
                    }
                }
                for (collection, name) in &orphans {
                    let deleted = match collection {
                        Collection::Thumbnails => c.thumbnails.delete(wtxn, name)?,
                        _ => c.persons.delete(wtxn, name)?,
                    };
                    if deleted {
                        report.removed_orphans += 1;
                    }
                }

                Ok(report)
            })
            .await?;
        info!(
            "修复完成: 缩略图 {}，人物 {}，孤立行 {}",
            report.restored_thumbnails, report.restored_persons, report.removed_orphans
        );
        Ok(report)
    }
}

/// 查询结果流
pub enum RecordStream {
    Local(Scan<Record, ScanSummary>),
    Remote(std::vec::IntoIter<Record>),
    Empty,
}

impl RecordStream {
    pub async fn next(&mut self) -> Option<Result<Record>> {
        match self {
            Self::Local(scan) => scan.next().await.map(|r| r.map_err(CatalogError::from)),
            Self::Remote(records) => records.next().map(Ok),
            Self::Empty => None,
        }
    }
}
