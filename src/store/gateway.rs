//! 存储引擎的唯一入口
//!
//! LMDB 的调用都是阻塞的，这里把每个原语（读、写、计数、游标扫描、删库）
//! 放到阻塞线程池中执行，并通过 [`Completion`] 把结果交还给异步调用方。
//! 每次调用对应一个独立的事务。

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use heed::{Env, EnvOpenOptions, RoTxn, RwTxn, WithTls};
use log::{debug, warn};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;

use super::schema::{self, Collections, MAX_DBS};
use crate::error::{BlockedOn, CatalogError};

/// 网关层的失败类型，离开网关前会被转换为 [`CatalogError`]
#[derive(Debug)]
pub enum Failure {
    Engine(heed::Error),
    Blocked,
    Abort(String),
    Cancelled,
}

impl From<heed::Error> for Failure {
    fn from(err: heed::Error) -> Self {
        Self::Engine(err)
    }
}

impl Failure {
    pub fn into_error(self, blocked_on: BlockedOn) -> CatalogError {
        match self {
            Self::Engine(err) => CatalogError::Engine(err),
            Self::Blocked => CatalogError::Blocked(blocked_on),
            Self::Abort(reason) => CatalogError::Aborted(reason),
            Self::Cancelled => CatalogError::Cancelled,
        }
    }
}

impl From<Failure> for CatalogError {
    fn from(failure: Failure) -> Self {
        failure.into_error(BlockedOn::Write)
    }
}

enum State<T> {
    Pending(oneshot::Sender<Result<T, Failure>>),
    Settled,
}

/// 请求的完成端：Pending -> Resolved | Rejected
///
/// `resolve`/`reject` 会消耗自身；未完成就被丢弃（例如工作线程 panic）时自动以 Abort 拒绝，
/// 因此每个请求恰好完成一次。
pub struct Completion<T> {
    state: State<T>,
}

impl<T> Completion<T> {
    pub fn new() -> (Self, Request<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { state: State::Pending(tx) }, Request { rx })
    }

    pub fn resolve(mut self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(mut self, failure: Failure) {
        self.settle(Err(failure));
    }

    pub fn settle(&mut self, result: Result<T, Failure>) {
        if let State::Pending(tx) = mem::replace(&mut self.state, State::Settled) {
            // 调用方已经放弃等待时发送会失败，忽略即可
            let _ = tx.send(result);
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending(_))
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.is_pending() {
            self.settle(Err(Failure::Abort("request dropped before completion".to_owned())));
        }
    }
}

/// 请求的等待端
pub struct Request<T> {
    rx: oneshot::Receiver<Result<T, Failure>>,
}

impl<T> Request<T> {
    pub async fn wait(self, cancel: &CancellationToken) -> Result<T, Failure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Failure::Cancelled),
            result = self.rx => result.unwrap_or_else(|_| {
                Err(Failure::Abort("completion channel closed".to_owned()))
            }),
        }
    }
}

/// 打开的存储连接
#[derive(Clone)]
pub struct Connection {
    pub env: Env<WithTls>,
    pub collections: Collections,
}

/// 打开环境时的参数
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub map_size: usize,
    pub blocked_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { map_size: 1 << 32, blocked_timeout: Duration::from_secs(5) }
    }
}

/// 打开存储并初始化 schema
///
/// 同一个环境在进程内尚未关闭时会返回 `Blocked`。
pub async fn open(path: &Path, options: &EngineOptions) -> Result<Connection, Failure> {
    let path = path.to_path_buf();
    let map_size = options.map_size;
    let (completion, request) = Completion::new();
    spawn_blocking(move || match open_blocking(&path, map_size) {
        Ok(conn) => completion.resolve(conn),
        Err(failure) => completion.reject(failure),
    });
    request.wait(&CancellationToken::new()).await
}

fn open_blocking(path: &Path, map_size: usize) -> Result<Connection, Failure> {
    std::fs::create_dir_all(path).map_err(|e| Failure::Engine(heed::Error::Io(e)))?;
    let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(MAX_DBS).open(path) };
    let env = match env {
        Ok(env) => env,
        Err(heed::Error::EnvAlreadyOpened) => return Err(Failure::Blocked),
        Err(err) => return Err(err.into()),
    };
    let collections = schema::initialize_schema(&env)?;
    debug!("打开存储: {}", path.display());
    Ok(Connection { env, collections })
}

/// 关闭连接并删除整个存储目录
///
/// 仍有其他操作持有环境时，最多等待 `timeout`，超时返回 `Blocked`。
pub async fn delete_database(
    conn: Option<Connection>,
    path: PathBuf,
    timeout: Duration,
) -> Result<(), Failure> {
    let (completion, request) = Completion::new();
    spawn_blocking(move || {
        if let Some(conn) = conn {
            let event = conn.env.prepare_for_closing();
            if !event.wait_timeout(timeout) {
                warn!("等待存储关闭超时: {}", path.display());
                return completion.reject(Failure::Blocked);
            }
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => completion.resolve(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => completion.resolve(()),
            Err(e) => completion.reject(Failure::Engine(heed::Error::Io(e))),
        }
    });
    request.wait(&CancellationToken::new()).await
}

/// 面向单个连接的事务入口
#[derive(Clone)]
pub struct Gateway {
    conn: Connection,
    writer: Arc<Mutex<()>>,
    blocked_timeout: Duration,
}

impl Gateway {
    pub fn new(conn: Connection, writer: Arc<Mutex<()>>, blocked_timeout: Duration) -> Self {
        Self { conn, writer, blocked_timeout }
    }

    /// 在只读事务中执行 `f`
    pub async fn read<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, Failure>
    where
        T: Send + 'static,
        F: FnOnce(&RoTxn<WithTls>, &Collections) -> Result<T, Failure> + Send + 'static,
    {
        let (mut completion, request) = Completion::new();
        let conn = self.conn.clone();
        let token = cancel.clone();
        spawn_blocking(move || {
            if token.is_cancelled() {
                return completion.reject(Failure::Cancelled);
            }
            let result = conn
                .env
                .read_txn()
                .map_err(Failure::from)
                .and_then(|rtxn| f(&rtxn, &conn.collections));
            // 先释放环境再通知调用方，保证返回后可以立即关闭或重新打开
            drop(conn);
            completion.settle(result);
        });
        request.wait(cancel).await
    }

    /// 在读写事务中执行 `f`，`f` 返回 Ok 时提交，否则放弃整个事务
    ///
    /// LMDB 同时只允许一个写事务，这里用一把异步锁排队，等待超过阈值则视为被阻塞。
    pub async fn write<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, Failure>
    where
        T: Send + 'static,
        F: FnOnce(&mut RwTxn, &Collections) -> Result<T, Failure> + Send + 'static,
    {
        let lane = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Failure::Cancelled),
            lane = tokio::time::timeout(self.blocked_timeout, self.writer.clone().lock_owned()) => {
                lane.map_err(|_| Failure::Blocked)?
            }
        };

        let (mut completion, request) = Completion::new();
        let conn = self.conn.clone();
        let token = cancel.clone();
        spawn_blocking(move || {
            let _lane = lane;
            let result = if token.is_cancelled() {
                Err(Failure::Cancelled)
            } else {
                write_blocking(&conn, &token, f)
            };
            drop(conn);
            completion.settle(result);
        });
        request.wait(cancel).await
    }

    /// 在一个只读事务中逐步推进游标，每一步通过 [`Emitter`] 交出一个元素
    ///
    /// 整个扫描共享同一个读事务，即打开游标时的快照。
    pub fn scan<T, S, F>(&self, cancel: &CancellationToken, capacity: usize, f: F) -> Scan<T, S>
    where
        T: Send + 'static,
        S: Send + 'static,
        F: FnOnce(&RoTxn<WithTls>, &Collections, &mut Emitter<T>) -> Result<S, Failure>
            + Send
            + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (mut completion, request) = Completion::new();
        let conn = self.conn.clone();
        let token = cancel.clone();
        spawn_blocking(move || {
            let mut emitter = Emitter { tx, cancel: token };
            let result = emitter
                .check()
                .and_then(|_| conn.env.read_txn().map_err(Failure::from))
                .and_then(|rtxn| f(&rtxn, &conn.collections, &mut emitter));
            // 先关闭通道，接收端读完剩余元素后再取结果
            drop(emitter);
            drop(conn);
            completion.settle(result);
        });
        Scan { rx, done: Some(request), cancel: cancel.clone(), finished: false }
    }
}

fn write_blocking<T, F>(conn: &Connection, token: &CancellationToken, f: F) -> Result<T, Failure>
where
    F: FnOnce(&mut RwTxn, &Collections) -> Result<T, Failure>,
{
    let mut wtxn = conn.env.write_txn()?;
    match f(&mut wtxn, &conn.collections) {
        // 提交前被取消则放弃
        Ok(_) if token.is_cancelled() => {
            wtxn.abort();
            Err(Failure::Cancelled)
        }
        Ok(value) => {
            wtxn.commit()?;
            Ok(value)
        }
        Err(failure) => {
            wtxn.abort();
            Err(failure)
        }
    }
}

/// 扫描线程向调用方交付元素
pub struct Emitter<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Emitter<T> {
    /// 每一步游标推进前调用
    pub fn check(&self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() { Err(Failure::Cancelled) } else { Ok(()) }
    }

    /// 阻塞直到调用方取走元素；调用方放弃时返回 `Cancelled`
    pub fn emit(&mut self, item: T) -> Result<(), Failure> {
        self.check()?;
        self.tx.blocking_send(item).map_err(|_| Failure::Cancelled)
    }
}

/// 进行中的游标扫描
pub struct Scan<T, S> {
    rx: mpsc::Receiver<T>,
    done: Option<Request<S>>,
    cancel: CancellationToken,
    finished: bool,
}

impl<T, S> Scan<T, S> {
    /// 取下一个元素，扫描结束返回 `None`
    ///
    /// 出错（包括取消）后只返回一次错误，之后一直返回 `None`。
    pub async fn next(&mut self) -> Option<Result<T, Failure>> {
        if self.finished {
            return None;
        }
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => Some(item),
        };
        match item {
            Some(Some(item)) => return Some(Ok(item)),
            Some(None) => {}
            None => {
                self.finish_early();
                return Some(Err(Failure::Cancelled));
            }
        }
        self.finished = true;
        match self.done.take()?.wait(&self.cancel).await {
            Ok(_) => None,
            Err(failure) => Some(Err(failure)),
        }
    }

    fn finish_early(&mut self) {
        self.finished = true;
        self.done = None;
        // 扫描线程的下一次发送会失败并退出
        self.rx.close();
    }

    /// 读完所有元素，同时返回扫描线程的汇总结果
    pub async fn finish(mut self) -> Result<(Vec<T>, S), Failure> {
        let mut items = vec![];
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        let done = self.done.take().ok_or(Failure::Cancelled)?;
        let summary = done.wait(&self.cancel).await?;
        Ok((items, summary))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    async fn gateway(path: &Path) -> Gateway {
        let options = EngineOptions { map_size: 1 << 24, blocked_timeout: Duration::from_millis(200) };
        let conn = open(path, &options).await.unwrap();
        Gateway::new(conn, Arc::new(Mutex::new(())), options.blocked_timeout)
    }

    #[tokio::test]
    async fn test_completion_once() {
        let (completion, request) = Completion::<u32>::new();
        completion.resolve(7);
        assert_eq!(request.wait(&CancellationToken::new()).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_completion_dropped_is_abort() {
        let (completion, request) = Completion::<u32>::new();
        drop(completion);
        let result = request.wait(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Failure::Abort(_))));
    }

    #[tokio::test]
    async fn test_settle_twice_keeps_first() {
        let (mut completion, request) = Completion::<u32>::new();
        completion.settle(Ok(1));
        completion.settle(Ok(2));
        assert!(!completion.is_pending());
        assert_eq!(request.wait(&CancellationToken::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = tempdir().unwrap();
        let gw = gateway(temp_dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = gw.read(&cancel, |rtxn, c| Ok(c.images.len(rtxn)?)).await;
        assert!(matches!(result, Err(Failure::Cancelled)));
    }

    #[tokio::test]
    async fn test_write_abort_on_error() {
        let temp_dir = tempdir().unwrap();
        let gw = gateway(temp_dir.path()).await;
        let cancel = CancellationToken::new();
        let result = gw
            .write(&cancel, |wtxn, c| {
                c.by_size.put(wtxn, b"k".as_slice(), &())?;
                Err::<(), _>(Failure::Abort("test".to_owned()))
            })
            .await;
        assert!(matches!(result, Err(Failure::Abort(_))));
        let len = gw.read(&cancel, |rtxn, c| Ok(c.by_size.len(rtxn)?)).await.unwrap();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    async fn test_write_lane_blocked() {
        let temp_dir = tempdir().unwrap();
        let gw = gateway(temp_dir.path()).await;
        let _held = gw.writer.clone().lock_owned().await;
        let result = gw.write(&CancellationToken::new(), |_, _| Ok(())).await;
        assert!(matches!(result, Err(Failure::Blocked)));
    }

    #[tokio::test]
    async fn test_open_twice_is_blocked() {
        let temp_dir = tempdir().unwrap();
        let options = EngineOptions::default();
        let _conn = open(temp_dir.path(), &options).await.unwrap();
        let result = open(temp_dir.path(), &options).await;
        assert!(matches!(result, Err(Failure::Blocked)));
    }

    #[tokio::test]
    async fn test_scan_streams_all() {
        let temp_dir = tempdir().unwrap();
        let gw = gateway(temp_dir.path()).await;
        let mut scan = gw.scan(&CancellationToken::new(), 2, |_, _, emitter| {
            for i in 0..10u32 {
                emitter.emit(i)?;
            }
            Ok(10usize)
        });
        let mut items = vec![];
        while let Some(item) = scan.next().await {
            items.push(item.unwrap());
        }
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_scan_cancel_midway() {
        let temp_dir = tempdir().unwrap();
        let gw = gateway(temp_dir.path()).await;
        let cancel = CancellationToken::new();
        let mut scan = gw.scan(&cancel, 1, |_, _, emitter| {
            for i in 0.. {
                emitter.emit(i)?;
            }
            Ok(())
        });
        assert_eq!(scan.next().await.unwrap().unwrap(), 0);
        cancel.cancel();
        assert!(matches!(scan.next().await, Some(Err(Failure::Cancelled))));
        assert!(scan.next().await.is_none());
        assert!(scan.next().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_database_blocked_by_holder() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db");
        let conn = open(&path, &EngineOptions::default()).await.unwrap();
        let holder = conn.clone();
        let result = delete_database(Some(conn), path.clone(), Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Failure::Blocked)));
        drop(holder);
    }
}
