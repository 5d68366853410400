use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::router::{Session, ShareToken};
use crate::store::{CatalogBuilder, RetryPolicy};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "picatalog", "picatalog").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 存储的最大容量（MB）
    #[arg(long, value_name = "MB", default_value_t = 4096)]
    pub map_size: usize,
    /// 等待其他连接释放存储的最长时间（毫秒），超时视为被阻塞
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub blocked_timeout: u64,
    /// 打开存储被阻塞时的重试次数
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub open_retries: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct SessionOptions {
    /// 当前用户的根目录，只有路径以此开头的图片才可见
    #[arg(short, long, env = "PICATALOG_ROOT")]
    pub root: Option<String>,
    /// 浏览共享快照而不是本地存储
    #[arg(short, long, env = "PICATALOG_SHARE")]
    pub share: Option<String>,
    /// 共享快照服务地址
    #[arg(long, env = "PICATALOG_SHARE_URL", default_value = "http://127.0.0.1:8000")]
    pub share_url: String,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "picatalog", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// picatalog 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub session: SessionOptions,
}

impl Opts {
    /// 根据命令行参数构造存储
    pub fn catalog(&self) -> CatalogBuilder {
        let session = Session::new(
            self.session.root.clone(),
            self.session.share.clone().map(ShareToken::new),
        );
        CatalogBuilder::new(self.conf_dir.database())
            .map_size(self.store.map_size << 20)
            .blocked_timeout(Duration::from_millis(self.store.blocked_timeout))
            .retry(RetryPolicy { attempts: self.store.open_retries, ..Default::default() })
            .session(Arc::new(session))
            .share_url(self.session.share_url.clone())
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 显示存储信息
    Info(InfoCommand),
    /// 导入图片记录（JSON 文件或目录）
    Import(ImportCommand),
    /// 按索引查询图片记录
    Query(QueryCommand),
    /// 导出一张图片的缩略图
    Thumbnail(ThumbnailCommand),
    /// 显示一张图片中的人物
    Person(PersonCommand),
    /// 修复集合之间的不一致
    Repair(RepairCommand),
    /// 删除并重建整个存储
    Reset(ResetCommand),
    /// 打开、重置、导入并查询，输出各步骤耗时
    Selftest(SelftestCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回存储目录的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("catalog.mdb")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
