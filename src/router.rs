//! 本地 / 共享模式的选择与共享快照的获取

use std::fmt;
use std::sync::{PoisonError, RwLock};

use log::{info, warn};
use serde_json::Value;

use crate::error::Result;
use crate::model::Record;

/// 共享快照的标识，原样作为 `id` 参数传给服务端
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareToken(String);

impl ShareToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 当前会话：登录用户的根目录前缀和正在浏览的共享快照
pub trait SessionContext: Send + Sync {
    /// 未登录时返回 `None`
    fn root(&self) -> Option<String>;
    fn share(&self) -> Option<ShareToken>;
}

/// 每次调用时根据会话决定读取来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Local,
    Shared(ShareToken),
}

impl Mode {
    pub fn resolve(session: &dyn SessionContext) -> Self {
        match session.share() {
            Some(token) => Self::Shared(token),
            None => Self::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Shared(_) => "shared",
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    root: Option<String>,
    share: Option<ShareToken>,
}

/// 可在运行时修改的会话
#[derive(Debug, Default)]
pub struct Session {
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(root: Option<String>, share: Option<ShareToken>) -> Self {
        Self { state: RwLock::new(SessionState { root, share }) }
    }

    pub fn set_root(&self, root: Option<String>) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).root = root;
    }

    pub fn set_share(&self, token: ShareToken) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).share = Some(token);
    }

    pub fn clear_share(&self) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).share = None;
    }
}

impl SessionContext for Session {
    fn root(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).root.clone()
    }

    fn share(&self) -> Option<ShareToken> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).share.clone()
    }
}

/// 共享快照接口的客户端
#[derive(Debug, Clone)]
pub struct ShareClient {
    client: reqwest::Client,
    base_url: String,
}

impl ShareClient {
    /// 未指定地址时使用本机的服务
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| "http://127.0.0.1:8000".to_owned());
        Self { client: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_owned() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 获取共享快照
    ///
    /// 服务端返回非 2xx 时视为空快照；数组中的 `null` 和无法解析的元素会被丢弃。
    pub async fn fetch(&self, token: &ShareToken) -> Result<Vec<Record>> {
        let url = format!("{}/api/share", self.base_url);
        let resp = self.client.get(&url).query(&[("id", token.as_str())]).send().await?;

        if !resp.status().is_success() {
            warn!("获取共享 {} 失败: {}", token, resp.status());
            return Ok(vec![]);
        }

        let items = resp.json::<Vec<Value>>().await?;
        let received = items.len();
        let mut invalid = 0;
        let records = items
            .into_iter()
            .filter(|v| !v.is_null())
            .filter_map(|v| match serde_json::from_value::<Record>(v) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("共享 {} 中的记录无效: {}", token, e);
                    invalid += 1;
                    None
                }
            })
            .collect::<Vec<_>>();

        info!("共享 {}: 收到 {} 条，有效 {} 条，无效 {} 条", token, received, records.len(), invalid);
        Ok(records)
    }
}
