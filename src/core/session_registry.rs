//! 会话注册表：session_id → 会话
//!
//! 首条消息时创建，空闲超时后由后台清理任务驱逐；正在运行编排的会话（锁被持有）不会被驱逐。
//! 每个会话一把异步 Mutex，同一会话的并发请求排队执行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::memory::Transcript;

/// 单个会话
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub transcript: Transcript,
    /// 已完成的轮次
    pub turns: usize,
    pub created_at: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transcript: Transcript::new(),
            turns: 0,
            created_at: Instant::now(),
        }
    }
}

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    last_active: Instant,
}

/// 会话注册表
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// 取得或创建会话；未给出 id 时生成 uuid v4
    pub async fn get_or_create(&self, session_id: Option<&str>) -> (String, Arc<Mutex<Session>>) {
        let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.clone()).or_insert_with(|| {
            info!(session_id = %id, "session created");
            SessionEntry {
                session: Arc::new(Mutex::new(Session::new(id.clone()))),
                last_active: Instant::now(),
            }
        });
        entry.last_active = Instant::now();
        (id, entry.session.clone())
    }

    /// 刷新活跃时间（一轮结束时调用）
    pub async fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(session_id) {
            entry.last_active = Instant::now();
        }
    }

    /// 丢弃会话的对话记录；返回会话是否存在
    pub async fn reset(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "session reset");
        }
        removed
    }

    /// 驱逐空闲会话，返回驱逐数量
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let idle_timeout = self.idle_timeout;
        sessions.retain(|id, entry| {
            if entry.last_active.elapsed() < idle_timeout {
                return true;
            }
            // 锁被持有说明编排仍在进行
            let busy = entry.session.try_lock().is_err();
            if !busy {
                debug!(session_id = %id, "evicting idle session");
            }
            busy
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "idle sessions evicted");
        }
        evicted
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 后台清理任务：每隔 interval 驱逐一次，cancel 后退出
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.evict_idle().await;
                    }
                }
            }
            debug!("session janitor stopped");
        })
    }
}
