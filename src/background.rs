//! 登录失败记录的后台清理任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::SessionStore;
use crate::config::ATTEMPT_PRUNE_INTERVAL_SECS;

/// 启动后台清理任务；未启用密码时不启动。
pub fn spawn_background_tasks(sessions: Arc<SessionStore>) {
    if !sessions.password_enabled() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ATTEMPT_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sessions.prune_attempts();
            debug!("pruned password attempt records");
        }
    });
}
