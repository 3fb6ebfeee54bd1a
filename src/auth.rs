//! 密码认证、按 IP 的授权会话与登录限流。

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::{body::Body as AxumBody, middleware, response::Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::http::{ClientIpSource, resolve_client_ip};

#[derive(Debug, Clone, Copy)]
pub struct LoginLimits {
    /// 为 0 时不限流。
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
}

#[derive(Debug)]
struct LoginAttempt {
    window_start: Instant,
    failures: u32,
    locked_until: Option<Instant>,
}

/// 所有请求共享的密码认证状态。
///
/// 已授权 IP 集合在进程生命周期内只增不减；锁内只做单次查找或插入，
/// 不跨 `.await` 持有。
#[derive(Debug)]
pub struct SessionStore {
    password: Option<String>,
    authorized: Mutex<HashSet<IpAddr>>,
    login_attempts: Mutex<HashMap<IpAddr, LoginAttempt>>,
    limits: LoginLimits,
}

impl SessionStore {
    pub fn new(password: Option<String>, limits: LoginLimits) -> Self {
        Self {
            password: password.filter(|value| !value.is_empty()),
            authorized: Mutex::new(HashSet::new()),
            login_attempts: Mutex::new(HashMap::new()),
            limits,
        }
    }

    pub fn password_enabled(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_authorized(&self, ip: IpAddr) -> bool {
        lock(&self.authorized).contains(&ip)
    }

    pub fn authorize(&self, ip: IpAddr) {
        if lock(&self.authorized).insert(ip) {
            info!(client_ip = %ip, "client authorized");
        }
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        self.password
            .as_deref()
            .is_some_and(|password| password == candidate)
    }

    /// 返回剩余锁定秒数；未锁定时返回 `None`。
    pub fn check_rate_limit(&self, ip: IpAddr) -> Option<u64> {
        if self.limits.max_attempts == 0 {
            return None;
        }
        let mut attempts = lock(&self.login_attempts);
        let entry = attempts.get_mut(&ip)?;
        let now = Instant::now();

        if let Some(locked_until) = entry.locked_until {
            if now < locked_until {
                return Some(locked_until.saturating_duration_since(now).as_secs().max(1));
            }
            entry.locked_until = None;
            entry.failures = 0;
            entry.window_start = now;
        }
        if now.duration_since(entry.window_start) > self.limits.window {
            entry.window_start = now;
            entry.failures = 0;
        }
        None
    }

    pub fn register_failure(&self, ip: IpAddr) {
        if self.limits.max_attempts == 0 {
            return;
        }
        let mut attempts = lock(&self.login_attempts);
        let now = Instant::now();
        let entry = attempts.entry(ip).or_insert(LoginAttempt {
            window_start: now,
            failures: 0,
            locked_until: None,
        });

        if now.duration_since(entry.window_start) > self.limits.window {
            entry.window_start = now;
            entry.failures = 0;
            entry.locked_until = None;
        }
        entry.failures = entry.failures.saturating_add(1);
        if entry.failures >= self.limits.max_attempts {
            entry.locked_until = Some(now + self.limits.lockout);
            warn!(client_ip = %ip, "password attempts locked out");
        }
    }

    pub fn clear_failures(&self, ip: IpAddr) {
        lock(&self.login_attempts).remove(&ip);
    }

    /// 清理过期的失败记录。
    pub fn prune_attempts(&self) {
        let mut attempts = lock(&self.login_attempts);
        let now = Instant::now();
        let window = self.limits.window;
        attempts.retain(|_, entry| match entry.locked_until {
            Some(locked_until) => locked_until > now,
            None => now.duration_since(entry.window_start) <= window,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 认证中间件：未启用密码时直接放行，否则校验 IP 会话或 Basic 认证。
pub async fn auth_middleware(
    Extension(sessions): Extension<Arc<SessionStore>>,
    Extension(ip_source): Extension<ClientIpSource>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if !sessions.password_enabled() {
        return Ok(next.run(req).await);
    }

    let client_ip = resolve_client_ip(req.headers(), addr.ip(), ip_source);
    if sessions.is_authorized(client_ip) {
        return Ok(next.run(req).await);
    }

    let Some(TypedHeader(credentials)) = auth_header else {
        debug!(client_ip = %client_ip, "credentials required");
        return Err(ApiError::Unauthorized("Authentication required".into()));
    };

    if let Some(retry_after) = sessions.check_rate_limit(client_ip) {
        return Err(ApiError::TooManyRequests(retry_after));
    }

    if !sessions.check_password(credentials.password()) {
        sessions.register_failure(client_ip);
        warn!(client_ip = %client_ip, "password rejected");
        return Err(ApiError::Unauthorized("Authentication failed".into()));
    }

    sessions.clear_failures(client_ip);
    sessions.authorize(client_ip);
    Ok(next.run(req).await)
}
