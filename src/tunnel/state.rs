use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// 单次隧道调用的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    /// 正在连接代理
    DialingProxy,
    /// CONNECT 已发送，等待代理响应
    TunnelPending,
    TunnelEstablished,
    /// 隧道内 TLS 握手（仅 https 目标）
    TlsHandshaking,
    RequestSent,
    ResponseReceiving,
    Closed,
    Failed,
}

impl TunnelState {
    /// 终止状态，连接已释放
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        use TunnelState::*;

        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (Idle, DialingProxy)
            | (DialingProxy, TunnelPending)
            | (TunnelPending, TunnelEstablished)
            | (TunnelEstablished, TlsHandshaking)
            | (TunnelEstablished, RequestSent)
            | (TlsHandshaking, RequestSent)
            | (RequestSent, ResponseReceiving)
            | (ResponseReceiving, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::DialingProxy => "dialing-proxy",
            Self::TunnelPending => "tunnel-pending",
            Self::TunnelEstablished => "tunnel-established",
            Self::TlsHandshaking => "tls-handshaking",
            Self::RequestSent => "request-sent",
            Self::ResponseReceiving => "response-receiving",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 单次调用的状态跟踪
#[derive(Debug)]
pub struct CallState {
    id: Uuid,
    state: TunnelState,
    started: Instant,
}

impl CallState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TunnelState::Idle,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 进入下一个状态
    pub fn advance(&mut self, next: TunnelState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid tunnel state transition {} -> {}",
            self.state,
            next
        );
        debug!("State {} -> {}", self.state, next);
        self.state = next;
    }

    /// 标记失败，返回失败前所处的状态
    pub fn fail(&mut self) -> TunnelState {
        let previous = self.state;
        if !previous.is_terminal() {
            self.advance(TunnelState::Failed);
        }
        previous
    }
}

impl Default for CallState {
    fn default() -> Self {
        Self::new()
    }
}
