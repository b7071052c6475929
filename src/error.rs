//! 错误类型定义

use thiserror::Error;

use crate::message::MessageIntent;

/// 握手错误
///
/// 构造 Endpoint 时拿不到有效的 CREATE 消息。构造失败是致命的，
/// 不会返回半成品端点。
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// 流上读不到消息（对端断开、IO 失败或帧损坏）
    #[error("username not provided")]
    MissingIdentity,

    /// 读到的第一条消息不是 CREATE
    #[error("expected CREATE, got {0:?}")]
    UnexpectedIntent(MessageIntent),

    /// 重试时取不到新的候选用户名
    #[error("no username candidate left")]
    CandidatesExhausted,
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 握手失败
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
