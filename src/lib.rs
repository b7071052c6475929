//! 聊天端点协议库
//!
//! 把调用方提供的一条双向字节流变成事件驱动的聊天参与者。
//!
//! 包含:
//! - 消息类型定义 (Message, MessageIntent)
//! - 传输层抽象 (Transport trait)
//! - 帧编解码 (FrameReader / FrameWriter)
//! - 连接封装 (Connection)
//! - 连接端点 (Endpoint): 用户名握手、收发原语、接收循环与回调

mod message;
mod constants;
mod transport;
mod codec;
mod connection;
mod endpoint;
mod error;

pub use message::{Message, MessageIntent};
pub use constants::*;
pub use transport::{Transport, TransportListener, TransportConfig, TcpTransport, TcpListener};
pub use codec::{FrameReader, FrameWriter};
pub use connection::Connection;
pub use endpoint::{DieHandler, Endpoint, FailureHandler, ReceivedHandler};
pub use error::{HandshakeError, ProtocolError, Result};
