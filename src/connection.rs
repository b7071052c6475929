//! 连接封装
//!
//! 把一条双向字节流包成一对消息通道。这一层的收发返回
//! `Result`，保留失败原因；端点在其上提供吞掉错误的哨兵接口。

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Result;
use crate::message::Message;
use crate::transport::Transport;

/// 连接封装
///
/// 将传输层和编解码封装在一起，提供消息粒度的收发接口。
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct Connection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// 从传输层创建连接
    pub fn new<T: Transport<Reader = R, Writer = W>>(transport: T) -> Self {
        let (reader, writer) = transport.split();
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 从调用方提供的读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 分离为读取端和写入端
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收一条消息
    pub async fn recv(&mut self) -> Result<Message> {
        self.reader.read_frame().await
    }

    /// 发送一条消息
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.writer.write_frame(message).await
    }
}
