//! 连接端点
//!
//! Endpoint 是一次聊天会话的一侧：独占一条连接，完成用户名
//! 握手，提供阻塞式收发原语，并在接收循环里把消息分发给
//! 注册的回调，直到连接结束。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec::{FrameReader, FrameWriter};
use crate::connection::Connection;
use crate::error::{HandshakeError, Result};
use crate::message::{Message, MessageIntent};

/// 收到聊天消息时的回调
pub type ReceivedHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// 接收循环退出时的回调
pub type DieHandler<R, W> = Box<dyn Fn(&Endpoint<R, W>) + Send + Sync>;

/// 握手被拒绝时的回调
pub type FailureHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// 连接端点，每条活跃连接一个实例
///
/// 写入端内部有锁，接收循环之外的任务可以安全地并发调用
/// [`Endpoint::send`]；其余方法约定由驱动 [`Endpoint::run`] 的
/// 任务调用。
pub struct Endpoint<R, W> {
    username: String,
    reader: Mutex<FrameReader<R>>,
    writer: Mutex<FrameWriter<W>>,
    connected: AtomicBool,
    on_received: StdMutex<Vec<ReceivedHandler>>,
    on_die: StdMutex<Vec<DieHandler<R, W>>>,
    on_failure: StdMutex<FailureHandler>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Endpoint<R, W> {
    fn from_channels(reader: FrameReader<R>, writer: FrameWriter<W>, username: String) -> Self {
        Self {
            username,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
            on_received: StdMutex::new(Vec::new()),
            on_die: StdMutex::new(Vec::new()),
            on_failure: StdMutex::new(Box::new(|status: &Message| {
                warn!("{}", status.raw());
            })),
        }
    }

    /// 被动模式：包装一条已接受的连接，等待对端宣告用户名
    ///
    /// 对端发来的第一条消息必须是 CREATE，其作者成为本端用户名。
    pub async fn accept(connection: Connection<R, W>) -> Result<Self> {
        let (reader, writer) = connection.split();
        let mut endpoint = Self::from_channels(reader, writer, String::new());
        endpoint.await_identity().await?;
        Ok(endpoint)
    }

    /// 主动模式：宣告用户名并驱动 CREATE 握手
    ///
    /// 发送 CREATE 后等待状态回复。收到 SYSTEM 的 STATUS_FAILURE
    /// 时调用握手失败回调，从 `next_username` 取下一个候选名并
    /// 重试；返回 `None` 表示没有候选了，握手以
    /// [`HandshakeError::CandidatesExhausted`] 失败。任何非拒绝的
    /// 回复都视为接受。重试次数只受对端拒绝次数约束，本端不设
    /// 上限。
    pub async fn login<S>(
        connection: Connection<R, W>,
        username: impl Into<String>,
        mut next_username: S,
    ) -> Result<Self>
    where
        S: FnMut() -> Option<String>,
    {
        let (reader, writer) = connection.split();
        let mut endpoint = Self::from_channels(reader, writer, username.into());

        loop {
            let announce = Message::new(
                endpoint.username.clone(),
                MessageIntent::Create,
                endpoint.username.clone(),
            );
            // 写入失败时随后的读取也会失败，握手在那里终止
            let _ = endpoint.send(&announce).await;

            let status = endpoint
                .receive()
                .await
                .ok_or(HandshakeError::MissingIdentity)?;
            if !status.is_rejection() {
                break;
            }

            {
                let on_failure = endpoint.on_failure.lock().unwrap();
                (*on_failure)(&status);
            }

            endpoint.username =
                next_username().ok_or(HandshakeError::CandidatesExhausted)?;
        }

        Ok(endpoint)
    }

    /// 等待对端发来 CREATE 消息并采用其中的用户名
    async fn await_identity(&mut self) -> Result<()> {
        let message = self
            .receive()
            .await
            .ok_or(HandshakeError::MissingIdentity)?;

        if message.intent() != MessageIntent::Create {
            return Err(HandshakeError::UnexpectedIntent(message.intent()).into());
        }

        self.username = message.author().to_string();
        Ok(())
    }

    /// 接收循环，每条连接跑一个
    ///
    /// 阻塞直到对端断开或 IO 失败。SEND 消息按到达顺序交给
    /// 已注册的接收回调；握手之后不再预期其他意图，出现时直接
    /// 忽略。循环退出后依次调用退出回调，最后关闭连接。
    pub async fn run(&self) {
        while self.is_connected() {
            let Some(message) = self.receive().await else {
                break;
            };

            if message.intent() == MessageIntent::Send {
                let handlers = self.on_received.lock().unwrap();
                for handler in handlers.iter() {
                    handler(&message);
                }
            }
        }

        {
            let handlers = self.on_die.lock().unwrap();
            for handler in handlers.iter() {
                handler(self);
            }
        }

        self.close().await;
    }

    /// 注册收到聊天消息时的回调
    ///
    /// 注册是叠加的：新回调插在已有回调之前执行。回调在接收
    /// 循环的任务上持锁同步执行，回调内不要再注册回调。
    pub fn set_on_received<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_received.lock().unwrap().insert(0, Box::new(handler));
    }

    /// 注册接收循环退出时的回调
    ///
    /// 同样叠加、新回调在前；全部回调执行完后端点自行关闭。
    pub fn set_on_die<F>(&self, handler: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        self.on_die.lock().unwrap().insert(0, Box::new(handler));
    }

    /// 替换握手被拒绝时的回调（不叠加）
    ///
    /// 只有握手重试路径会调用它，默认行为是把拒绝消息的
    /// 原始文本记进日志。
    pub fn set_on_failure<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        *self.on_failure.lock().unwrap() = Box::new(handler);
    }

    /// 发送一条消息，返回是否写入成功
    ///
    /// 阻塞直到写入完成或失败。失败原因不向上传播，只记进
    /// 日志；需要严格送达保证的调用方检查返回值。
    pub async fn send(&self, message: &Message) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.write_frame(message).await {
            Ok(()) => true,
            Err(e) => {
                debug!("send failed: {}", e);
                false
            }
        }
    }

    /// 以本端用户名发送一条聊天消息
    pub async fn send_text(&self, content: impl Into<String>) -> bool {
        let message = Message::new(self.username.clone(), MessageIntent::Send, content);
        self.send(&message).await
    }

    /// 阻塞接收一条消息
    ///
    /// IO 失败和帧损坏都返回 `None`，两者在这一层不可区分；
    /// 保留原因的接口在 [`Connection`] 一层。
    pub async fn receive(&self) -> Option<Message> {
        let mut reader = self.reader.lock().await;
        match reader.read_frame().await {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("receive failed: {}", e);
                None
            }
        }
    }

    /// 本端是否仍认为连接存活
    ///
    /// 只反映本端状态，不探测对端；半开连接在一次收发失败前
    /// 仍然报告已连接。
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 关闭连接，可重复调用
    ///
    /// 已断开时为空操作。关闭过程中的 IO 错误记进日志，不向
    /// 调用方传播。
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            warn!("error while closing connection: {}", e);
        }
    }

    /// 协商好的用户名
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl<R, W> fmt::Debug for Endpoint<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("username", &self.username)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::transport::{
        TcpListener, TcpTransport, Transport, TransportConfig, TransportListener,
    };
    use crate::SYSTEM_AUTHOR;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type PipeConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// 一对内存管道连接，两端各一个
    fn pipe_pair() -> (PipeConnection, PipeConnection) {
        let (local, remote) = tokio::io::duplex(1024);
        let (local_r, local_w) = tokio::io::split(local);
        let (remote_r, remote_w) = tokio::io::split(remote);
        (
            Connection::from_parts(local_r, local_w),
            Connection::from_parts(remote_r, remote_w),
        )
    }

    fn rejection(reason: &str) -> Message {
        Message::new(SYSTEM_AUTHOR, MessageIntent::StatusFailure, reason)
    }

    fn acceptance() -> Message {
        Message::new(SYSTEM_AUTHOR, MessageIntent::StatusSuccess, "welcome")
    }

    #[tokio::test]
    async fn test_login_accepts_requested_name() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            let create = remote.recv().await.unwrap();
            assert_eq!(create.intent(), MessageIntent::Create);
            assert_eq!(create.author(), "alice");
            assert_eq!(create.content(), "alice");
            remote.send(&acceptance()).await.unwrap();

            // 握手只发一条 CREATE：下一帧应当已经是聊天消息
            let next = remote.recv().await.unwrap();
            assert_eq!(next.intent(), MessageIntent::Send);
            assert_eq!(next.content(), "hi");
        });

        let endpoint = Endpoint::login(local, "alice", || None).await.unwrap();
        assert_eq!(endpoint.username(), "alice");
        assert!(endpoint.is_connected());
        assert!(endpoint.send_text("hi").await);

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_retries_until_accepted() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            let mut submitted = Vec::new();
            for _ in 0..2 {
                let create = remote.recv().await.unwrap();
                assert_eq!(create.intent(), MessageIntent::Create);
                submitted.push(create.author().to_string());
                remote.send(&rejection("name taken")).await.unwrap();
            }
            let create = remote.recv().await.unwrap();
            submitted.push(create.author().to_string());
            remote.send(&acceptance()).await.unwrap();
            submitted
        });

        let mut candidates = vec!["carol", "bob"];
        let endpoint = Endpoint::login(local, "alice", move || {
            candidates.pop().map(String::from)
        })
        .await
        .unwrap();

        assert_eq!(endpoint.username(), "carol");
        assert_eq!(peer.await.unwrap(), ["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_login_fails_when_candidates_exhausted() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            let _create = remote.recv().await.unwrap();
            remote.send(&rejection("name taken")).await.unwrap();
        });

        let err = Endpoint::login(local, "alice", || None).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Handshake(HandshakeError::CandidatesExhausted)
        ));

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_adopts_announced_name() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            remote
                .send(&Message::new("dave", MessageIntent::Create, "dave"))
                .await
                .unwrap();
        });

        let endpoint = Endpoint::accept(local).await.unwrap();
        assert_eq!(endpoint.username(), "dave");

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_rejects_non_create_message() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            remote
                .send(&Message::new("dave", MessageIntent::Send, "hello"))
                .await
                .unwrap();
        });

        let err = Endpoint::accept(local).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Handshake(HandshakeError::UnexpectedIntent(MessageIntent::Send))
        ));

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_fails_on_closed_stream() {
        let (local, remote) = pipe_pair();
        drop(remote);

        let err = Endpoint::accept(local).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Handshake(HandshakeError::MissingIdentity)
        ));
    }

    #[tokio::test]
    async fn test_run_dispatches_send_messages_in_order() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            remote
                .send(&Message::new("eve", MessageIntent::Create, "eve"))
                .await
                .unwrap();
            remote
                .send(&Message::new("eve", MessageIntent::Send, "hi"))
                .await
                .unwrap();
            // 循环中途出现的状态消息应被忽略
            remote.send(&acceptance()).await.unwrap();
            remote
                .send(&Message::new("eve", MessageIntent::Send, "there"))
                .await
                .unwrap();
            // remote 随 task 结束被丢弃，对端读到 EOF
        });

        let endpoint = Endpoint::accept(local).await.unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let deaths = Arc::new(AtomicUsize::new(0));
        {
            let received = Arc::clone(&received);
            endpoint.set_on_received(move |message| {
                received.lock().unwrap().push(message.content().to_string());
            });
        }
        {
            let deaths = Arc::clone(&deaths);
            endpoint.set_on_die(move |_| {
                deaths.fetch_add(1, Ordering::SeqCst);
            });
        }

        endpoint.run().await;
        peer.await.unwrap();

        assert_eq!(*received.lock().unwrap(), ["hi", "there"]);
        assert_eq!(deaths.load(Ordering::SeqCst), 1);
        assert!(!endpoint.is_connected());
    }

    #[tokio::test]
    async fn test_newest_handler_runs_first() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            remote
                .send(&Message::new("eve", MessageIntent::Create, "eve"))
                .await
                .unwrap();
            remote
                .send(&Message::new("eve", MessageIntent::Send, "hi"))
                .await
                .unwrap();
        });

        let endpoint = Endpoint::accept(local).await.unwrap();

        let order = Arc::new(StdMutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            endpoint.set_on_received(move |_| order.lock().unwrap().push("old"));
        }
        {
            let order = Arc::clone(&order);
            endpoint.set_on_received(move |_| order.lock().unwrap().push("new"));
        }

        endpoint.run().await;
        peer.await.unwrap();

        assert_eq!(*order.lock().unwrap(), ["new", "old"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (local, mut remote) = pipe_pair();

        let peer = tokio::spawn(async move {
            remote
                .send(&Message::new("dave", MessageIntent::Create, "dave"))
                .await
                .unwrap();
        });

        let endpoint = Endpoint::accept(local).await.unwrap();
        peer.await.unwrap();

        endpoint.close().await;
        assert!(!endpoint.is_connected());
        endpoint.close().await;
        assert!(!endpoint.is_connected());

        // 关闭之后写入失败以哨兵值报告
        assert!(!endpoint.send_text("late").await);
    }

    #[tokio::test]
    async fn test_handshake_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let transport = listener.accept().await.unwrap();
            let endpoint = Endpoint::accept(Connection::new(transport)).await.unwrap();
            assert_eq!(endpoint.username(), "alice");

            // 扮演接受方：回发握手通过，然后收一条聊天消息
            assert!(endpoint.send(&acceptance()).await);
            let message = endpoint.receive().await.unwrap();
            assert_eq!(message.intent(), MessageIntent::Send);
            assert_eq!(message.content(), "hello");
        });

        let config = TransportConfig::default();
        let transport = TcpTransport::connect(&addr.to_string(), &config)
            .await
            .unwrap();
        let endpoint = Endpoint::login(Connection::new(transport), "alice", || None)
            .await
            .unwrap();
        assert!(endpoint.send_text("hello").await);

        server.await.unwrap();
    }
}
