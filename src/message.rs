//! 消息类型定义

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::SYSTEM_AUTHOR;

/// 消息意图，标识一条消息在协议中扮演的角色
///
/// 封闭集合，不携带负载。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIntent {
    /// 申请 / 宣告用户名
    Create,
    /// 普通聊天内容
    Send,
    /// 握手通过
    StatusSuccess,
    /// 握手被拒绝（通常是用户名冲突）
    StatusFailure,
}

/// 一次协议交换的不可变消息：作者、意图、内容
///
/// 相等性和哈希只看 `author` 字段，`intent` 和 `content` 不参与。
/// 这让 SYSTEM 发出的握手拒绝能与同一作者的任何消息判等，
/// 是协议依赖的契约；需要逐字段比较时用 [`Message::same_fields`]。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Message {
    author: String,
    intent: MessageIntent,
    content: String,
}

impl Message {
    pub fn new(
        author: impl Into<String>,
        intent: MessageIntent,
        content: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            intent,
            content: content.into(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn intent(&self) -> MessageIntent {
        self.intent
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// `"author: content"` 显示格式，用于展示和日志
    pub fn raw(&self) -> String {
        format!("{}: {}", self.author, self.content)
    }

    /// 是否为 SYSTEM 发出的握手拒绝
    pub fn is_rejection(&self) -> bool {
        self.author == SYSTEM_AUTHOR && self.intent == MessageIntent::StatusFailure
    }

    /// 三个字段逐一比较
    ///
    /// `PartialEq` 只比较作者，测试编解码往返等需要真正的
    /// 字段相等时用这个。
    pub fn same_fields(&self, other: &Self) -> bool {
        self.author == other.author
            && self.intent == other.intent
            && self.content == other.content
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.author == other.author
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.author.hash(state);
    }
}
