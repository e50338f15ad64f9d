//! 消息类型定义
//!
//! 线上信封格式（双向一致）:
//!
//! ```text
//! { "subject": <string>, "correlationId": <string|null>, "data": <任意 JSON> }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// 关联 ID：把一次调用和它的回复绑定在一起
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// 生成新的关联 ID（UUID v4，128 位随机）
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 主题，不能为空
    pub subject: String,
    /// 请求和回复携带关联 ID；推送通知为 null
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<CorrelationId>,
    /// 负载，核心层不解析
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// 构造一个请求信封
    pub fn request(subject: impl Into<String>, correlation_id: CorrelationId, data: Value) -> Self {
        Self {
            subject: subject.into(),
            correlation_id: Some(correlation_id),
            data,
        }
    }

    /// 构造一个推送通知（无关联 ID）
    pub fn push(subject: impl Into<String>, data: Value) -> Self {
        Self {
            subject: subject.into(),
            correlation_id: None,
            data,
        }
    }

    /// 以相同主题和关联 ID 构造回复
    pub fn reply(&self, data: Value) -> Self {
        Self {
            subject: self.subject.clone(),
            correlation_id: self.correlation_id.clone(),
            data,
        }
    }

    /// 是否是推送通知
    pub fn is_push(&self) -> bool {
        self.correlation_id.is_none()
    }

    /// 分发键：推送为 `subject`，回复为 `subject:correlationId`
    pub fn dispatch_key(&self) -> String {
        match &self.correlation_id {
            Some(id) => format!("{}:{}", self.subject, id),
            None => self.subject.clone(),
        }
    }

    /// 编码为线上格式
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.subject.is_empty() {
            return Err(ProtocolError::InvalidEnvelope("empty subject".to_string()));
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// 从线上格式解码
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.subject.is_empty() {
            return Err(ProtocolError::InvalidEnvelope("empty subject".to_string()));
        }
        Ok(envelope)
    }
}
