//! 推送订阅表

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, RpcError};

/// 推送回调
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    subject: String,
    id: u64,
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.subject, self.id)
    }
}

/// 有上限的订阅表
///
/// 同一主题的回调按注册顺序保存和调用。
pub struct SubscriberRegistry {
    subjects: HashMap<String, Vec<(u64, Callback)>>,
    next_id: u64,
    max_per_subject: usize,
}

impl SubscriberRegistry {
    pub fn new(max_per_subject: usize) -> Self {
        Self {
            subjects: HashMap::new(),
            next_id: 1,
            max_per_subject,
        }
    }

    /// 注册回调
    pub fn subscribe(&mut self, subject: &str, callback: Callback) -> Result<SubscriptionHandle> {
        if subject.is_empty() {
            return Err(RpcError::InvalidSubject);
        }

        let entries = self.subjects.entry(subject.to_string()).or_default();
        if entries.len() >= self.max_per_subject {
            return Err(RpcError::TooManySubscribers {
                subject: subject.to_string(),
                max: self.max_per_subject,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        entries.push((id, callback));

        Ok(SubscriptionHandle {
            subject: subject.to_string(),
            id,
        })
    }

    /// 取消订阅，句柄无效时返回 false
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> bool {
        let Some(entries) = self.subjects.get_mut(&handle.subject) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(id, _)| *id != handle.id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            self.subjects.remove(&handle.subject);
        }
        removed
    }

    /// 分发时使用的订阅者快照
    pub fn snapshot(&self, subject: &str) -> Vec<Callback> {
        self.subjects
            .get(subject)
            .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, subject: &str) -> usize {
        self.subjects.get(subject).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Callback {
        let log = log.clone();
        let tag = tag.to_string();
        Arc::new(move |value: &Value| log.lock().unwrap().push(format!("{}={}", tag, value)))
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new(8);
        registry.subscribe("board", recorder(&log, "a")).unwrap();
        registry.subscribe("board", recorder(&log, "b")).unwrap();
        registry.subscribe("other", recorder(&log, "c")).unwrap();

        for cb in registry.snapshot("board") {
            cb(&json!(1));
        }
        assert_eq!(*log.lock().unwrap(), vec!["a=1", "b=1"]);
    }

    #[test]
    fn test_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new(8);
        let a = registry.subscribe("board", recorder(&log, "a")).unwrap();
        let b = registry.subscribe("board", recorder(&log, "b")).unwrap();

        assert!(registry.unsubscribe(&a));
        assert!(!registry.unsubscribe(&a));
        assert_eq!(registry.count("board"), 1);

        assert!(registry.unsubscribe(&b));
        assert_eq!(registry.count("board"), 0);
        assert!(registry.snapshot("board").is_empty());
    }

    #[test]
    fn test_bounded_per_subject() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new(2);
        registry.subscribe("board", recorder(&log, "a")).unwrap();
        registry.subscribe("board", recorder(&log, "b")).unwrap();

        let err = registry.subscribe("board", recorder(&log, "c")).unwrap_err();
        assert_eq!(
            err,
            RpcError::TooManySubscribers {
                subject: "board".to_string(),
                max: 2
            }
        );
        // 其它主题不受影响
        assert!(registry.subscribe("moves", recorder(&log, "d")).is_ok());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new(2);
        assert_eq!(
            registry.subscribe("", recorder(&log, "a")).unwrap_err(),
            RpcError::InvalidSubject
        );
    }
}
