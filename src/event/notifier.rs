//! 迁移事件通知器
//!
//! 发布-订阅式的迁移事件广播器。
//!
//! # 分发语义
//!
//! - **同步分发**: 在调用 `publish` 的线程上按订阅顺序依次调用监听器
//! - **订阅者隔离**: 监听器返回错误或 panic 不影响后续监听器
//! - **先收集后报告**: 整轮分发结束后统一返回失败列表
//!
//! # 使用示例
//!
//! ```rust
//! use bundle_core::event::TransitionNotifier;
//!
//! let notifier = TransitionNotifier::new();
//! let id = notifier.subscribe("console", |event| {
//!     println!("{} -> {}", event.module_id, event.to_state);
//!     Ok(())
//! });
//! notifier.unsubscribe(id).unwrap();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::event::event::TransitionEvent;
use crate::utils::{CoreError, Result};

/// 订阅标识
pub type SubscriptionId = u64;

/// 监听器类型
///
/// 返回 `Err` 表示处理失败，失败原因会在本轮分发结束后报告给发布者。
pub type TransitionListener =
    Arc<dyn Fn(&TransitionEvent) -> std::result::Result<(), String> + Send + Sync>;

/// 内部订阅条目
#[derive(Clone)]
struct ListenerEntry {
    id: SubscriptionId,
    subscriber: String,
    listener: TransitionListener,
}

/// 分发统计信息
#[derive(Debug, Clone, Default)]
pub struct NotifierStats {
    /// 已发布事件数
    pub published: u64,

    /// 成功投递次数
    pub delivered: u64,

    /// 监听器失败次数
    pub failed: u64,

    /// 最后发布时间
    pub last_publish_at: Option<DateTime<Utc>>,
}

/// 迁移事件通知器
///
/// 克隆出的实例共享同一份订阅列表。
#[derive(Clone, Default)]
pub struct TransitionNotifier {
    /// 订阅列表（按订阅顺序）
    listeners: Arc<RwLock<Vec<ListenerEntry>>>,

    /// 下一个订阅标识
    next_id: Arc<AtomicU64>,

    /// 分发统计
    stats: Arc<Mutex<NotifierStats>>,
}

impl TransitionNotifier {
    /// 创建新的通知器
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅迁移事件
    ///
    /// # 参数
    ///
    /// * `subscriber` - 订阅者名称，仅用于日志
    /// * `listener` - 监听器
    pub fn subscribe<F>(&self, subscriber: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&TransitionEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let subscriber = subscriber.into();

        debug!(subscription_id = id, subscriber = %subscriber, "迁移事件订阅成功");

        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry {
                id,
                subscriber,
                listener: Arc::new(listener),
            });
        id
    }

    /// 取消订阅
    ///
    /// # 错误
    ///
    /// 如果订阅不存在，返回 `CoreError::SubscriptionNotFound`
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);

        if listeners.len() == before {
            return Err(CoreError::SubscriptionNotFound(id));
        }

        debug!(subscription_id = id, "取消订阅成功");
        Ok(())
    }

    /// 取消某个订阅者的所有订阅
    ///
    /// # 返回
    ///
    /// 返回取消的订阅数量
    pub fn unsubscribe_all(&self, subscriber: &str) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|entry| entry.subscriber != subscriber);
        before - listeners.len()
    }

    /// 发布事件
    ///
    /// 监听器列表先在锁内复制，分发过程中不持有锁，
    /// 因此监听器内部可以安全地订阅或取消订阅。
    ///
    /// # 返回
    ///
    /// 全部成功时返回投递的监听器数量
    ///
    /// # 错误
    ///
    /// 任一监听器失败时，在整轮分发结束后返回 `CoreError::ListenerFailures`
    pub fn publish(&self, event: &TransitionEvent) -> Result<usize> {
        let listeners: Vec<ListenerEntry> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        trace!(
            sequence = event.sequence,
            module_id = %event.module_id,
            transition = %event.transition,
            listeners = listeners.len(),
            "发布迁移事件"
        );

        let mut delivered = 0;
        let mut failures = Vec::new();

        for entry in &listeners {
            let listener = entry.listener.clone();
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)));

            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(reason)) => {
                    warn!(
                        subscription_id = entry.id,
                        subscriber = %entry.subscriber,
                        error = %reason,
                        "监听器处理失败"
                    );
                    failures.push((entry.id, reason));
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(
                        subscription_id = entry.id,
                        subscriber = %entry.subscriber,
                        error = %reason,
                        "监听器 panic"
                    );
                    failures.push((entry.id, reason));
                }
            }
        }

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.published += 1;
            stats.delivered += delivered as u64;
            stats.failed += failures.len() as u64;
            stats.last_publish_at = Some(Utc::now());
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(CoreError::ListenerFailures {
                sequence: event.sequence,
                delivered,
                failures,
            })
        }
    }

    /// 获取订阅数量
    pub fn subscription_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 获取分发统计信息副本
    pub fn stats(&self) -> NotifierStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 重置统计信息
    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = NotifierStats::default();
    }
}

impl std::fmt::Debug for TransitionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionNotifier")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// 提取 panic 负载中的文本
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("监听器 panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("监听器 panic: {}", s)
    } else {
        "监听器 panic".to_string()
    }
}
