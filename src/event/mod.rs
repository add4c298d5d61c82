//! 迁移事件模块
//!
//! 包含迁移事件的数据结构和同步通知器。

pub mod event;
pub mod notifier;

pub use event::{TransitionEvent, TransitionEventKind};
pub use notifier::{NotifierStats, SubscriptionId, TransitionListener, TransitionNotifier};
