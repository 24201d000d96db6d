//! Shared value types passed across the backend contract

pub mod page;
pub mod subscription;
pub mod transaction;

pub use page::{next_offset_cursor, KeyPage, MapPage, DEFAULT_SCAN_PAGE_SIZE};
pub use subscription::{
    delivery_channel, Delivery, DeliverySender, Subscription, SubscriptionCanceller,
    SUBSCRIPTION_BUFFER,
};
pub use transaction::{Transaction, TxOp};
