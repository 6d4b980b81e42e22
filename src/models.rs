pub mod consumer;
pub mod entitlement;
pub mod event;
pub mod job;
pub mod owner;
pub mod pool;
pub mod product;
pub mod subscription;

pub use consumer::{Consumer, ConsumerType};
pub use entitlement::Entitlement;
pub use event::{PoolEvent, PoolEventType};
pub use job::{JobKind, JobState, JobStatus};
pub use owner::Owner;
pub use pool::{Pool, PoolKey, PoolKind, UNLIMITED};
pub use product::{attrs, Product};
pub use subscription::Subscription;
