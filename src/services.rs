pub mod pool_computer;
pub mod pool_selector;
pub mod host_pools;
pub mod refresh_service;
pub use refresh_service::{RefreshOptions, RefreshReport, RefreshService};
pub mod revocation_service;
pub use revocation_service::{RevocationReport, RevocationService};
pub mod entitler_service;
pub use entitler_service::{AutohealReport, BindSettings, EntitlerService};
pub mod consumer_service;
pub use consumer_service::{ConsumerService, GuestUpdateReport, NewConsumer};
pub mod owner_service;
pub use owner_service::{OwnerDeletion, OwnerService};
pub mod job_service;
pub use job_service::{JobRunner, JobService};
