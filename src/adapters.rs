pub mod certificates;
pub use certificates::{CertificateService, StoreCertificateService};
pub mod eligibility;
pub use eligibility::{Eligibility, EligibilityPolicy, StandardEligibilityPolicy};
pub mod product_catalog;
pub use product_catalog::ProductCatalog;
pub mod subscription_store;
pub use subscription_store::{HostedCatalog, SubscriptionStore};
