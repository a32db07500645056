//! External system integrations for chartsync.
//!
//! Every collaborator the pipeline talks to sits behind an `async_trait`
//! interface with one HTTP implementation:
//!
//! - [`source`] - source EHR reads ([`SourceEhr`])
//! - [`target`] - target clinical-data store writes and searches ([`TargetStore`])
//! - [`bus`] - message bus topics and publishing ([`MessageBus`])
//! - [`tenants`] - tenant configuration ([`TenantDirectory`])
//! - [`sessions`] - live provider sessions ([`SessionStore`])
//! - [`tokens`] - system credential token issuance ([`TokenIssuer`])
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate external dependencies and
//! allow the core to be tested with in-memory implementations. Adapter errors
//! never expose `reqwest` types; they are mapped onto the domain error enums.
//!
//! ```rust,no_run
//! use chartsync::adapters::target::{FhirTargetClient, TargetStore};
//! use chartsync::config::load_config;
//! use chartsync::domain::TenantId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("chartsync.toml")?;
//! let store = FhirTargetClient::new(&config.target)?;
//! let tenant = TenantId::new("acme")?;
//! let lists = store
//!     .search_resources(&tenant, "List", &[("_tag".into(), "original-source-id|enc-77".into())])
//!     .await?;
//! println!("{} linking resources", lists.len());
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod http;
pub mod sessions;
pub mod source;
pub mod target;
pub mod tenants;
pub mod tokens;

pub use bus::{BusMessage, MessageBus, PubSubBus};
pub use sessions::{HttpSessionStore, NoSessions, SessionStore};
pub use source::{FhirSourceClient, SourceEhr};
pub use target::{FhirTargetClient, TargetStore};
pub use tenants::{ConfigTenantDirectory, TenantDirectory};
pub use tokens::{ClientCredentialsIssuer, IssuedToken, TokenIssuer};
