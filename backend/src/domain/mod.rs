//! Domain core: entities, policy engines, orchestration services, and ports.

pub mod campaign;
pub mod campaign_expander;
pub mod compliance;
pub mod contact;
pub mod delivery_worker;
pub mod error;
pub mod location;
pub mod message;
pub mod opt_out;
pub mod phone;
pub mod ports;
pub mod quiet_hours;
pub mod reconciler;
pub mod send_service;
pub mod tenant;

pub use error::{Error, ErrorCode};
pub use tenant::TenantId;
