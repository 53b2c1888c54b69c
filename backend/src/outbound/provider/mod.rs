//! Carrier adapters implementing the `SmsProvider` port.

mod dto;
mod telnyx;

pub use telnyx::{TelnyxProvider, TelnyxProviderConfig};
