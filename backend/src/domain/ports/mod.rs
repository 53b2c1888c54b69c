//! Domain ports and supporting types for the hexagonal boundary.

mod campaign_repository;
mod contact_repository;
mod delivery_queue;
mod location_repository;
mod message_repository;
mod opt_out_repository;
mod sms_provider;
mod state_rules;

#[cfg(test)]
pub use campaign_repository::MockCampaignRepository;
pub use campaign_repository::{CampaignRepository, CampaignRepositoryError};
#[cfg(test)]
pub use contact_repository::MockContactRepository;
pub use contact_repository::{ContactRepository, ContactRepositoryError};
#[cfg(test)]
pub use delivery_queue::MockDeliveryQueue;
pub use delivery_queue::{
    Backoff, CampaignJobPayload, DeliveryQueue, EnqueueOptions, JobHandler, JobId, JobKind,
    JobOutcome, QueueError, QueueJob, RecordingDeliveryQueue, SmsJobPayload,
};
#[cfg(test)]
pub use location_repository::MockLocationRepository;
pub use location_repository::{LocationHandle, LocationRepository, LocationRepositoryError};
#[cfg(test)]
pub use message_repository::MockMessageRepository;
pub use message_repository::{
    AppliedStatus, MessageRepository, MessageRepositoryError, NewInboundSms, NewOutboundSms,
    StatusUpdate,
};
#[cfg(test)]
pub use opt_out_repository::MockOptOutRepository;
pub use opt_out_repository::{OptOutRepository, OptOutRepositoryError};
#[cfg(test)]
pub use sms_provider::MockSmsProvider;
pub use sms_provider::{ProviderReceipt, SenderIdentity, SmsProvider, SmsProviderError};
pub use state_rules::{NoStateRules, StateRuleSet};
