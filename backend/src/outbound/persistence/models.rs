//! Row structs bridging Diesel and the domain entities.
//!
//! Read rows derive `Queryable`/`Selectable`; insert rows derive `Insertable`
//! and borrow their string fields. Enum columns are stored as their stable
//! string forms and parsed on read; a value the domain cannot parse surfaces
//! as a query error rather than a silent default.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{campaigns, contacts, global_opt_outs, locations, messages, opt_out_log};
use crate::domain::campaign::{
    Campaign, CampaignCounters, CampaignId, CampaignTargeting,
};
use crate::domain::contact::{Contact, ContactId};
use crate::domain::location::{Location, LocationId};
use crate::domain::message::{Message, MessageId};
use crate::domain::tenant::TenantId;

/// Read row for `contacts`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = contacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContactRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone: String,
    pub primary_location_id: Option<Uuid>,
    pub sms_consent: bool,
    pub sms_consent_at: Option<DateTime<Utc>>,
    pub sms_consent_method: Option<String>,
    pub email_consent: bool,
    pub sms_opted_out: bool,
    pub sms_opted_out_at: Option<DateTime<Utc>>,
    pub age_verified: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub timezone: Option<String>,
}

/// Convert a contact row to its domain entity.
pub fn contact_from_row(row: ContactRow) -> Result<Contact, String> {
    let sms_consent_method = row
        .sms_consent_method
        .as_deref()
        .map(str::parse)
        .transpose()?;
    Ok(Contact {
        id: ContactId::from_uuid(row.id),
        phone: row.phone,
        primary_location_id: row.primary_location_id.map(LocationId::from_uuid),
        sms_consent: row.sms_consent,
        sms_consent_at: row.sms_consent_at,
        sms_consent_method,
        email_consent: row.email_consent,
        sms_opted_out: row.sms_opted_out,
        sms_opted_out_at: row.sms_opted_out_at,
        age_verified: row.age_verified,
        date_of_birth: row.date_of_birth,
        tags: row.tags,
        timezone: row.timezone,
    })
}

/// Read row for `locations`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = locations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LocationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub us_state: String,
    pub timezone: String,
    pub sms_phone_number: Option<String>,
}

impl LocationRow {
    /// The owning tenant, needed by inbound number resolution.
    pub fn tenant(&self) -> TenantId {
        TenantId::from_uuid(self.tenant_id)
    }
}

/// Convert a location row to its domain entity.
pub fn location_from_row(row: LocationRow) -> Location {
    Location {
        id: LocationId::from_uuid(row.id),
        name: row.name,
        us_state: row.us_state,
        timezone: row.timezone,
        sms_phone_number: row.sms_phone_number,
    }
}

/// Read row for `campaigns`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = campaigns)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CampaignRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: String,
    pub sms_content: Option<String>,
    pub email_subject: Option<String>,
    pub email_content: Option<String>,
    pub target_location_ids: Vec<Uuid>,
    pub target_tags: Vec<String>,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub opted_out_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Cast a database counter to the domain's unsigned form.
#[expect(
    clippy::cast_sign_loss,
    reason = "counters are non-negative in the database"
)]
fn counter(value: i32) -> u32 {
    value as u32
}

/// Convert a campaign row to its domain entity.
pub fn campaign_from_row(row: CampaignRow) -> Result<Campaign, String> {
    Ok(Campaign {
        id: CampaignId::from_uuid(row.id),
        kind: row.kind.parse()?,
        sms_content: row.sms_content,
        email_subject: row.email_subject,
        email_content: row.email_content,
        targeting: CampaignTargeting {
            location_ids: row
                .target_location_ids
                .into_iter()
                .map(LocationId::from_uuid)
                .collect(),
            tags: row.target_tags,
        },
        status: row.status.parse()?,
        counters: CampaignCounters {
            total_recipients: counter(row.total_recipients),
            sent: counter(row.sent_count),
            delivered: counter(row.delivered_count),
            failed: counter(row.failed_count),
            opened: counter(row.opened_count),
            clicked: counter(row.clicked_count),
            opted_out: counter(row.opted_out_count),
        },
        scheduled_at: row.scheduled_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

/// Read row for `messages`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub kind: String,
    pub direction: String,
    pub to_address: String,
    pub from_address: String,
    pub content: String,
    pub segments: i32,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub provider_status: Option<String>,
    pub error_message: Option<String>,
    pub consent_verified_at: Option<DateTime<Utc>>,
    pub quiet_hours_checked_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Convert a message row to its domain entity.
pub fn message_from_row(row: MessageRow) -> Result<Message, String> {
    Ok(Message {
        id: MessageId::from_uuid(row.id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        contact_id: row.contact_id.map(ContactId::from_uuid),
        campaign_id: row.campaign_id.map(CampaignId::from_uuid),
        kind: row.kind.parse()?,
        direction: row.direction.parse()?,
        to_address: row.to_address,
        from_address: row.from_address,
        content: row.content,
        segments: row.segments,
        provider_message_id: row.provider_message_id,
        status: row.status.parse()?,
        provider_status: row.provider_status,
        error_message: row.error_message,
        consent_verified_at: row.consent_verified_at,
        quiet_hours_checked_at: row.quiet_hours_checked_at,
        delivered_at: row.delivered_at,
        status_updated_at: row.status_updated_at,
        created_at: row.created_at,
    })
}

/// Insert row for `messages`.
#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub kind: &'a str,
    pub direction: &'a str,
    pub to_address: &'a str,
    pub from_address: &'a str,
    pub content: &'a str,
    pub segments: i32,
    pub provider_message_id: Option<&'a str>,
    pub status: &'a str,
    pub consent_verified_at: Option<DateTime<Utc>>,
    pub quiet_hours_checked_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insert row for `opt_out_log`.
#[derive(Debug, Insertable)]
#[diesel(table_name = opt_out_log)]
pub struct NewOptOutLogRow<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub channel: &'a str,
    pub address: &'a str,
    pub action: &'a str,
    pub method: &'a str,
    pub source_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Insert row for `global_opt_outs`.
#[derive(Debug, Insertable)]
#[diesel(table_name = global_opt_outs)]
pub struct NewGlobalOptOutRow<'a> {
    pub phone: &'a str,
    pub source_tenant_id: Uuid,
    pub opted_out_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn message_row() -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            contact_id: None,
            campaign_id: None,
            kind: "sms".to_string(),
            direction: "outbound".to_string(),
            to_address: "+14155551212".to_string(),
            from_address: "+14155550100".to_string(),
            content: "hello".to_string(),
            segments: 1,
            provider_message_id: None,
            status: "queued".to_string(),
            provider_status: None,
            error_message: None,
            consent_verified_at: None,
            quiet_hours_checked_at: None,
            delivered_at: None,
            status_updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[rstest]
    fn message_row_converts_cleanly() {
        let message = message_from_row(message_row()).expect("conversion succeeds");
        assert_eq!(message.status, crate::domain::message::MessageStatus::Queued);
        assert_eq!(
            message.direction,
            crate::domain::message::MessageDirection::Outbound
        );
    }

    #[rstest]
    fn unknown_status_in_row_is_an_error() {
        let mut row = message_row();
        row.status = "vanished".to_string();
        assert!(message_from_row(row).is_err());
    }

    #[rstest]
    fn campaign_counters_cast_to_unsigned() {
        let row = CampaignRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            kind: "sms".to_string(),
            sms_content: Some("sale".to_string()),
            email_subject: None,
            email_content: None,
            target_location_ids: vec![],
            target_tags: vec!["vip".to_string()],
            status: "sending".to_string(),
            total_recipients: 10,
            sent_count: 4,
            delivered_count: 3,
            failed_count: 1,
            opened_count: 0,
            clicked_count: 0,
            opted_out_count: 2,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        };

        let campaign = campaign_from_row(row).expect("conversion succeeds");
        assert_eq!(campaign.counters.total_recipients, 10);
        assert_eq!(campaign.counters.opted_out, 2);
        assert_eq!(campaign.targeting.tags, vec!["vip".to_string()]);
    }

    #[rstest]
    fn unknown_consent_method_is_an_error() {
        let row = ContactRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            phone: "+14155551212".to_string(),
            primary_location_id: None,
            sms_consent: true,
            sms_consent_at: Some(Utc::now()),
            sms_consent_method: Some("carrier_pigeon".to_string()),
            email_consent: false,
            sms_opted_out: false,
            sms_opted_out_at: None,
            age_verified: true,
            date_of_birth: None,
            tags: vec![],
            timezone: None,
        };

        assert!(contact_from_row(row).is_err());
    }
}
