//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly. Every table
//! except `tenants` and `global_opt_outs` carries a row-level-security policy
//! keyed on the `app.current_tenant` session variable; the two global tables
//! are RLS-exempt by design.

diesel::table! {
    /// Platform customers. Global table, no RLS.
    tenants (id) {
        id -> Uuid,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Message recipients, unique per (tenant_id, phone).
    contacts (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        /// Canonical E.164 phone number.
        phone -> Varchar,
        primary_location_id -> Nullable<Uuid>,
        sms_consent -> Bool,
        sms_consent_at -> Nullable<Timestamptz>,
        sms_consent_method -> Nullable<Varchar>,
        email_consent -> Bool,
        sms_opted_out -> Bool,
        sms_opted_out_at -> Nullable<Timestamptz>,
        age_verified -> Bool,
        date_of_birth -> Nullable<Date>,
        tags -> Array<Text>,
        /// Explicit IANA timezone override for quiet hours.
        timezone -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Physical retail sites with their sending identity.
    locations (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        us_state -> Varchar,
        timezone -> Varchar,
        /// Dedicated sending number; unique across the platform when set.
        sms_phone_number -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// One-time broadcasts with aggregate delivery counters.
    campaigns (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        kind -> Varchar,
        sms_content -> Nullable<Text>,
        email_subject -> Nullable<Varchar>,
        email_content -> Nullable<Text>,
        target_location_ids -> Array<Uuid>,
        target_tags -> Array<Text>,
        status -> Varchar,
        total_recipients -> Int4,
        sent_count -> Int4,
        delivered_count -> Int4,
        failed_count -> Int4,
        opened_count -> Int4,
        clicked_count -> Int4,
        opted_out_count -> Int4,
        scheduled_at -> Nullable<Timestamptz>,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Per-send audit rows, outbound and inbound.
    messages (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        contact_id -> Nullable<Uuid>,
        campaign_id -> Nullable<Uuid>,
        kind -> Varchar,
        direction -> Varchar,
        to_address -> Varchar,
        from_address -> Varchar,
        content -> Text,
        segments -> Int4,
        /// Carrier-assigned id; unique across all tenants once set.
        provider_message_id -> Nullable<Varchar>,
        status -> Varchar,
        provider_status -> Nullable<Varchar>,
        error_message -> Nullable<Text>,
        consent_verified_at -> Nullable<Timestamptz>,
        quiet_hours_checked_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        status_updated_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Immutable audit log of consent state changes.
    opt_out_log (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        contact_id -> Nullable<Uuid>,
        channel -> Varchar,
        address -> Varchar,
        action -> Varchar,
        method -> Varchar,
        source_message_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Cross-tenant opt-out table. Global, no RLS.
    global_opt_outs (phone) {
        phone -> Varchar,
        /// Tenant whose recipient first recorded the opt-out.
        source_tenant_id -> Uuid,
        opted_out_at -> Timestamptz,
    }
}
