// libs/appointment-cell/src/stores/supabase.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, CustomerVoucher, Service, Voucher,
};
use crate::stores::{
    AppointmentFilter, AppointmentStore, CapabilityProvider, CustomerVoucherStore, VoucherStore,
};

const APPOINTMENT_SELECT: &str = "select=*,details:appointment_details(*)";

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn status_list(filter: &AppointmentFilter) -> String {
    filter
        .statuses
        .iter()
        .map(|status| status.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    service_token: String,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>, service_token: String) -> Self {
        Self { supabase, service_token }
    }

    fn build_query(&self, filter: &AppointmentFilter, limit: usize) -> String {
        let mut query_parts = vec![
            APPOINTMENT_SELECT.to_string(),
            "deleted_at=is.null".to_string(),
        ];

        if !filter.statuses.is_empty() {
            query_parts.push(format!("status=in.({})", status_list(filter)));
        }
        if filter.doctor_unassigned {
            query_parts.push("doctor_id=is.null".to_string());
        }
        if filter.has_voucher {
            query_parts.push("voucher_id=not.is.null".to_string());
        }
        if filter.zero_deposit {
            query_parts.push("deposit_amount=eq.0".to_string());
        }
        if let Some(before) = filter.starts_before {
            query_parts.push(format!("start_time=lt.{}", before.to_rfc3339()));
        }
        if let Some((from, to)) = filter.starts_within {
            query_parts.push(format!("start_time=gte.{}", from.to_rfc3339()));
            query_parts.push(format!("start_time=lte.{}", to.to_rfc3339()));
        }
        if let Some(before) = filter.created_before {
            query_parts.push(format!("created_at=lt.{}", before.to_rfc3339()));
        }

        query_parts.push("order=created_at.asc".to_string());
        query_parts.push(format!("limit={}", limit));

        format!("/rest/v1/appointments?{}", query_parts.join("&"))
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(&self.service_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_batch(
        &self,
        filter: &AppointmentFilter,
        limit: usize,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = self.build_query(filter, limit);
        debug!("Fetching appointment batch: {}", path);
        self.fetch(&path).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?{}&id=eq.{}", APPOINTMENT_SELECT, id);
        let mut rows = self.fetch(&path).await?;
        if rows.is_empty() {
            return Err(AppointmentError::NotFound);
        }
        Ok(rows.remove(0))
    }

    async fn find_for_doctor_in_range(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        // Half-open interval intersection, expressed at the query level.
        let path = format!(
            "/rest/v1/appointments?{}&doctor_id=eq.{}&start_time=lt.{}&end_time=gt.{}&deleted_at=is.null&order=start_time.asc",
            APPOINTMENT_SELECT,
            doctor_id,
            end.to_rfc3339(),
            start.to_rfc3339(),
        );
        self.fetch(&path).await
    }

    async fn save(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);

        // Only the mutable columns; detail lines are immutable after booking.
        let body = json!({
            "doctor_id": appointment.doctor_id,
            "staff_id": appointment.staff_id,
            "status": appointment.status,
            "deposit_amount": appointment.deposit_amount,
            "order_code": appointment.order_code,
            "payment_method": appointment.payment_method,
            "cancelled_at": appointment.cancelled_at,
            "cancel_reason": appointment.cancel_reason,
            "rejection_reason": appointment.rejection_reason,
            "updated_at": appointment.updated_at,
            "deleted_at": appointment.deleted_at,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&self.service_token),
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        Ok(())
    }
}

/// Reads the service -> qualified-doctor relations for an appointment's lines.
pub struct SupabaseCapabilityProvider {
    supabase: Arc<SupabaseClient>,
    service_token: String,
}

impl SupabaseCapabilityProvider {
    pub fn new(supabase: Arc<SupabaseClient>, service_token: String) -> Self {
        Self { supabase, service_token }
    }
}

#[async_trait]
impl CapabilityProvider for SupabaseCapabilityProvider {
    async fn services_for(
        &self,
        appointment: &Appointment,
    ) -> Result<Vec<Service>, AppointmentError> {
        let service_ids = appointment.service_ids();
        if service_ids.is_empty() {
            return Ok(vec![]);
        }

        let id_list = service_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let path = format!(
            "/rest/v1/services?select=*,doctors(*)&id=in.({})",
            id_list
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.service_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Service>, _>>()
            .map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse services: {}", e))
            })
    }
}

pub struct SupabaseVoucherStore {
    supabase: Arc<SupabaseClient>,
    service_token: String,
}

impl SupabaseVoucherStore {
    pub fn new(supabase: Arc<SupabaseClient>, service_token: String) -> Self {
        Self { supabase, service_token }
    }
}

#[async_trait]
impl VoucherStore for SupabaseVoucherStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, AppointmentError> {
        let path = format!("/rest/v1/vouchers?id=eq.{}", id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.service_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row).map(Some).map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse voucher: {}", e))
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CustomerVoucherStore for SupabaseVoucherStore {
    async fn find_active(
        &self,
        customer_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<Option<CustomerVoucher>, AppointmentError> {
        let path = format!(
            "/rest/v1/customer_vouchers?customer_id=eq.{}&voucher_id=eq.{}&is_used=eq.true&limit=1",
            customer_id, voucher_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.service_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row).map(Some).map_err(|e| {
                AppointmentError::DatabaseError(format!("Failed to parse customer voucher: {}", e))
            }),
            None => Ok(None),
        }
    }

    async fn mark_unused(&self, id: Uuid) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/customer_vouchers?id=eq.{}", id);
        let body = json!({
            "is_used": false,
            "used_at": null,
        });

        let _result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&self.service_token),
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
