use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Clinic-local wall-clock instant for fixtures.
pub fn local(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_row(id: Uuid, name: &str, email: Option<&str>, phone: Option<&str>) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "name_kana": null,
            "email": email,
            "phone": phone,
            "external_messaging_id": null,
            "birth_date": null,
            "address": null,
            "insurance_info": null,
            "notes": null,
            "merged_to": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "discarded_at": null
        })
    }

    pub fn appointment_row(id: Uuid, patient_id: Uuid, start_time: &str, duration_minutes: u32) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "start_time": start_time,
            "duration_minutes": duration_minutes,
            "treatment_type": "consultation",
            "status": "booked",
            "notes": null,
            "source": "manual",
            "source_details": null,
            "cancellation_reason": null,
            "cancelled_at": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "discarded_at": null
        })
    }

    pub fn error_response(message: &str) -> serde_json::Value {
        json!({
            "message": message,
            "details": null,
            "hint": null,
            "code": "23505"
        })
    }
}
