use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use appointment_cell::models::{AppointmentSource, BookingCandidate, BookingMode, RescheduleAppointmentRequest, TreatmentType};
use appointment_cell::services::{
    AppointmentBookingService, AvailabilityEngine, ConflictGuard, InMemoryAppointmentStore, InProcessCalendarLock,
};
use patient_cell::models::CreatePatientRequest;
use patient_cell::services::{IdentityResolver, InMemoryPatientStore, PatientService};
use reminder_cell::models::{DeliveryStatus, ReminderKind};
use reminder_cell::services::{InMemoryReminderQueue, InMemoryReminderStore, ReminderScheduler};
use shared_config::AppConfig;
use shared_database::cache::InMemoryCache;
use shared_utils::test_utils::local;

struct Wiring {
    booking: AppointmentBookingService,
    patients: Arc<PatientService>,
    scheduler: Arc<ReminderScheduler>,
}

fn wiring() -> Wiring {
    let config = AppConfig::default();
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let patient_store = Arc::new(InMemoryPatientStore::new());
    let cache = Arc::new(InMemoryCache::new());

    let patients = Arc::new(PatientService::new(patient_store.clone()));
    let identity = Arc::new(IdentityResolver::new(patient_store, cache.clone()));
    let lock = Arc::new(InProcessCalendarLock::new(Duration::from_millis(500)));
    let availability = Arc::new(AvailabilityEngine::new(
        appointments.clone(),
        config.clinic.clone(),
        cache,
        lock.clone(),
        Duration::from_secs(60),
    ));
    let guard = ConflictGuard::new(appointments.clone(), lock, availability, config.booking.max_duration_minutes);

    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::new(InMemoryReminderStore::new()),
        Arc::new(InMemoryReminderQueue::new()),
        &config.reminders,
    ));

    let booking = AppointmentBookingService::new(appointments, guard, patients.clone(), identity)
        .with_observer(scheduler.clone());

    Wiring {
        booking,
        patients,
        scheduler,
    }
}

async fn patient(w: &Wiring) -> Uuid {
    w.patients
        .create_patient(CreatePatientRequest {
            name: "佐藤花子".to_string(),
            ..CreatePatientRequest::default()
        })
        .await
        .unwrap()
        .id
}

fn candidate(patient_id: Uuid) -> BookingCandidate {
    BookingCandidate {
        patient_id,
        start_time: local(2030, 1, 16, 10, 0),
        duration_minutes: 30,
        treatment_type: TreatmentType::Checkup,
        notes: None,
        source: AppointmentSource::Manual,
        source_details: None,
    }
}

#[tokio::test]
async fn booking_schedules_reminders() {
    let w = wiring();
    let patient_id = patient(&w).await;

    let appt = w
        .booking
        .book_candidate(candidate(patient_id), BookingMode::Interactive, local(2030, 1, 1, 9, 0))
        .await
        .unwrap();

    let reminders = w.scheduler.reminders_for(appt.id).await.unwrap();
    assert_eq!(reminders.len(), 3);
}

#[tokio::test]
async fn cancelling_clears_pending_reminders() {
    let w = wiring();
    let patient_id = patient(&w).await;
    let appt = w
        .booking
        .book_candidate(candidate(patient_id), BookingMode::Interactive, local(2030, 1, 1, 9, 0))
        .await
        .unwrap();

    w.booking.cancel_appointment(appt.id, Some("体調不良".into())).await.unwrap();

    assert!(w.scheduler.reminders_for(appt.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rescheduling_moves_pending_reminders() {
    let w = wiring();
    let patient_id = patient(&w).await;
    let now = local(2030, 1, 1, 9, 0);
    let appt = w
        .booking
        .book_candidate(candidate(patient_id), BookingMode::Interactive, now)
        .await
        .unwrap();

    w.booking
        .reschedule_appointment(
            appt.id,
            RescheduleAppointmentRequest {
                start_time: local(2030, 1, 17, 15, 0),
                duration_minutes: None,
            },
            now,
        )
        .await
        .unwrap();

    let reminders = w.scheduler.reminders_for(appt.id).await.unwrap();
    let one_day = reminders.iter().find(|r| r.kind == ReminderKind::OneDayBefore).unwrap();
    assert_eq!(one_day.scheduled_at, local(2030, 1, 16, 15, 0));
    assert!(reminders.iter().all(|r| r.delivery_status == DeliveryStatus::Pending));
}
