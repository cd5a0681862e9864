mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use appointment_cell::models::{AppointmentError, BookingMode};
use common::{before_fixtures, candidate, local, TestContext};

fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

#[tokio::test]
async fn booked_afternoon_and_lunch_are_excluded() {
    let ctx = TestContext::new();
    let patient = ctx.patient("山田太郎").await;
    ctx.booking
        .book_candidate(candidate(patient, local(2025, 1, 15, 14, 30), 30), BookingMode::Interactive, before_fixtures())
        .await
        .unwrap();

    let slots = ctx.availability.available_slots(wednesday(), 30).await.unwrap();
    let labels: Vec<&str> = slots.iter().map(|s| s.label.as_str()).collect();

    assert!(labels.contains(&"09:00-09:30"));
    assert!(labels.contains(&"14:00-14:30"));
    assert!(!labels.contains(&"14:30-15:00"));
    assert!(labels.contains(&"15:00-15:30"));
    assert!(!labels.iter().any(|l| l.starts_with("12:")));
    assert!(slots.windows(2).all(|w| w[0].start_time < w[1].start_time));
}

#[tokio::test]
async fn booking_an_offered_slot_removes_it() {
    let ctx = TestContext::new();
    let patient = ctx.patient("佐藤花子").await;
    let other = ctx.patient("山田太郎").await;

    let before = ctx.availability.available_slots(wednesday(), 45).await.unwrap();
    let chosen = before[3].clone();

    ctx.booking
        .book_candidate(candidate(patient, chosen.start_time, 45), BookingMode::Interactive, before_fixtures())
        .await
        .unwrap();

    let after = ctx.availability.available_slots(wednesday(), 45).await.unwrap();
    assert!(!after.contains(&chosen));
    assert!(after.iter().all(|slot| !slot.interval().overlaps(&chosen.interval())));
    assert_matches!(
        ctx.booking
            .book_candidate(candidate(other, chosen.start_time, 45), BookingMode::Interactive, before_fixtures())
            .await,
        Err(AppointmentError::SlotConflict { .. })
    );
}

#[tokio::test]
async fn cancellation_reopens_the_slot() {
    let ctx = TestContext::new();
    let patient = ctx.patient("佐藤花子").await;

    let appointment = ctx
        .booking
        .book_candidate(candidate(patient, local(2025, 1, 15, 10, 0), 30), BookingMode::Interactive, before_fixtures())
        .await
        .unwrap();
    let while_booked = ctx.availability.available_slots(wednesday(), 30).await.unwrap();
    assert!(!while_booked.iter().any(|s| s.label == "10:00-10:30"));

    ctx.booking.cancel_appointment(appointment.id, None).await.unwrap();

    let reopened = ctx.availability.available_slots(wednesday(), 30).await.unwrap();
    assert!(reopened.iter().any(|s| s.label == "10:00-10:30"));
}

#[tokio::test]
async fn every_offered_slot_is_bookable() {
    let ctx = TestContext::new();
    let blocker = ctx.patient("先約").await;
    ctx.booking
        .book_candidate(candidate(blocker, local(2025, 1, 15, 11, 15), 30), BookingMode::Interactive, before_fixtures())
        .await
        .unwrap();

    let booked = ctx.booking.appointments_on(wednesday()).await.unwrap();
    for slot in ctx.availability.available_slots(wednesday(), 60).await.unwrap() {
        assert!(ctx.availability.within_business_hours(slot.start_time, 60), "{}", slot.label);
        assert!(booked.iter().all(|a| !a.interval().overlaps(&slot.interval())), "{}", slot.label);
    }
}

#[tokio::test]
async fn closed_day_and_lunch_are_not_available() {
    let ctx = TestContext::new();
    let sunday = NaiveDate::from_ymd_opt(2025, 1, 19).unwrap();

    assert!(ctx.availability.available_slots(sunday, 30).await.unwrap().is_empty());
    assert!(!ctx.availability.within_business_hours(local(2025, 1, 19, 10, 0), 30));
    assert!(!ctx.availability.within_business_hours(local(2025, 1, 15, 12, 0), 30));
    assert!(!ctx.availability.within_business_hours(local(2025, 1, 15, 11, 45), 30));
    assert!(ctx.availability.within_business_hours(local(2025, 1, 15, 13, 0), 30));
    assert!(!ctx.availability.within_business_hours(local(2025, 1, 15, 13, 0), 0));
}

#[tokio::test]
async fn booking_during_a_slot_computation_is_not_cached_over() {
    let ctx = TestContext::new();
    let patient = ctx.patient("佐藤花子").await;

    // The reader parks after taking the day, before reading appointments.
    ctx.store.arm();
    let availability = ctx.availability.clone();
    let reader = tokio::spawn(async move { availability.available_slots(wednesday(), 30).await });
    ctx.store.wait_until_parked().await;

    let booking = ctx.booking.clone();
    let writer = tokio::spawn(async move {
        booking
            .book_candidate(candidate(patient, local(2025, 1, 15, 10, 0), 30), BookingMode::Interactive, before_fixtures())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.store.resume();

    let computed_before = reader.await.unwrap().unwrap();
    assert!(computed_before.iter().any(|s| s.label == "10:00-10:30"));
    writer.await.unwrap().unwrap();

    let after = ctx.availability.available_slots(wednesday(), 30).await.unwrap();
    assert!(!after.iter().any(|s| s.label == "10:00-10:30"));
}
