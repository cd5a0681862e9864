use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

/// Every allowed status move. Anything absent from this table is refused.
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    use crate::models::AppointmentStatus::*;

    match current {
        Proposed => &[Booked, Cancelled],
        Booked => &[Visited, Cancelled, NoShow],
        Visited => &[Completed],
        Completed => &[Paid],
        Cancelled | NoShow | Paid => &[],
    }
}

pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    valid_transitions(from).contains(&to)
}

pub fn is_terminal(status: AppointmentStatus) -> bool {
    valid_transitions(status).is_empty()
}

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !can_transition(current_status, new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Applies a validated status change to `appointment` in place.
    pub fn apply_transition(
        &self,
        appointment: &mut Appointment,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        self.validate_status_transition(appointment.status, new_status)?;

        info!("Appointment {} {} -> {}", appointment.id, appointment.status, new_status);
        appointment.status = new_status;
        appointment.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&self, appointment: &mut Appointment, reason: Option<String>) -> Result<(), AppointmentError> {
        if !can_transition(appointment.status, AppointmentStatus::Cancelled) {
            return Err(AppointmentError::NotCancellable(appointment.status));
        }

        let now = Utc::now();
        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancellation_reason = reason;
        appointment.cancelled_at = Some(now);
        appointment.updated_at = now;
        info!("Appointment {} cancelled", appointment.id);
        Ok(())
    }

    /// Only appointments that have not happened yet can move.
    pub fn ensure_reschedulable(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        match appointment.status {
            AppointmentStatus::Proposed | AppointmentStatus::Booked if appointment.discarded_at.is_none() => Ok(()),
            status => Err(AppointmentError::NotReschedulable(status)),
        }
    }
}
