use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, fmt_iso, now_ms, parse_start_time};
use super::{Engine, EngineError, RuleViolation};

/// Shown in place of a display name when the referenced account is gone.
const DELETED_ACCOUNT: &str = "[deleted account]";

impl Engine {
    /// Book a one-hour appointment with a counselor, starting pending.
    /// Only confirmed appointments block the slot, so several pending
    /// requests may coexist for the same time.
    pub async fn create_appointment(
        &self,
        principal: &Principal,
        counselor_user_id: Ulid,
        start_time: &str,
        reason: &str,
    ) -> Result<BookingReceipt, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }

        let counselor = self
            .store
            .user(&counselor_user_id)
            .ok_or(EngineError::NotFound("user", counselor_user_id))?;
        match counselor.role {
            Role::Counselor => {}
            Role::Admin | Role::User => {
                return Err(RuleViolation::InvalidCounselorRole.into());
            }
        }
        let profile = self
            .store
            .profile_for_user(&counselor_user_id)
            .ok_or(EngineError::Rule(RuleViolation::CounselorProfileNotFound))?;

        let start = parse_start_time(start_time)?;
        if start <= now_ms() {
            return Err(RuleViolation::AppointmentTimeInPast.into());
        }
        let span = Span::new(start, start + APPOINTMENT_DURATION_MS);

        let sched = self
            .store
            .schedule(&profile.id)
            .ok_or(EngineError::Rule(RuleViolation::CounselorProfileNotFound))?;
        let _commit = self.commit_permit().await;
        let mut guard = sched.write().await;
        check_no_conflict(&guard, &span, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            user_id: principal.user_id,
            counselor_id: profile.id,
            span,
            status: AppointmentStatus::Pending,
            reason: reason.to_string(),
            created_at: now_ms(),
        };
        let event = Event::AppointmentBooked(appointment.clone());
        self.persist_to_schedule(&mut guard, &event).await?;
        metrics::gauge!(crate::observability::APPOINTMENTS_ACTIVE).increment(1.0);

        Ok(BookingReceipt {
            appointment_id: appointment.id,
            status: appointment.status,
            counselor_user_id,
        })
    }

    /// Role-scoped appointment listing, soonest first, paginated.
    pub async fn list_appointments(
        &self,
        principal: &Principal,
        page: usize,
        per_page: usize,
    ) -> Result<Page<AppointmentView>, EngineError> {
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let page = page.max(1);

        let mut rows = match principal.role {
            Role::Admin => self.collect_appointments(|_| true).await,
            Role::Counselor => match self.store.profile_for_user(&principal.user_id) {
                Some(profile) => {
                    self.collect_appointments(|a| a.counselor_id == profile.id)
                        .await
                }
                // A counselor account without a profile has no schedule.
                None => Vec::new(),
            },
            Role::User => {
                self.collect_appointments(|a| a.user_id == principal.user_id)
                    .await
            }
        };
        rows.sort_by_key(|a| a.span.start);

        let total = rows.len();
        let total_pages = total.div_ceil(per_page);
        let items = rows
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .map(|a| self.render_appointment(&a, principal))
            .collect();

        Ok(Page {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Apply a status transition on behalf of the caller. The guard logic
    /// and the permissions block both read `allowed_transitions` — what the
    /// UI was offered is exactly what passes here.
    pub async fn update_status(
        &self,
        principal: &Principal,
        appointment_id: Ulid,
        requested: AppointmentStatus,
    ) -> Result<AppointmentView, EngineError> {
        let counselor_id = self
            .store
            .schedule_of_appointment(&appointment_id)
            .ok_or(EngineError::NotFound("appointment", appointment_id))?;
        let sched = self
            .store
            .schedule(&counselor_id)
            .ok_or(EngineError::NotFound("appointment", appointment_id))?;
        let _commit = self.commit_permit().await;
        let mut guard = sched.write().await;
        let current = guard
            .get(appointment_id)
            .ok_or(EngineError::NotFound("appointment", appointment_id))?
            .clone();

        if current.status.is_terminal() {
            return Err(RuleViolation::AppointmentStatusFinal.into());
        }
        if !allowed_transitions(current.status, principal.role).contains(&requested) {
            return Err(RuleViolation::AppointmentStatusInvalidTransition.into());
        }
        match principal.role {
            Role::Counselor => {
                let profile = self
                    .store
                    .profile_for_user(&principal.user_id)
                    .ok_or(EngineError::Rule(RuleViolation::CounselorProfileNotFound))?;
                if profile.id != current.counselor_id {
                    return Err(RuleViolation::AppointmentForbidden.into());
                }
            }
            // Admin skips ownership; User never passes the transition check.
            Role::Admin | Role::User => {}
        }
        if requested == AppointmentStatus::Confirmed {
            // Re-check under the schedule write lock: two overlapping
            // confirmations racing can't both get here and both succeed.
            check_no_conflict(&guard, &current.span, Some(current.id))?;
        }

        let event = Event::AppointmentStatusChanged {
            id: current.id,
            counselor_id,
            status: requested,
        };
        self.persist_to_schedule(&mut guard, &event).await?;

        let mut updated = current;
        updated.status = requested;
        Ok(self.render_appointment(&updated, principal))
    }

    /// Counselor-role users that have a profile.
    pub fn list_counselors(&self) -> Vec<CounselorListing> {
        self.store
            .users_with_role(Role::Counselor)
            .into_iter()
            .filter_map(|user| {
                self.store
                    .profile_for_user(&user.id)
                    .map(|profile| CounselorListing {
                        counselor_user_id: user.id,
                        name: user.display_name(),
                        specialization: profile.specialization,
                        qualifications: profile.qualifications,
                    })
            })
            .collect()
    }

    async fn collect_appointments<F>(&self, keep: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let mut out = Vec::new();
        for sched in self.store.schedules() {
            let guard = sched.read().await;
            out.extend(guard.appointments.iter().filter(|a| keep(a)).cloned());
        }
        out
    }

    /// Derive what the caller may do with an appointment, without mutating
    /// anything. Same table, same ownership rule as `update_status`.
    pub(super) fn permissions_for(
        &self,
        appointment: &Appointment,
        principal: &Principal,
    ) -> PermissionsView {
        let allowed = allowed_transitions(appointment.status, principal.role);
        let allowed_next_status: Vec<AppointmentStatus> = match principal.role {
            Role::Counselor => match self.store.profile_for_user(&principal.user_id) {
                Some(profile) if profile.id == appointment.counselor_id => allowed.to_vec(),
                _ => Vec::new(),
            },
            Role::Admin | Role::User => allowed.to_vec(),
        };
        PermissionsView {
            can_update_status: !allowed_next_status.is_empty(),
            allowed_next_status,
        }
    }

    fn render_appointment(&self, a: &Appointment, principal: &Principal) -> AppointmentView {
        let user_name = self
            .store
            .user(&a.user_id)
            .map(|u| u.display_name())
            .unwrap_or_else(|| DELETED_ACCOUNT.into());
        let counselor_name = self
            .store
            .profile(&a.counselor_id)
            .and_then(|p| self.store.user(&p.user_id))
            .map(|u| u.display_name())
            .unwrap_or_else(|| DELETED_ACCOUNT.into());

        AppointmentView {
            appointment_id: a.id,
            user_id: a.user_id,
            counselor_id: a.counselor_id,
            start_time: fmt_iso(a.span.start),
            end_time: fmt_iso(a.span.end),
            reason: a.reason.clone(),
            status: a.status,
            created_at: fmt_iso(a.created_at),
            user_name,
            counselor_name,
            permissions: self.permissions_for(a, principal),
        }
    }
}
