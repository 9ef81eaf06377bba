use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedSchedule = Arc<RwLock<Schedule>>;
pub type SharedProgress = Arc<RwLock<CourseProgress>>;

/// In-memory relational image of the six tables, rebuilt from the journal on
/// startup. Reference data (users, roles-in-users, profiles, courses,
/// modules) lives in plain DashMaps; the two contended row sets — a
/// counselor's appointments and a user's per-course progress — sit behind
/// `RwLock`s so read-modify-write cycles stay atomic.
pub struct Store {
    users: DashMap<Ulid, User>,
    users_by_email: DashMap<String, Ulid>,
    profiles: DashMap<Ulid, CounselorProfile>,
    profile_by_user: DashMap<Ulid, Ulid>,
    courses: DashMap<Ulid, Course>,
    modules: DashMap<Ulid, CourseModule>,
    /// Course → module ids ordered by `module_order`.
    modules_by_course: DashMap<Ulid, Vec<Ulid>>,
    /// Counselor profile id → schedule.
    schedules: DashMap<Ulid, SharedSchedule>,
    /// Reverse lookup: appointment id → counselor profile id.
    appointment_index: DashMap<Ulid, Ulid>,
    /// `(user_id, course_id)` is the uniqueness key — one row per pair.
    progress: DashMap<(Ulid, Ulid), SharedProgress>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            users_by_email: DashMap::new(),
            profiles: DashMap::new(),
            profile_by_user: DashMap::new(),
            courses: DashMap::new(),
            modules: DashMap::new(),
            modules_by_course: DashMap::new(),
            schedules: DashMap::new(),
            appointment_index: DashMap::new(),
            progress: DashMap::new(),
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_id_by_email(&self, email: &str) -> Option<Ulid> {
        self.users_by_email.get(email).map(|e| *e.value())
    }

    pub fn users_with_role(&self, role: Role) -> Vec<User> {
        self.users
            .iter()
            .filter(|e| e.value().role == role)
            .map(|e| e.value().clone())
            .collect()
    }

    // ── Counselor profiles ───────────────────────────────────

    pub fn profile(&self, id: &Ulid) -> Option<CounselorProfile> {
        self.profiles.get(id).map(|e| e.value().clone())
    }

    pub fn profile_for_user(&self, user_id: &Ulid) -> Option<CounselorProfile> {
        let pid = self.profile_by_user.get(user_id).map(|e| *e.value())?;
        self.profile(&pid)
    }

    // ── Courses & modules ────────────────────────────────────

    pub fn course(&self, id: &Ulid) -> Option<Course> {
        self.courses.get(id).map(|e| e.value().clone())
    }

    pub fn courses(&self) -> Vec<Course> {
        self.courses.iter().map(|e| e.value().clone()).collect()
    }

    pub fn module(&self, id: &Ulid) -> Option<CourseModule> {
        self.modules.get(id).map(|e| e.value().clone())
    }

    /// All modules of a course, ordered by `module_order`.
    pub fn modules_of(&self, course_id: &Ulid) -> Vec<CourseModule> {
        let ids = match self.modules_by_course.get(course_id) {
            Some(e) => e.value().clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.module(id)).collect()
    }

    /// The lowest-order module of a course, if any.
    pub fn first_module_of(&self, course_id: &Ulid) -> Option<Ulid> {
        self.modules_by_course
            .get(course_id)
            .and_then(|e| e.value().first().copied())
    }

    // ── Schedules & appointments ─────────────────────────────

    pub fn schedule(&self, counselor_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(counselor_id).map(|e| e.value().clone())
    }

    pub fn schedules(&self) -> Vec<SharedSchedule> {
        self.schedules.iter().map(|e| e.value().clone()).collect()
    }

    /// Counselor profile holding the given appointment.
    pub fn schedule_of_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index
            .get(appointment_id)
            .map(|e| *e.value())
    }

    // ── Progress rows ────────────────────────────────────────

    pub fn progress_row(&self, user_id: &Ulid, course_id: &Ulid) -> Option<SharedProgress> {
        self.progress
            .get(&(*user_id, *course_id))
            .map(|e| e.value().clone())
    }

    pub fn progress_rows_for_user(&self, user_id: &Ulid) -> Vec<SharedProgress> {
        self.progress
            .iter()
            .filter(|e| e.key().0 == *user_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn progress_count(&self) -> usize {
        self.progress.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a store-level event (rows not guarded by a schedule or
    /// progress lock). Appointment and module-completion events go through
    /// [`apply_to_schedule`] / [`apply_to_progress`] under the row lock.
    pub fn apply_global(&self, event: &Event) {
        match event {
            Event::UserRegistered(user) => {
                self.users_by_email.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::ProfileUpserted(profile) => {
                self.profile_by_user.insert(profile.user_id, profile.id);
                self.schedules
                    .entry(profile.id)
                    .or_insert_with(|| Arc::new(RwLock::new(Schedule::new(profile.id))));
                self.profiles.insert(profile.id, profile.clone());
            }
            Event::CourseCreated { course, modules } => {
                let mut ordered: Vec<&CourseModule> = modules.iter().collect();
                ordered.sort_by_key(|m| m.module_order);
                self.modules_by_course
                    .insert(course.id, ordered.iter().map(|m| m.id).collect());
                for module in modules {
                    self.modules.insert(module.id, module.clone());
                }
                self.courses.insert(course.id, course.clone());
            }
            Event::CourseDeactivated { id } => {
                if let Some(mut course) = self.courses.get_mut(id) {
                    course.active = false;
                }
            }
            Event::Enrolled(row) => {
                self.progress.insert(
                    (row.user_id, row.course_id),
                    Arc::new(RwLock::new(row.clone())),
                );
            }
            Event::AppointmentBooked(_)
            | Event::AppointmentStatusChanged { .. }
            | Event::ModuleCompleted { .. } => {}
        }
    }

    /// Emit the minimal event sequence that recreates current state, for
    /// journal compaction. Ordering matters: profiles before appointments,
    /// courses before enrollments. Waits for any in-flight row writers; the
    /// shared guards are collected first so no DashMap shard lock is held
    /// across an await.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for e in self.users.iter() {
            events.push(Event::UserRegistered(e.value().clone()));
        }
        for e in self.profiles.iter() {
            events.push(Event::ProfileUpserted(e.value().clone()));
        }
        for e in self.courses.iter() {
            events.push(Event::CourseCreated {
                course: e.value().clone(),
                modules: self.modules_of(e.key()),
            });
        }
        let rows: Vec<SharedProgress> =
            self.progress.iter().map(|e| e.value().clone()).collect();
        for row in rows {
            events.push(Event::Enrolled(row.read().await.clone()));
        }
        let schedules: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        for sched in schedules {
            let guard = sched.read().await;
            for appointment in &guard.appointments {
                events.push(Event::AppointmentBooked(appointment.clone()));
            }
        }
        events
    }
}

/// Apply an appointment event to a schedule — caller holds the write lock.
pub fn apply_to_schedule(sched: &mut Schedule, event: &Event, store: &Store) {
    match event {
        Event::AppointmentBooked(appointment) => {
            store
                .appointment_index
                .insert(appointment.id, appointment.counselor_id);
            sched.insert(appointment.clone());
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appointment) = sched.get_mut(*id) {
                appointment.status = *status;
            }
        }
        _ => {}
    }
}

/// Apply a module completion to a progress row — caller holds the write lock.
pub fn apply_to_progress(row: &mut CourseProgress, event: &Event) {
    if let Event::ModuleCompleted {
        last_module_id,
        completed,
        completed_at,
        ..
    } = event
    {
        row.last_module_id = Some(*last_module_id);
        row.completed = *completed;
        if *completed {
            row.completion_date = *completed_at;
        }
    }
}
