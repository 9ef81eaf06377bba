use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only internal time type.
pub type Ms = i64;

/// Every appointment is exactly one hour long.
pub const APPOINTMENT_DURATION_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Closed set of account roles. New roles are a compile-time addition —
/// every decision point matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Counselor,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "counselor" => Some(Role::Counselor),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Counselor => "counselor",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

impl AppointmentStatus {
    pub fn parse(s: &str) -> Option<AppointmentStatus> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "canceled" => Some(AppointmentStatus::Canceled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Completed => "completed",
        }
    }

    /// Completed and canceled appointments accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled
        )
    }
}

/// The one status transition table. Both the update guard and the derived
/// permissions block consume this — there is no second copy to drift.
pub fn allowed_transitions(current: AppointmentStatus, role: Role) -> &'static [AppointmentStatus] {
    use AppointmentStatus::*;
    match (current, role) {
        (Pending, Role::Counselor) | (Pending, Role::Admin) => &[Confirmed, Canceled],
        (Confirmed, Role::Admin) => &[Completed, Canceled],
        (Pending, Role::User)
        | (Confirmed, Role::Counselor)
        | (Confirmed, Role::User)
        | (Canceled, _)
        | (Completed, _) => &[],
    }
}

// ── Persisted rows ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    /// Opaque to the engine; hashing and verification live at the boundary.
    pub password_hash: String,
    pub name: Option<String>,
    pub role: Role,
    pub active: bool,
}

impl User {
    /// Display name for enriched views: name, else email.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.email.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounselorProfile {
    pub id: Ulid,
    /// Exactly one profile per user account.
    pub user_id: Ulid,
    pub specialization: String,
    pub qualifications: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// The booking user account.
    pub user_id: Ulid,
    /// The counselor *profile* id, not the counselor's user id.
    pub counselor_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub reason: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub target_audience: String,
    pub active: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: Ulid,
    pub course_id: Ulid,
    pub title: String,
    pub content: String,
    /// 1-based position defining the linear path through the course.
    pub module_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub id: Ulid,
    pub user_id: Ulid,
    pub course_id: Ulid,
    /// The module the user is currently on; None when the course has no
    /// modules. Frozen at the final module once completed.
    pub last_module_id: Option<Ulid>,
    pub completed: bool,
    pub completion_date: Option<Ms>,
}

/// One counselor's appointment set, sorted by `span.start`. The schedule is
/// the unit of locking: conflict checks and status writes for a counselor
/// serialize on its `RwLock`.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub counselor_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl Schedule {
    pub fn new(counselor_id: Ulid) -> Self {
        Self {
            counselor_id,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window. Binary search
    /// skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

/// Journal record format — flat, one event per committed operation.
/// Creation events carry the full row so compaction can re-emit current
/// state as plain creations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered(User),
    ProfileUpserted(CounselorProfile),
    CourseCreated {
        course: Course,
        modules: Vec<CourseModule>,
    },
    CourseDeactivated {
        id: Ulid,
    },
    AppointmentBooked(Appointment),
    AppointmentStatusChanged {
        id: Ulid,
        counselor_id: Ulid,
        status: AppointmentStatus,
    },
    Enrolled(CourseProgress),
    ModuleCompleted {
        user_id: Ulid,
        course_id: Ulid,
        last_module_id: Ulid,
        completed: bool,
        completed_at: Option<Ms>,
    },
}

// ── The authenticated caller ─────────────────────────────────────

/// Supplied by the boundary on every call — never ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Ulid,
    pub role: Role,
}

// ── View / result types ──────────────────────────────────────────

/// What the current caller may do with an appointment. Derived from the
/// same transition table as the update guard; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsView {
    pub can_update_status: bool,
    pub allowed_next_status: Vec<AppointmentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentView {
    pub appointment_id: Ulid,
    pub user_id: Ulid,
    pub counselor_id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub reason: String,
    pub status: AppointmentStatus,
    pub created_at: String,
    pub user_name: String,
    pub counselor_name: String,
    pub permissions: PermissionsView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub appointment_id: Ulid,
    pub status: AppointmentStatus,
    pub counselor_user_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounselorListing {
    pub counselor_user_id: Ulid,
    pub name: String,
    pub specialization: String,
    pub qualifications: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub target_audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleView {
    pub id: Ulid,
    pub course_id: Ulid,
    pub title: String,
    pub content: String,
    pub module_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub id: Ulid,
    pub user_id: Ulid,
    pub course_id: Ulid,
    pub last_module_id: Option<Ulid>,
    pub is_completed: bool,
    pub completion_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDetail {
    pub course: CourseSummary,
    pub modules: Vec<ModuleView>,
    pub current_module: Option<ModuleView>,
    pub is_completed: bool,
}

/// Module as submitted when creating a course; order is its position in the
/// submitted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub message: String,
    pub progress: ProgressView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub course_id: Ulid,
    pub course_title: String,
    pub progress_id: Ulid,
    pub is_completed: bool,
    pub current_module: Option<ModuleView>,
    pub completion_date: Option<String>,
}
