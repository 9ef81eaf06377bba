use ulid::Ulid;

/// A business rule rejection. Each variant carries a stable machine code
/// the boundary forwards verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    InvalidCounselorRole,
    CounselorProfileNotFound,
    InvalidDatetimeFormat,
    AppointmentTimeInPast,
    AppointmentTimeConflict,
    AppointmentStatusFinal,
    AppointmentStatusInvalidTransition,
    AppointmentForbidden,
    AlreadyEnrolled,
    NotEnrolled,
    WrongModule,
    ModuleNotFound,
    EmailTaken,
}

impl RuleViolation {
    pub fn code(&self) -> &'static str {
        match self {
            RuleViolation::InvalidCounselorRole => "INVALID_COUNSELOR_ROLE",
            RuleViolation::CounselorProfileNotFound => "COUNSELOR_PROFILE_NOT_FOUND",
            RuleViolation::InvalidDatetimeFormat => "INVALID_DATETIME_FORMAT",
            RuleViolation::AppointmentTimeInPast => "APPOINTMENT_TIME_IN_PAST",
            RuleViolation::AppointmentTimeConflict => "APPOINTMENT_TIME_CONFLICT",
            RuleViolation::AppointmentStatusFinal => "APPOINTMENT_STATUS_FINAL",
            RuleViolation::AppointmentStatusInvalidTransition => {
                "APPOINTMENT_STATUS_INVALID_TRANSITION"
            }
            RuleViolation::AppointmentForbidden => "APPOINTMENT_FORBIDDEN",
            RuleViolation::AlreadyEnrolled => "ALREADY_ENROLLED",
            RuleViolation::NotEnrolled => "NOT_ENROLLED",
            RuleViolation::WrongModule => "WRONG_MODULE",
            RuleViolation::ModuleNotFound => "MODULE_NOT_FOUND",
            RuleViolation::EmailTaken => "EMAIL_TAKEN",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RuleViolation::InvalidCounselorRole => "target user is not a counselor",
            RuleViolation::CounselorProfileNotFound => "counselor has no profile",
            RuleViolation::InvalidDatetimeFormat => "start time is not valid ISO-8601",
            RuleViolation::AppointmentTimeInPast => "appointment start time is in the past",
            RuleViolation::AppointmentTimeConflict => {
                "the slot overlaps a confirmed appointment"
            }
            RuleViolation::AppointmentStatusFinal => "appointment status is final",
            RuleViolation::AppointmentStatusInvalidTransition => {
                "status transition not allowed for this role"
            }
            RuleViolation::AppointmentForbidden => {
                "counselors may only manage their own schedule"
            }
            RuleViolation::AlreadyEnrolled => "already enrolled in this course",
            RuleViolation::NotEnrolled => "not enrolled in this course",
            RuleViolation::WrongModule => "module is not the user's current module",
            RuleViolation::ModuleNotFound => "module does not exist",
            RuleViolation::EmailTaken => "email is already registered",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// Referenced entity absent. The label names the entity kind.
    NotFound(&'static str, Ulid),
    Rule(RuleViolation),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::Rule(v) => write!(f, "{}: {}", v.code(), v.message()),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RuleViolation> for EngineError {
    fn from(v: RuleViolation) -> Self {
        EngineError::Rule(v)
    }
}
