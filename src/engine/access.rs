//! Caller capabilities.
//!
//! The engine does not authenticate anyone; callers arrive already identified
//! and these checks only decide which operations that identity may perform.

/// Identity attached to every engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// The examinee; `0` is their user id.
    Student(String),
    Instructor,
    Admin,
    /// Trusted inference collaborators pushing signals.
    Service,
}

impl Caller {
    /// Only services push measurement records.
    pub fn can_ingest(&self) -> bool {
        matches!(self, Caller::Service)
    }

    /// Start/end monitoring: staff, services, or the attempt's own student.
    pub fn can_control(&self, owner_user_id: &str) -> bool {
        match self {
            Caller::Student(id) => id == owner_user_id,
            Caller::Instructor | Caller::Admin | Caller::Service => true,
        }
    }

    /// Read session data and reports.
    pub fn can_view(&self, owner_user_id: &str) -> bool {
        match self {
            Caller::Student(id) => id == owner_user_id,
            Caller::Instructor | Caller::Admin | Caller::Service => true,
        }
    }

    /// Review alerts: proctoring staff only.
    pub fn can_review(&self) -> bool {
        matches!(self, Caller::Instructor | Caller::Admin)
    }
}
