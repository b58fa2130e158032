use crate::config::ClinicHours;
use crate::error::{DataError, DataResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied payloads are checked before any backend call
pub trait Validate {
    fn validate(&self) -> DataResult<()>;
}

fn require(field: &str, value: &str) -> DataResult<()> {
    if value.trim().is_empty() {
        return Err(DataError::validation(format!("{} is required", field)));
    }
    Ok(())
}

fn check_email(email: &str) -> DataResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.') && !domain.ends_with('.'));
    if !valid {
        return Err(DataError::validation(format!("'{}' is not a valid email address", email)));
    }
    Ok(())
}

fn check_phone(phone: &str) -> DataResult<()> {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    if !allowed || !(7..=15).contains(&digits) {
        return Err(DataError::validation(format!("'{}' is not a valid phone number", phone)));
    }
    Ok(())
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> DataResult<()> {
    if !(min..=max).contains(&value) {
        return Err(DataError::validation(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(())
}

// =============================================================================
// Patients
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    /// Account that manages this patient record
    pub owner_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub owner_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
}

impl Validate for NewPatient {
    fn validate(&self) -> DataResult<()> {
        require("owner_id", &self.owner_id)?;
        require("first_name", &self.first_name)?;
        require("last_name", &self.last_name)?;
        check_email(&self.email)?;
        if let Some(phone) = &self.phone {
            check_phone(phone)?;
        }
        if let Some(dob) = self.date_of_birth
            && dob > Utc::now().date_naive()
        {
            return Err(DataError::validation("date_of_birth is in the future"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
}

impl Validate for PatientPatch {
    fn validate(&self) -> DataResult<()> {
        if self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
        {
            return Err(DataError::validation("patch has no fields to update"));
        }
        if let Some(name) = &self.first_name {
            require("first_name", name)?;
        }
        if let Some(name) = &self.last_name {
            require("last_name", name)?;
        }
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        if let Some(phone) = &self.phone {
            check_phone(phone)?;
        }
        Ok(())
    }
}

// =============================================================================
// Appointments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Whether an appointment in this state still occupies its slot
    pub fn holds_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub practitioner: String,
    pub service_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: String,
    pub practitioner: String,
    pub service_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for NewAppointment {
    fn validate(&self) -> DataResult<()> {
        require("patient_id", &self.patient_id)?;
        require("practitioner", &self.practitioner)?;
        require("service_type", &self.service_type)?;
        check_range("duration_minutes", self.duration_minutes, 15, 240)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for AppointmentPatch {
    fn validate(&self) -> DataResult<()> {
        if self.scheduled_at.is_none()
            && self.duration_minutes.is_none()
            && self.status.is_none()
            && self.notes.is_none()
        {
            return Err(DataError::validation("patch has no fields to update"));
        }
        if let Some(minutes) = self.duration_minutes {
            check_range("duration_minutes", minutes, 15, 240)?;
        }
        Ok(())
    }
}

// =============================================================================
// Progress entries
// =============================================================================

/// One recovery measurement for a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: String,
    pub patient_id: String,
    pub recorded_at: DateTime<Utc>,
    /// 0 (none) to 10 (worst)
    pub pain_level: u32,
    /// 0 to 100
    pub mobility_score: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProgressEntry {
    pub patient_id: String,
    pub recorded_at: DateTime<Utc>,
    pub pain_level: u32,
    pub mobility_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for NewProgressEntry {
    fn validate(&self) -> DataResult<()> {
        require("patient_id", &self.patient_id)?;
        check_range("pain_level", self.pain_level, 0, 10)?;
        check_range("mobility_score", self.mobility_score, 0, 100)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pain_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobility_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for ProgressPatch {
    fn validate(&self) -> DataResult<()> {
        if self.pain_level.is_none() && self.mobility_score.is_none() && self.notes.is_none() {
            return Err(DataError::validation("patch has no fields to update"));
        }
        if let Some(pain) = self.pain_level {
            check_range("pain_level", pain, 0, 10)?;
        }
        if let Some(score) = self.mobility_score {
            check_range("mobility_score", score, 0, 100)?;
        }
        Ok(())
    }
}

// =============================================================================
// Availability
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

/// `date` at `hour:minute` UTC; hours past 23 roll into the next day
pub fn at_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour % 24, minute.min(59), 0).unwrap_or(NaiveTime::MIN);
    let date = date + Duration::days(i64::from(hour / 24));
    Utc.from_utc_datetime(&date.and_time(time))
}

impl TimeSlot {
    /// Every slot between opening and closing time, all marked available
    pub fn grid(date: NaiveDate, hours: &ClinicHours) -> Vec<TimeSlot> {
        let open = at_time(date, hours.open_hour, 0);
        let close = at_time(date, hours.close_hour, 0);
        let step = Duration::minutes(i64::from(hours.slot_minutes.max(5)));

        std::iter::successors(Some(open), |start| Some(*start + step))
            .map(|start| TimeSlot {
                start,
                end: start + step,
                available: true,
            })
            .take_while(|slot| slot.end <= close)
            .collect()
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}
