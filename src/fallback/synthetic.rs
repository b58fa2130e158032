//! Deterministic stand-in data.
//!
//! Every generator seeds its RNG from its inputs, so the same id, owner or
//! date always yields the same records. Output types are the real entity
//! types.

use crate::config::ClinicHours;
use crate::records::{
    Appointment, AppointmentStatus, NewAppointment, NewPatient, NewProgressEntry, Patient, ProgressEntry,
    TimeSlot, at_time,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::hash::{DefaultHasher, Hash, Hasher};

const FIRST_NAMES: &[&str] = &[
    "Maria", "James", "Aisha", "Chen", "Olivia", "Mateo", "Priya", "Liam", "Fatima", "Noah", "Sofia", "Daniel",
];
const LAST_NAMES: &[&str] = &[
    "Garcia", "Smith", "Khan", "Wang", "Johnson", "Rossi", "Patel", "Brown", "Haddad", "Miller", "Silva", "Kim",
];
const PRACTITIONERS: &[&str] = &["Dr. Elena Park", "Dr. Samuel Reyes", "Dr. Hannah Cole"];
const SERVICE_TYPES: &[&str] = &[
    "Initial Assessment",
    "Physiotherapy Session",
    "Sports Injury Follow-up",
    "Post-operative Rehabilitation",
];
const PROGRESS_NOTES: &[&str] = &[
    "Range of motion improving",
    "Completed home exercises",
    "Mild soreness after session",
    "Able to climb stairs without support",
];

/// Mock ids carry this prefix so they stand out in logs
pub const MOCK_ID_PREFIX: &str = "mock-";

fn rng_for(parts: &[&str]) -> StdRng {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

fn pick<'a>(rng: &mut StdRng, values: &[&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}

fn mock_id(kind: &str, parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    format!("{}{}-{:012x}", MOCK_ID_PREFIX, kind, hasher.finish() & 0xffff_ffff_ffff)
}

// =============================================================================
// Patients
// =============================================================================

fn patient_with(rng: &mut StdRng, id: String, owner_id: String, today: NaiveDate) -> Patient {
    let first = pick(rng, FIRST_NAMES);
    let last = pick(rng, LAST_NAMES);
    let created = at_time(today - Duration::days(rng.random_range(30..720)), 10, 0);
    let dob = today - Duration::days(rng.random_range(18 * 365..80 * 365));

    Patient {
        id,
        owner_id,
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
        phone: Some(format!("555-01{:02}", rng.random_range(0..100))),
        date_of_birth: Some(dob),
        created_at: created,
        updated_at: created,
    }
}

pub fn patient(id: &str, today: NaiveDate) -> Patient {
    let mut rng = rng_for(&["patient", id]);
    let owner = format!("{}owner-{}", MOCK_ID_PREFIX, rng.random_range(1000..10000));
    patient_with(&mut rng, id.to_string(), owner, today)
}

/// One to three patients for an account, oldest first
pub fn patients_for_owner(owner_id: &str, limit: usize, today: NaiveDate) -> Vec<Patient> {
    let mut rng = rng_for(&["patients", owner_id]);
    let count = rng.random_range(1..=3usize).min(limit);
    let mut patients: Vec<Patient> = (0..count)
        .map(|i| {
            let id = mock_id("patient", &[owner_id, &i.to_string()]);
            patient_with(&mut rng, id, owner_id.to_string(), today)
        })
        .collect();
    patients.sort_by_key(|p| p.created_at);
    patients
}

pub fn created_patient(new: &NewPatient, now: DateTime<Utc>) -> Patient {
    Patient {
        id: format!("{}{}", MOCK_ID_PREFIX, uuid::Uuid::new_v4()),
        owner_id: new.owner_id.clone(),
        first_name: new.first_name.clone(),
        last_name: new.last_name.clone(),
        email: new.email.clone(),
        phone: new.phone.clone(),
        date_of_birth: new.date_of_birth,
        created_at: now,
        updated_at: now,
    }
}

// =============================================================================
// Appointments
// =============================================================================

fn appointment_with(rng: &mut StdRng, id: String, patient_id: String, date: NaiveDate, today: NaiveDate) -> Appointment {
    let hour = rng.random_range(9..16);
    let minute = if rng.random_bool(0.5) { 0 } else { 30 };
    let scheduled_at = at_time(date, hour, minute);
    let status = if date < today {
        if rng.random_bool(0.9) {
            AppointmentStatus::Completed
        } else {
            AppointmentStatus::NoShow
        }
    } else if rng.random_bool(0.6) {
        AppointmentStatus::Confirmed
    } else {
        AppointmentStatus::Scheduled
    };

    Appointment {
        id,
        patient_id,
        practitioner: pick(rng, PRACTITIONERS).to_string(),
        service_type: pick(rng, SERVICE_TYPES).to_string(),
        scheduled_at,
        duration_minutes: if rng.random_bool(0.3) { 60 } else { 30 },
        status,
        notes: None,
        created_at: scheduled_at - Duration::days(rng.random_range(3..21)),
    }
}

pub fn appointment(id: &str, today: NaiveDate) -> Appointment {
    let mut rng = rng_for(&["appointment", id]);
    let patient_id = mock_id("patient", &[id]);
    let date = today + Duration::days(rng.random_range(-14..14));
    appointment_with(&mut rng, id.to_string(), patient_id, date, today)
}

/// Weekly appointments around `today`, earliest first
pub fn appointments_for_patient(patient_id: &str, limit: usize, today: NaiveDate) -> Vec<Appointment> {
    let mut rng = rng_for(&["appointments", patient_id]);
    let count = rng.random_range(2..=5usize).min(limit);
    let first = today - Duration::weeks(rng.random_range(1..4));

    (0..count)
        .map(|i| {
            let id = mock_id("appointment", &[patient_id, &i.to_string()]);
            let date = first + Duration::weeks(i as i64);
            appointment_with(&mut rng, id, patient_id.to_string(), date, today)
        })
        .collect()
}

pub fn created_appointment(new: &NewAppointment, now: DateTime<Utc>) -> Appointment {
    Appointment {
        id: format!("{}{}", MOCK_ID_PREFIX, uuid::Uuid::new_v4()),
        patient_id: new.patient_id.clone(),
        practitioner: new.practitioner.clone(),
        service_type: new.service_type.clone(),
        scheduled_at: new.scheduled_at,
        duration_minutes: new.duration_minutes,
        status: AppointmentStatus::Scheduled,
        notes: new.notes.clone(),
        created_at: now,
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Weekly measurements, newest first. Pain never rises and mobility never
/// falls from one week to the next.
pub fn progress_for_patient(patient_id: &str, limit: usize, today: NaiveDate) -> Vec<ProgressEntry> {
    let mut rng = rng_for(&["progress", patient_id]);
    let count = limit.min(12);
    let mut pain: u32 = rng.random_range(6..=9);
    let mut mobility: u32 = rng.random_range(30..=50);

    let mut entries: Vec<ProgressEntry> = (0..count)
        .map(|week| {
            if week > 0 {
                pain = pain.saturating_sub(rng.random_range(0..=1));
                mobility = (mobility + rng.random_range(2..=6)).min(100);
            }
            let offset = (count - 1 - week) as i64;
            ProgressEntry {
                id: mock_id("progress", &[patient_id, &week.to_string()]),
                patient_id: patient_id.to_string(),
                recorded_at: at_time(today - Duration::weeks(offset), 11, 0),
                pain_level: pain,
                mobility_score: mobility,
                notes: Some(pick(&mut rng, PROGRESS_NOTES).to_string()),
            }
        })
        .collect();
    entries.reverse();
    entries
}

pub fn progress_entry(id: &str, today: NaiveDate) -> ProgressEntry {
    let mut rng = rng_for(&["progress-entry", id]);
    ProgressEntry {
        id: id.to_string(),
        patient_id: mock_id("patient", &[id]),
        recorded_at: at_time(today - Duration::days(rng.random_range(0..60)), 11, 0),
        pain_level: rng.random_range(0..=6),
        mobility_score: rng.random_range(50..=95),
        notes: Some(pick(&mut rng, PROGRESS_NOTES).to_string()),
    }
}

pub fn created_progress_entry(new: &NewProgressEntry) -> ProgressEntry {
    ProgressEntry {
        id: format!("{}{}", MOCK_ID_PREFIX, uuid::Uuid::new_v4()),
        patient_id: new.patient_id.clone(),
        recorded_at: new.recorded_at,
        pain_level: new.pain_level,
        mobility_score: new.mobility_score,
        notes: new.notes.clone(),
    }
}

// =============================================================================
// Availability
// =============================================================================

/// Slot grid for `date` within clinic hours. Roughly seven in ten slots are
/// free; the same date always gives the same answer.
pub fn availability(date: NaiveDate, hours: &ClinicHours) -> Vec<TimeSlot> {
    let mut rng = rng_for(&["availability", &date.to_string()]);
    TimeSlot::grid(date, hours)
        .into_iter()
        .map(|slot| TimeSlot {
            available: rng.random_bool(0.7),
            ..slot
        })
        .collect()
}
