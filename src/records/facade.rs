use super::types::*;
use crate::backend::Query;
use crate::cache::QueryCache;
use crate::config::{ClinicHours, Config};
use crate::error::{DataError, DataResult};
use crate::fallback::{FallbackPolicy, InterceptOptions, MockInterceptor, synthetic};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Operation names used for error context, interceptor keys and metrics
pub struct Operations {
    pub create: &'static str,
    pub get: &'static str,
    pub update: &'static str,
    pub list: &'static str,
}

/// An entity stored as JSON rows in one backend table
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const ENTITY: &'static str;
    /// Column `list_by_owner` filters on
    const OWNER_COLUMN: &'static str;
    const ORDER_COLUMN: &'static str;
    const NEWEST_FIRST: bool;
    /// Timestamp columns filled in on insert
    const CREATED_FIELDS: &'static [&'static str];
    /// Timestamp column refreshed on every update
    const UPDATED_FIELD: Option<&'static str>;
    const OPS: Operations;

    type New: Serialize + Validate + Send + Sync;
    type Patch: Serialize + Validate + Send + Sync;

    fn id(&self) -> &str;
    fn mock(id: &str, today: NaiveDate) -> Self;
    fn mock_for_owner(owner: &str, limit: usize, today: NaiveDate) -> Vec<Self>;
    fn mock_created(new: &Self::New, now: DateTime<Utc>) -> Self;
    fn apply(&mut self, patch: &Self::Patch, now: DateTime<Utc>);
}

impl Record for Patient {
    const TABLE: &'static str = "patients";
    const ENTITY: &'static str = "patient";
    const OWNER_COLUMN: &'static str = "owner_id";
    const ORDER_COLUMN: &'static str = "created_at";
    const NEWEST_FIRST: bool = false;
    const CREATED_FIELDS: &'static [&'static str] = &["created_at", "updated_at"];
    const UPDATED_FIELD: Option<&'static str> = Some("updated_at");
    const OPS: Operations = Operations {
        create: "patients.create",
        get: "patients.get",
        update: "patients.update",
        list: "patients.list",
    };

    type New = NewPatient;
    type Patch = PatientPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn mock(id: &str, today: NaiveDate) -> Self {
        synthetic::patient(id, today)
    }

    fn mock_for_owner(owner: &str, limit: usize, today: NaiveDate) -> Vec<Self> {
        synthetic::patients_for_owner(owner, limit, today)
    }

    fn mock_created(new: &NewPatient, now: DateTime<Utc>) -> Self {
        synthetic::created_patient(new, now)
    }

    fn apply(&mut self, patch: &PatientPatch, now: DateTime<Utc>) {
        if let Some(v) = &patch.first_name {
            self.first_name = v.clone();
        }
        if let Some(v) = &patch.last_name {
            self.last_name = v.clone();
        }
        if let Some(v) = &patch.email {
            self.email = v.clone();
        }
        if let Some(v) = &patch.phone {
            self.phone = Some(v.clone());
        }
        if let Some(v) = patch.date_of_birth {
            self.date_of_birth = Some(v);
        }
        self.updated_at = now;
    }
}

impl Record for Appointment {
    const TABLE: &'static str = "appointments";
    const ENTITY: &'static str = "appointment";
    const OWNER_COLUMN: &'static str = "patient_id";
    const ORDER_COLUMN: &'static str = "scheduled_at";
    const NEWEST_FIRST: bool = false;
    const CREATED_FIELDS: &'static [&'static str] = &["created_at"];
    const UPDATED_FIELD: Option<&'static str> = None;
    const OPS: Operations = Operations {
        create: "appointments.create",
        get: "appointments.get",
        update: "appointments.update",
        list: "appointments.list",
    };

    type New = NewAppointment;
    type Patch = AppointmentPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn mock(id: &str, today: NaiveDate) -> Self {
        synthetic::appointment(id, today)
    }

    fn mock_for_owner(owner: &str, limit: usize, today: NaiveDate) -> Vec<Self> {
        synthetic::appointments_for_patient(owner, limit, today)
    }

    fn mock_created(new: &NewAppointment, now: DateTime<Utc>) -> Self {
        synthetic::created_appointment(new, now)
    }

    fn apply(&mut self, patch: &AppointmentPatch, _now: DateTime<Utc>) {
        if let Some(v) = patch.scheduled_at {
            self.scheduled_at = v;
        }
        if let Some(v) = patch.duration_minutes {
            self.duration_minutes = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = &patch.notes {
            self.notes = Some(v.clone());
        }
    }
}

impl Record for ProgressEntry {
    const TABLE: &'static str = "progress_entries";
    const ENTITY: &'static str = "progress entry";
    const OWNER_COLUMN: &'static str = "patient_id";
    const ORDER_COLUMN: &'static str = "recorded_at";
    const NEWEST_FIRST: bool = true;
    const CREATED_FIELDS: &'static [&'static str] = &[];
    const UPDATED_FIELD: Option<&'static str> = None;
    const OPS: Operations = Operations {
        create: "progress_entries.create",
        get: "progress_entries.get",
        update: "progress_entries.update",
        list: "progress_entries.list",
    };

    type New = NewProgressEntry;
    type Patch = ProgressPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn mock(id: &str, today: NaiveDate) -> Self {
        synthetic::progress_entry(id, today)
    }

    fn mock_for_owner(owner: &str, limit: usize, today: NaiveDate) -> Vec<Self> {
        synthetic::progress_for_patient(owner, limit, today)
    }

    fn mock_created(new: &NewProgressEntry, _now: DateTime<Utc>) -> Self {
        synthetic::created_progress_entry(new)
    }

    fn apply(&mut self, patch: &ProgressPatch, _now: DateTime<Utc>) {
        if let Some(v) = patch.pain_level {
            self.pain_level = v;
        }
        if let Some(v) = patch.mobility_score {
            self.mobility_score = v;
        }
        if let Some(v) = &patch.notes {
            self.notes = Some(v.clone());
        }
    }
}

fn decode<R: Record>(row: Value) -> DataResult<R> {
    serde_json::from_value(row).map_err(|e| DataError::Decode {
        entity: R::ENTITY,
        message: e.to_string(),
    })
}

fn encode<T: Serialize>(entity: &str, value: &T) -> DataResult<Value> {
    serde_json::to_value(value).map_err(|e| DataError::validation(format!("cannot encode {}: {}", entity, e)))
}

fn stamp(row: &mut Value, fields: &[&str], now: DateTime<Utc>) {
    if let Some(object) = row.as_object_mut() {
        for field in fields {
            object.insert((*field).to_string(), Value::String(timestamp(now)));
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn not_found(entity: &str, id: &str) -> DataError {
    DataError::Backend {
        message: format!("{} {} not found", entity, id),
        code: Some("PGRST116".to_string()),
        details: None,
        hint: None,
    }
}

/// Slots for `date` with every slot overlapping a booked appointment taken
pub fn free_slots(date: NaiveDate, hours: &ClinicHours, booked: &[Appointment]) -> Vec<TimeSlot> {
    TimeSlot::grid(date, hours)
        .into_iter()
        .map(|slot| {
            let taken = booked
                .iter()
                .any(|a| a.status.holds_slot() && slot.overlaps(a.scheduled_at, a.ends_at()));
            TimeSlot {
                available: !taken,
                ..slot
            }
        })
        .collect()
}

/// Entry point for patient, appointment and progress data.
///
/// Reads go through the query cache and fall back to synthetic data when the
/// interceptor is on, the backend is unconfigured, or the backend service is
/// unhealthy. Writes only take the synthetic path for the first two reasons;
/// a failed write is always an error.
pub struct DataLayer {
    cache: Arc<QueryCache>,
    interceptor: Arc<MockInterceptor>,
    policy: FallbackPolicy,
    service: String,
    entity_ttl: Duration,
    list_ttl: Duration,
    hours: ClinicHours,
}

impl DataLayer {
    pub fn new(
        config: &Config,
        cache: Arc<QueryCache>,
        interceptor: Arc<MockInterceptor>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            cache,
            interceptor,
            policy,
            service: config.backend.service.clone(),
            entity_ttl: config.cache.ttl.as_std(),
            list_ttl: config.cache.list_ttl.as_std(),
            hours: config.clinic.clone(),
        }
    }

    pub fn patients(&self) -> Resource<'_, Patient> {
        Resource::new(self)
    }

    pub fn appointments(&self) -> Resource<'_, Appointment> {
        Resource::new(self)
    }

    pub fn progress(&self) -> Resource<'_, ProgressEntry> {
        Resource::new(self)
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn interceptor(&self) -> &Arc<MockInterceptor> {
        &self.interceptor
    }

    fn mock_reads(&self) -> bool {
        self.interceptor.is_enabled()
            || !self.cache.pool().is_configured()
            || self.policy.should_use_fallback(&self.service)
    }

    fn mock_writes(&self) -> bool {
        self.interceptor.is_enabled() || !self.cache.pool().is_configured()
    }

    fn attempts(&self) -> u32 {
        let default = self.cache.pool().retry_policy().attempts();
        self.policy.retry_budget(&self.service, default)
    }

    async fn select(&self, query: &Query) -> DataResult<Vec<Value>> {
        let backend = self.cache.pool().connection(&query.table)?;
        backend.select(query).await
    }

    fn invalidate(&self, table: &str) {
        self.cache.clear_cache(Some(table));
        self.interceptor.clear_cache(Some(table));
    }

    /// Cached read with synthetic fallback. Transport and backend failures
    /// that survive the retries come back as `T::default()`.
    async fn read<T, F, M>(
        &self,
        operation: &'static str,
        key: &str,
        query: &Query,
        ttl: Duration,
        convert: F,
        mock: M,
    ) -> DataResult<T>
    where
        T: Clone + Default + Send + Sync + 'static,
        F: Fn(Vec<Value>) -> DataResult<T>,
        M: FnOnce() -> T,
    {
        let cache_key = query.cache_key();
        let attempts = self.attempts();

        let result = self
            .interceptor
            .intercept_conditional(
                self.mock_reads(),
                key,
                || {
                    self.cache
                        .cached_query_with_attempts(&query.table, Some(cache_key.as_str()), ttl, attempts, || async {
                            let rows = self.select(query).await?;
                            convert(rows)
                        })
                },
                mock,
                InterceptOptions::cached(),
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_absence_safe() => {
                warn!("{} failed for '{}', returning no data: {}", operation, key, e);
                Ok(T::default())
            }
            Err(e) => Err(e.context(operation, key)),
        }
    }

    /// Bookable slots for `date` within clinic hours
    pub async fn available_slots(&self, date: NaiveDate) -> DataResult<Vec<TimeSlot>> {
        let start = at_time(date, 0, 0);
        let end = at_time(date, 24, 0);
        let query = Query::table(Appointment::TABLE)
            .gte("scheduled_at", timestamp(start))
            .lt("scheduled_at", timestamp(end))
            .order_by("scheduled_at", false);
        let hours = &self.hours;

        self.read(
            "appointments.slots",
            &format!("appointments.slots:{}", date),
            &query,
            self.list_ttl,
            |rows| {
                let booked = rows
                    .into_iter()
                    .map(decode::<Appointment>)
                    .collect::<DataResult<Vec<_>>>()?;
                Ok(free_slots(date, hours, &booked))
            },
            || synthetic::availability(date, hours),
        )
        .await
    }
}

/// Typed operations on one table
pub struct Resource<'a, R> {
    data: &'a DataLayer,
    record: PhantomData<R>,
}

impl<'a, R: Record> Resource<'a, R> {
    fn new(data: &'a DataLayer) -> Self {
        Self {
            data,
            record: PhantomData,
        }
    }

    fn require_id(operation: &'static str, id: &str) -> DataResult<()> {
        if id.trim().is_empty() {
            return Err(DataError::validation(format!("{} id is required", R::ENTITY)).context(operation, R::TABLE));
        }
        Ok(())
    }

    pub async fn create(&self, new: R::New) -> DataResult<R> {
        let operation = R::OPS.create;
        let context = |e: DataError| e.context(operation, R::TABLE);
        new.validate().map_err(context)?;

        let now = Utc::now();
        let mut row = encode(R::ENTITY, &new).map_err(context)?;
        stamp(&mut row, R::CREATED_FIELDS, now);

        let data = self.data;
        let pool = data.cache.pool();
        let created = data
            .interceptor
            .intercept_conditional(
                data.mock_writes(),
                operation,
                || async {
                    let stored = pool
                        .execute_with_retry(|| async {
                            let backend = pool.connection(R::TABLE)?;
                            backend.insert(R::TABLE, row.clone()).await
                        })
                        .await?;
                    decode::<R>(stored)
                },
                || R::mock_created(&new, now),
                InterceptOptions::default(),
            )
            .await
            .map_err(context)?;

        data.invalidate(R::TABLE);
        debug!("Created {} {}", R::ENTITY, created.id());
        Ok(created)
    }

    pub async fn get_by_id(&self, id: &str) -> DataResult<Option<R>> {
        Self::require_id(R::OPS.get, id)?;
        let query = Query::table(R::TABLE).eq("id", id).limit(1);
        let today = Utc::now().date_naive();

        self.data
            .read(
                R::OPS.get,
                &format!("{}:{}", R::OPS.get, id),
                &query,
                self.data.entity_ttl,
                |rows| rows.into_iter().next().map(decode::<R>).transpose(),
                || Some(R::mock(id, today)),
            )
            .await
    }

    pub async fn update(&self, id: &str, patch: R::Patch) -> DataResult<R> {
        let operation = R::OPS.update;
        Self::require_id(operation, id)?;
        let context = |e: DataError| e.context(operation, id);
        patch.validate().map_err(context)?;

        let now = Utc::now();
        let mut body = encode(R::ENTITY, &patch).map_err(context)?;
        if let Some(field) = R::UPDATED_FIELD {
            stamp(&mut body, &[field], now);
        }

        let data = self.data;
        let pool = data.cache.pool();
        let updated = data
            .interceptor
            .intercept_conditional(
                data.mock_writes(),
                &format!("{}:{}", operation, id),
                || async {
                    let row = pool
                        .execute_with_retry(|| async {
                            let backend = pool.connection(R::TABLE)?;
                            backend.update(R::TABLE, id, body.clone()).await
                        })
                        .await?;
                    match row {
                        Some(row) => decode::<R>(row),
                        None => Err(not_found(R::ENTITY, id)),
                    }
                },
                || {
                    let mut record = R::mock(id, now.date_naive());
                    record.apply(&patch, now);
                    record
                },
                InterceptOptions::default(),
            )
            .await
            .map_err(context)?;

        data.invalidate(R::TABLE);
        debug!("Updated {} {}", R::ENTITY, id);
        Ok(updated)
    }

    pub async fn list_by_owner(&self, owner_id: &str, limit: usize) -> DataResult<Vec<R>> {
        if owner_id.trim().is_empty() {
            return Err(DataError::validation("owner id is required").context(R::OPS.list, R::TABLE));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = Query::table(R::TABLE)
            .eq(R::OWNER_COLUMN, owner_id)
            .order_by(R::ORDER_COLUMN, R::NEWEST_FIRST)
            .limit(limit);
        let today = Utc::now().date_naive();

        self.data
            .read(
                R::OPS.list,
                &format!("{}:{}:{}", R::OPS.list, owner_id, limit),
                &query,
                self.data.list_ttl,
                |rows| rows.into_iter().map(decode::<R>).collect(),
                || R::mock_for_owner(owner_id, limit, today),
            )
            .await
    }
}
