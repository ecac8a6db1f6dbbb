//! Registry synchronisation.
//!
//! The application keeps a mirror of the source of record's pregnancies and of the patients
//! carrying them, so that lab queries can be anchored on a concrete LMP.
//! [`RegistrySync::sync_year`] computes the set of source pregnancies for a year that the
//! mirror does not yet hold (by pregnancy id) and inserts them in a single transaction.
//! [`RegistrySync::sync_patients`] does the same for the year's patients, keyed by patient id.
//!
//! Re-running a sync for an unchanged year inserts nothing. A failed insert leaves the
//! mirror exactly as it was.

use crate::context::CallContext;
use crate::error::{EmtctError, EmtctResult, Phase, StoreResult};
use chrono::{NaiveDate, NaiveDateTime};
use emtct_types::{PatientId, PregnancyId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

/// The source of record went live in 2008. Patient sync refuses earlier years.
pub const FIRST_PATIENT_SYNC_YEAR: i32 = 2008;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pregnancy {
    pub pregnancy_id: PregnancyId,
    pub patient_id: PatientId,
    /// Last menstrual period.
    pub lmp: NaiveDate,
    /// Estimated delivery date.
    pub edd: Option<NaiveDate>,
    /// Empty while the pregnancy is ongoing.
    pub end_time: Option<NaiveDateTime>,
}

/// Demographics of a patient in the EMTCT cohort.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
}

/// Pregnancies as held by the clinical source of record.
pub trait PregnancySource: Send + Sync {
    /// Pregnancies whose LMP falls in `year`.
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>>;
}

/// The application's mirrored pregnancy registry.
pub trait PregnancyRegistry: Send + Sync {
    /// Pregnancies whose LMP falls in `year`.
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>>;

    /// Inserts every pregnancy inside one transaction. Either all rows are committed or,
    /// on any failure, none are.
    fn insert_pregnancies(&self, pregnancies: &[Pregnancy]) -> StoreResult<()>;
}

/// Patients as held by the clinical source of record.
pub trait PatientSource: Send + Sync {
    /// Patients with at least one pregnancy whose LMP falls in `year`, each listed once.
    fn find_patients_by_year(&self, year: i32) -> StoreResult<Vec<Patient>>;
}

/// The application's mirrored patient table.
pub trait PatientRegistry: Send + Sync {
    /// The subset of `patient_ids` already mirrored.
    fn find_patients(&self, patient_ids: &[PatientId]) -> StoreResult<Vec<Patient>>;

    /// Inserts every patient inside one transaction, all or nothing.
    fn insert_patients(&self, patients: &[Patient]) -> StoreResult<()>;
}

/// Half-open LMP range `[Y-01-01, (Y+1)-01-01)` covered by a sync of `year`.
pub fn year_bounds(year: i32) -> EmtctResult<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1);
    let end = year
        .checked_add(1)
        .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1));
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(EmtctError::InvalidInput(format!("year {year} is out of range"))),
    }
}

/// Rows of `source` whose key is not in `known`, in source order. A key repeated by the
/// source is kept once.
fn id_delta<T, K: Eq + Hash>(
    source: Vec<T>,
    mut known: HashSet<K>,
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    source.into_iter().filter(|row| known.insert(key(row))).collect()
}

/// Source pregnancies whose id is absent from `existing`, in source order. A pregnancy id
/// listed more than once by the source appears once in the delta.
pub fn pregnancy_delta(source: Vec<Pregnancy>, existing: &[Pregnancy]) -> Vec<Pregnancy> {
    let known: HashSet<PregnancyId> = existing.iter().map(|p| p.pregnancy_id).collect();
    id_delta(source, known, |p| p.pregnancy_id)
}

/// Source patients whose id is absent from `existing`.
pub fn patient_delta(source: Vec<Patient>, existing: &[Patient]) -> Vec<Patient> {
    let known: HashSet<PatientId> = existing.iter().map(|p| p.patient_id).collect();
    id_delta(source, known, |p| p.patient_id)
}

/// Keeps the mirror converged with the source of record.
pub struct RegistrySync<S, R> {
    source: Arc<S>,
    registry: Arc<R>,
}

impl<S, R> Clone for RegistrySync<S, R> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S, R> RegistrySync<S, R> {
    pub fn new(source: Arc<S>, registry: Arc<R>) -> Self {
        Self { source, registry }
    }
}

impl<S: PregnancySource, R: PregnancyRegistry> RegistrySync<S, R> {
    /// Inserts into the registry every source pregnancy for `year` it does not yet hold and
    /// returns the inserted pregnancies.
    ///
    /// # Errors
    ///
    /// - [`EmtctError::InvalidInput`] if `year` has no calendar bounds
    /// - [`EmtctError::LookupFailure`] if either fetch fails (nothing is written)
    /// - [`EmtctError::TransactionFailure`] if the insert fails (nothing is committed)
    /// - [`EmtctError::Cancelled`] / [`EmtctError::DeadlineExceeded`] from `ctx`
    pub fn sync_year(&self, ctx: &CallContext, year: i32) -> EmtctResult<Vec<Pregnancy>> {
        year_bounds(year)?;
        let subject = format!("year {year}");

        ctx.check(Phase::MirrorPregnancies)?;
        let existing = self
            .registry
            .find_pregnancies_by_year(year)
            .map_err(|e| EmtctError::lookup(Phase::MirrorPregnancies, &subject, e))?;

        ctx.check(Phase::SourcePregnancies)?;
        let source = self
            .source
            .find_pregnancies_by_year(year)
            .map_err(|e| EmtctError::lookup(Phase::SourcePregnancies, &subject, e))?;

        let delta = pregnancy_delta(source, &existing);
        if delta.is_empty() {
            tracing::info!(year, existing = existing.len(), "pregnancy registry already in sync");
            return Ok(delta);
        }

        ctx.check(Phase::InsertPregnancies)?;
        self.registry
            .insert_pregnancies(&delta)
            .map_err(|source| EmtctError::TransactionFailure { year, source })?;

        tracing::info!(year, inserted = delta.len(), "synced pregnancy registry");
        Ok(delta)
    }
}

impl<S: PatientSource, R: PatientRegistry> RegistrySync<S, R> {
    /// Inserts into the registry every source patient for `year` it does not yet hold and
    /// returns the inserted patients.
    ///
    /// # Errors
    ///
    /// - [`EmtctError::InvalidInput`] if `year` predates [`FIRST_PATIENT_SYNC_YEAR`]
    /// - [`EmtctError::LookupFailure`] if either fetch fails (nothing is written)
    /// - [`EmtctError::TransactionFailure`] if the insert fails (nothing is committed)
    /// - [`EmtctError::Cancelled`] / [`EmtctError::DeadlineExceeded`] from `ctx`
    pub fn sync_patients(&self, ctx: &CallContext, year: i32) -> EmtctResult<Vec<Patient>> {
        if year < FIRST_PATIENT_SYNC_YEAR {
            return Err(EmtctError::InvalidInput(format!(
                "only years from {FIRST_PATIENT_SYNC_YEAR} onwards can be synced, got {year}"
            )));
        }
        year_bounds(year)?;
        let subject = format!("year {year}");

        ctx.check(Phase::SourcePatients)?;
        let source = self
            .source
            .find_patients_by_year(year)
            .map_err(|e| EmtctError::lookup(Phase::SourcePatients, &subject, e))?;
        if source.is_empty() {
            tracing::info!(year, "no source patients for year");
            return Ok(source);
        }

        let ids: Vec<PatientId> = source.iter().map(|p| p.patient_id).collect();
        ctx.check(Phase::MirrorPatients)?;
        let existing = self
            .registry
            .find_patients(&ids)
            .map_err(|e| EmtctError::lookup(Phase::MirrorPatients, &subject, e))?;

        let delta = patient_delta(source, &existing);
        if delta.is_empty() {
            tracing::info!(year, existing = existing.len(), "patient registry already in sync");
            return Ok(delta);
        }

        ctx.check(Phase::InsertPatients)?;
        self.registry
            .insert_patients(&delta)
            .map_err(|source| EmtctError::TransactionFailure { year, source })?;

        tracing::info!(year, inserted = delta.len(), "synced patient registry");
        Ok(delta)
    }
}
