//! In-memory fact providers and fixture builders for unit tests.

use crate::error::{StoreError, StoreResult};
use crate::labs::{LabFacts, TestOrder, TestResult, TestSample};
use crate::policy::DateWindow;
use crate::registry::{
    year_bounds, Patient, PatientRegistry, PatientSource, Pregnancy, PregnancyRegistry,
    PregnancySource,
};
use crate::screening::{BirthDates, HivScreening, HivScreeningRecords};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use emtct_types::{OrderId, OrderItemId, PatientId, PregnancyId, ResultId, SampleId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    date(y, m, d).and_time(NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"))
}

pub fn order(
    patient: i64,
    order_id: i64,
    item_id: i64,
    name: &str,
    received_at: NaiveDateTime,
) -> TestOrder {
    TestOrder {
        patient_id: PatientId::new(patient),
        visit_id: order_id * 10,
        order_id: OrderId::new(order_id),
        order_item_id: OrderItemId::new(item_id),
        test_name: name.into(),
        received_at,
        released_at: Some(received_at + chrono::Duration::days(2)),
    }
}

pub fn result(result_id: i64, order_id: i64, item_id: i64, label: &str, value: &str) -> TestResult {
    TestResult {
        result_id: ResultId::new(result_id),
        order_id: OrderId::new(order_id),
        order_item_id: OrderItemId::new(item_id),
        label: label.into(),
        value: value.into(),
    }
}

pub fn sample(order_id: i64, item_id: i64, collected_at: Option<NaiveDateTime>) -> TestSample {
    TestSample {
        sample_id: collected_at.map(|t| SampleId::new(t.and_utc().timestamp())),
        collected_at,
        order_id: OrderId::new(order_id),
        order_item_id: OrderItemId::new(item_id),
    }
}

pub fn pregnancy(id: i64, patient: i64, lmp: NaiveDate) -> Pregnancy {
    Pregnancy {
        pregnancy_id: PregnancyId::new(id),
        patient_id: PatientId::new(patient),
        lmp,
        edd: lmp.checked_add_days(chrono::Days::new(280)),
        end_time: None,
    }
}

pub fn patient(id: i64) -> Patient {
    Patient {
        patient_id: PatientId::new(id),
        first_name: format!("Patient{id}"),
        last_name: "Lopez".into(),
        birth_date: Some(date(1990, 1, 1)),
    }
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lookup failed"))
}

#[derive(Default)]
pub struct MemoryLabFacts {
    pub orders: Vec<TestOrder>,
    pub results: Vec<TestResult>,
    pub samples: Vec<TestSample>,
    pub fail_results: bool,
    pub fail_samples_for: Option<OrderItemId>,
    calls: AtomicUsize,
}

impl MemoryLabFacts {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LabFacts for MemoryLabFacts {
    fn find_test_orders(
        &self,
        patient_id: PatientId,
        window: &DateWindow,
    ) -> StoreResult<Vec<TestOrder>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .orders
            .iter()
            .filter(|o| o.patient_id == patient_id && window.contains(o.received_at))
            .cloned()
            .collect())
    }

    fn find_test_results(
        &self,
        _patient_id: PatientId,
        order_item_ids: &[OrderItemId],
    ) -> StoreResult<Vec<TestResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_results {
            return Err(unavailable("result"));
        }
        Ok(self
            .results
            .iter()
            .filter(|r| order_item_ids.contains(&r.order_item_id))
            .cloned()
            .collect())
    }

    fn find_test_sample(
        &self,
        order_item_id: OrderItemId,
        order_id: OrderId,
    ) -> StoreResult<Option<TestSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_samples_for == Some(order_item_id) {
            return Err(unavailable("sample"));
        }
        let mut matching: Vec<&TestSample> = self
            .samples
            .iter()
            .filter(|s| s.order_item_id == order_item_id && s.order_id == order_id)
            .collect();
        matching.sort_by_key(|s| (s.collected_at.is_none(), s.collected_at));
        Ok(matching.first().map(|s| (*s).clone()))
    }
}

/// Serves as either side of a registry sync.
#[derive(Default)]
pub struct MemoryPregnancies {
    rows: Mutex<Vec<Pregnancy>>,
    pub fail_fetch: bool,
    /// Fail on the n-th row of an insert batch.
    pub fail_insert_at: Option<usize>,
    fetches: AtomicUsize,
    inserts: AtomicUsize,
}

impl MemoryPregnancies {
    pub fn with(rows: Vec<Pregnancy>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Pregnancy> {
        self.rows.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    fn by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            return Err(unavailable("pregnancy"));
        }
        let (start, end) = year_bounds(year).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|p| start <= p.lmp && p.lmp < end)
            .cloned()
            .collect())
    }
}

impl PregnancySource for MemoryPregnancies {
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>> {
        self.by_year(year)
    }
}

impl PregnancyRegistry for MemoryPregnancies {
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>> {
        self.by_year(year)
    }

    fn insert_pregnancies(&self, pregnancies: &[Pregnancy]) -> StoreResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        let mut staged = rows.clone();
        for (i, p) in pregnancies.iter().enumerate() {
            if self.fail_insert_at == Some(i)
                || staged.iter().any(|r| r.pregnancy_id == p.pregnancy_id)
            {
                return Err(StoreError::InvalidRow(format!(
                    "cannot insert pregnancy {}",
                    p.pregnancy_id
                )));
            }
            staged.push(p.clone());
        }
        *rows = staged;
        Ok(())
    }
}

/// Patients paired with the LMP of one of their pregnancies on the source side, and a
/// plain patient table on the mirror side.
#[derive(Default)]
pub struct MemoryPatients {
    cohort: Vec<(Patient, NaiveDate)>,
    rows: Mutex<Vec<Patient>>,
    pub fail_insert_at: Option<usize>,
    fetches: AtomicUsize,
    inserts: AtomicUsize,
}

impl MemoryPatients {
    pub fn with(cohort: Vec<(Patient, NaiveDate)>) -> Self {
        Self {
            cohort,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Patient> {
        self.rows.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

impl PatientSource for MemoryPatients {
    fn find_patients_by_year(&self, year: i32) -> StoreResult<Vec<Patient>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (start, end) = year_bounds(year).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        let mut found: Vec<Patient> = Vec::new();
        for (p, lmp) in &self.cohort {
            if start <= *lmp && *lmp < end && !found.iter().any(|f| f.patient_id == p.patient_id)
            {
                found.push(p.clone());
            }
        }
        Ok(found)
    }
}

impl PatientRegistry for MemoryPatients {
    fn find_patients(&self, patient_ids: &[PatientId]) -> StoreResult<Vec<Patient>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|p| patient_ids.contains(&p.patient_id))
            .cloned()
            .collect())
    }

    fn insert_patients(&self, patients: &[Patient]) -> StoreResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        let mut staged = rows.clone();
        for (i, p) in patients.iter().enumerate() {
            if self.fail_insert_at == Some(i) || staged.iter().any(|r| r.patient_id == p.patient_id)
            {
                return Err(StoreError::InvalidRow(format!(
                    "cannot insert patient {}",
                    p.patient_id
                )));
            }
            staged.push(p.clone());
        }
        *rows = staged;
        Ok(())
    }
}

/// Birth dates and screening records held in memory.
#[derive(Default)]
pub struct MemoryScreenings {
    birth_dates: HashMap<PatientId, NaiveDate>,
    rows: Mutex<Vec<HivScreening>>,
    pub fail_writes: bool,
}

impl MemoryScreenings {
    pub fn with_birth_date(patient_id: PatientId, birth_date: NaiveDate) -> Self {
        let mut s = Self::default();
        s.birth_dates.insert(patient_id, birth_date);
        s
    }
}

impl BirthDates for MemoryScreenings {
    fn find_birth_date(&self, patient_id: PatientId) -> StoreResult<Option<NaiveDate>> {
        Ok(self.birth_dates.get(&patient_id).copied())
    }
}

impl HivScreeningRecords for MemoryScreenings {
    fn insert_hiv_screening(&self, screening: &HivScreening) -> StoreResult<()> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("screening store is read-only".into()));
        }
        self.rows.lock().push(screening.clone());
        Ok(())
    }

    fn find_hiv_screenings(&self, patient_id: PatientId) -> StoreResult<Vec<HivScreening>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect())
    }

    fn find_hiv_screening(&self, id: Uuid) -> StoreResult<Option<HivScreening>> {
        Ok(self.rows.lock().iter().find(|s| s.id == id).cloned())
    }

    fn update_hiv_screening(&self, screening: &HivScreening) -> StoreResult<bool> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("screening store is read-only".into()));
        }
        let mut rows = self.rows.lock();
        match rows.iter_mut().find(|s| s.id == screening.id) {
            Some(row) => {
                *row = screening.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_unsampled_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<HivScreening>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|s| {
                start <= s.due_date && s.due_date < end && s.details.date_sample_taken.is_none()
            })
            .cloned()
            .collect())
    }
}
