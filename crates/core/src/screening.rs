//! Infant screening records.
//!
//! HIV screenings are application-owned records whose `due_date` and `timely` flag are
//! derived from the screening policy at creation. Syphilis screenings are read straight from
//! the lab timeline and never carry a timeliness verdict.

use crate::context::CallContext;
use crate::error::{EmtctError, EmtctResult, Phase, StoreResult};
use crate::labs::{LabFacts, LabResult, LabTimeline};
use crate::policy::{due_date, is_timely, TestCategory};
use crate::registry::year_bounds;
use chrono::{DateTime, NaiveDate, Utc};
use emtct_types::{NonEmptyText, PatientId, ResultId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lab test name under which infant syphilis screenings are ordered.
pub const SYPHILIS_TEST_NAME: &str = "Syphilis";

/// Editable part of an HIV screening record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HivScreeningDetails {
    /// Category label, e.g. `"PCR 1"` or `"ELISA"`.
    pub test_name: String,
    pub screening_date: NaiveDate,
    pub date_sample_taken: Option<NaiveDate>,
    pub date_sample_received_at_hq: Option<NaiveDate>,
    pub date_sample_shipped: Option<NaiveDate>,
    pub date_result_received: Option<NaiveDate>,
    pub date_result_shared: Option<NaiveDate>,
    pub sample_code: String,
    pub destination: String,
    pub result: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HivScreening {
    pub id: Uuid,
    pub patient_id: PatientId,
    pub mother_id: PatientId,
    #[serde(flatten)]
    pub details: HivScreeningDetails,
    pub due_date: NaiveDate,
    pub timely: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

fn timely_for(birth_date: NaiveDate, details: &HivScreeningDetails) -> bool {
    let category = TestCategory::parse(&details.test_name);
    details
        .date_sample_taken
        .is_some_and(|taken| is_timely(birth_date, category, taken))
}

impl HivScreening {
    /// Creates a record with `due_date` and `timely` derived from the infant's birth date.
    /// A screening without a sample yet is not timely.
    pub fn create(
        patient_id: PatientId,
        mother_id: PatientId,
        birth_date: NaiveDate,
        details: HivScreeningDetails,
        created_by: &NonEmptyText,
        now: DateTime<Utc>,
    ) -> Self {
        let category = TestCategory::parse(&details.test_name);
        Self {
            id: Uuid::new_v4(),
            patient_id,
            mother_id,
            due_date: due_date(category, birth_date),
            timely: timely_for(birth_date, &details),
            details,
            created_at: now,
            created_by: created_by.as_str().to_owned(),
            updated_at: None,
            updated_by: None,
        }
    }

    /// Replaces the editable fields and recomputes `timely`. The original `due_date` is kept
    /// even if the test name changed.
    pub fn amend(
        &mut self,
        birth_date: NaiveDate,
        details: HivScreeningDetails,
        updated_by: &NonEmptyText,
        now: DateTime<Utc>,
    ) {
        self.timely = timely_for(birth_date, &details);
        self.details = details;
        self.updated_at = Some(now);
        self.updated_by = Some(updated_by.as_str().to_owned());
    }
}

/// Whether a screening sample was taken within its window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    Timely,
    NotTimely,
    NotAvailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyphilisScreening {
    pub id: ResultId,
    pub patient_id: PatientId,
    pub test_name: String,
    pub screening_date: NaiveDate,
    pub date_sample_taken: Option<NaiveDate>,
    pub date_result_received: Option<NaiveDate>,
    pub result: String,
    pub timely: Timeliness,
}

impl From<LabResult> for SyphilisScreening {
    fn from(lab: LabResult) -> Self {
        Self {
            id: lab.result_id,
            patient_id: lab.patient_id,
            test_name: lab.test_name,
            screening_date: lab.order_received_at.date(),
            date_sample_taken: lab.sample_collected_at.map(|t| t.date()),
            date_result_received: lab.released_at.map(|t| t.date()),
            result: lab.result,
            timely: Timeliness::NotAvailable,
        }
    }
}

/// Syphilis screenings received during the infant's first two years.
pub fn syphilis_history<F: LabFacts>(
    timeline: &LabTimeline<F>,
    ctx: &CallContext,
    infant_id: PatientId,
    birth_date: Option<NaiveDate>,
) -> EmtctResult<Vec<SyphilisScreening>> {
    let labs =
        timeline.reconstruct_screening_history(ctx, infant_id, birth_date, SYPHILIS_TEST_NAME)?;
    Ok(labs.into_iter().map(SyphilisScreening::from).collect())
}

/// HIV screenings for one infant whose sample is still outstanding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPcr {
    pub infant_id: PatientId,
    pub screenings: Vec<HivScreening>,
}

/// Groups screenings by infant, keeping infants in first-seen order.
pub fn group_by_infant(screenings: Vec<HivScreening>) -> Vec<MissingPcr> {
    let mut groups: Vec<MissingPcr> = Vec::new();
    for s in screenings {
        match groups.iter_mut().find(|g| g.infant_id == s.patient_id) {
            Some(group) => group.screenings.push(s),
            None => groups.push(MissingPcr {
                infant_id: s.patient_id,
                screenings: vec![s],
            }),
        }
    }
    groups
}

/// Birth dates as held by the source of record.
pub trait BirthDates: Send + Sync {
    fn find_birth_date(&self, patient_id: PatientId) -> StoreResult<Option<NaiveDate>>;
}

/// Persistence for HIV screening records.
pub trait HivScreeningRecords: Send + Sync {
    fn insert_hiv_screening(&self, screening: &HivScreening) -> StoreResult<()>;

    fn find_hiv_screenings(&self, patient_id: PatientId) -> StoreResult<Vec<HivScreening>>;

    fn find_hiv_screening(&self, id: Uuid) -> StoreResult<Option<HivScreening>>;

    /// Returns `false` when no record with the screening's id exists.
    fn update_hiv_screening(&self, screening: &HivScreening) -> StoreResult<bool>;

    /// Screenings due in `[start, end)` that have no sample taken.
    fn find_unsampled_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<HivScreening>>;
}

/// Creates, amends and reports on HIV screening records.
pub struct ScreeningService<B, R> {
    birth_dates: Arc<B>,
    records: Arc<R>,
}

impl<B, R> Clone for ScreeningService<B, R> {
    fn clone(&self) -> Self {
        Self {
            birth_dates: Arc::clone(&self.birth_dates),
            records: Arc::clone(&self.records),
        }
    }
}

impl<B: BirthDates, R: HivScreeningRecords> ScreeningService<B, R> {
    pub fn new(birth_dates: Arc<B>, records: Arc<R>) -> Self {
        Self {
            birth_dates,
            records,
        }
    }

    pub fn hiv_screenings(
        &self,
        ctx: &CallContext,
        infant_id: PatientId,
    ) -> EmtctResult<Vec<HivScreening>> {
        ctx.check(Phase::Screenings)?;
        self.records
            .find_hiv_screenings(infant_id)
            .map_err(|e| EmtctError::lookup(Phase::Screenings, format!("patient {infant_id}"), e))
    }

    pub fn create_hiv_screening(
        &self,
        ctx: &CallContext,
        infant_id: PatientId,
        mother_id: PatientId,
        details: HivScreeningDetails,
        created_by: &NonEmptyText,
    ) -> EmtctResult<HivScreening> {
        let birth_date = self.birth_date(ctx, infant_id)?;
        let screening = HivScreening::create(
            infant_id,
            mother_id,
            birth_date,
            details,
            created_by,
            Utc::now(),
        );

        ctx.check(Phase::Screenings)?;
        self.records
            .insert_hiv_screening(&screening)
            .map_err(|e| EmtctError::write(Phase::Screenings, format!("patient {infant_id}"), e))?;

        tracing::info!(
            patient_id = %infant_id,
            screening_id = %screening.id,
            timely = screening.timely,
            "created hiv screening"
        );
        Ok(screening)
    }

    pub fn amend_hiv_screening(
        &self,
        ctx: &CallContext,
        id: Uuid,
        details: HivScreeningDetails,
        updated_by: &NonEmptyText,
    ) -> EmtctResult<HivScreening> {
        let subject = format!("screening {id}");
        ctx.check(Phase::Screenings)?;
        let mut screening = self
            .records
            .find_hiv_screening(id)
            .map_err(|e| EmtctError::lookup(Phase::Screenings, &subject, e))?
            .ok_or_else(|| EmtctError::NotFound {
                entity: "hiv screening",
                id: id.to_string(),
            })?;

        let birth_date = self.birth_date(ctx, screening.patient_id)?;
        screening.amend(birth_date, details, updated_by, Utc::now());

        ctx.check(Phase::Screenings)?;
        let updated = self
            .records
            .update_hiv_screening(&screening)
            .map_err(|e| EmtctError::write(Phase::Screenings, &subject, e))?;
        if !updated {
            return Err(EmtctError::NotFound {
                entity: "hiv screening",
                id: id.to_string(),
            });
        }

        tracing::info!(screening_id = %id, timely = screening.timely, "amended hiv screening");
        Ok(screening)
    }

    /// Screenings due during `year` whose sample has not been taken, grouped by infant.
    pub fn missing_pcrs(&self, ctx: &CallContext, year: i32) -> EmtctResult<Vec<MissingPcr>> {
        let (start, end) = year_bounds(year)?;
        ctx.check(Phase::Screenings)?;
        let screenings = self
            .records
            .find_unsampled_due_between(start, end)
            .map_err(|e| EmtctError::lookup(Phase::Screenings, format!("year {year}"), e))?;
        Ok(group_by_infant(screenings))
    }

    fn birth_date(&self, ctx: &CallContext, patient_id: PatientId) -> EmtctResult<NaiveDate> {
        ctx.check(Phase::Patients)?;
        self.birth_dates
            .find_birth_date(patient_id)
            .map_err(|e| EmtctError::lookup(Phase::Patients, format!("patient {patient_id}"), e))?
            .ok_or_else(|| EmtctError::NotFound {
                entity: "patient birth date",
                id: patient_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, date, MemoryScreenings};

    fn user() -> NonEmptyText {
        NonEmptyText::new("nurse.jones").expect("valid user")
    }

    fn details(test_name: &str, taken: Option<NaiveDate>) -> HivScreeningDetails {
        HivScreeningDetails {
            test_name: test_name.into(),
            screening_date: date(2023, 3, 10),
            date_sample_taken: taken,
            sample_code: "S-001".into(),
            destination: "CML".into(),
            result: "Pending".into(),
            ..HivScreeningDetails::default()
        }
    }

    fn service() -> ScreeningService<MemoryScreenings, MemoryScreenings> {
        let store = Arc::new(MemoryScreenings::with_birth_date(
            PatientId::new(7),
            date(2023, 3, 10),
        ));
        ScreeningService::new(store.clone(), store)
    }

    #[test]
    fn create_derives_due_date_and_timeliness() {
        let s = HivScreening::create(
            PatientId::new(7),
            PatientId::new(3),
            date(2023, 3, 10),
            details("PCR 1", Some(date(2023, 3, 12))),
            &user(),
            Utc::now(),
        );
        assert_eq!(s.due_date, date(2023, 3, 13));
        assert!(s.timely);
        assert_eq!(s.created_by, "nurse.jones");
        assert!(s.updated_at.is_none());
    }

    #[test]
    fn screening_without_sample_is_not_timely() {
        let s = HivScreening::create(
            PatientId::new(7),
            PatientId::new(3),
            date(2023, 3, 10),
            details("ELISA", None),
            &user(),
            Utc::now(),
        );
        assert!(!s.timely);
        assert_eq!(s.due_date, date(2024, 9, 10));
    }

    #[test]
    fn amend_keeps_due_date_and_recomputes_timely() {
        let birth = date(2023, 3, 10);
        let mut s = HivScreening::create(
            PatientId::new(7),
            PatientId::new(3),
            birth,
            details("PCR 1", None),
            &user(),
            Utc::now(),
        );
        let original_due = s.due_date;

        s.amend(birth, details("PCR 2", Some(date(2023, 4, 1))), &user(), Utc::now());

        assert_eq!(s.due_date, original_due, "due date must survive amendment");
        assert!(s.timely, "22 days is inside the PCR 2 window");
        assert_eq!(s.details.test_name, "PCR 2");
        assert_eq!(s.updated_by.as_deref(), Some("nurse.jones"));
    }

    #[test]
    fn syphilis_screening_never_has_timeliness() {
        let lab = LabResult {
            result_id: ResultId::new(5),
            patient_id: PatientId::new(7),
            test_name: "Syphilis - VDRL".into(),
            result: "Non-reactive".into(),
            order_id: emtct_types::OrderId::new(1),
            order_item_id: emtct_types::OrderItemId::new(2),
            order_received_at: at(2023, 5, 1),
            released_at: Some(at(2023, 5, 4)),
            sample_collected_at: Some(at(2023, 4, 30)),
        };
        let s = SyphilisScreening::from(lab);
        assert_eq!(s.timely, Timeliness::NotAvailable);
        assert_eq!(s.screening_date, date(2023, 5, 1));
        assert_eq!(s.date_sample_taken, Some(date(2023, 4, 30)));
        assert_eq!(s.date_result_received, Some(date(2023, 5, 4)));
    }

    #[test]
    fn screening_details_serialize_inline() {
        let s = HivScreening::create(
            PatientId::new(7),
            PatientId::new(3),
            date(2023, 3, 10),
            details("PCR 1", None),
            &user(),
            Utc::now(),
        );
        let json = serde_json::to_value(&s).expect("serialize");
        assert_eq!(json["test_name"], "PCR 1");
        assert_eq!(json["due_date"], "2023-03-13");
        assert_eq!(
            serde_json::to_value(Timeliness::NotAvailable).expect("serialize"),
            "not_available"
        );
    }

    #[test]
    fn service_creates_and_lists_screenings() {
        let svc = service();
        let ctx = CallContext::background();
        let created = svc
            .create_hiv_screening(
                &ctx,
                PatientId::new(7),
                PatientId::new(3),
                details("PCR 3", Some(date(2023, 7, 1))),
                &user(),
            )
            .expect("create");
        assert_eq!(created.due_date, date(2023, 6, 8));

        let listed = svc.hiv_screenings(&ctx, PatientId::new(7)).expect("list");
        assert_eq!(listed, vec![created]);
    }

    #[test]
    fn creating_for_unknown_infant_is_not_found() {
        let err = service()
            .create_hiv_screening(
                &CallContext::background(),
                PatientId::new(99),
                PatientId::new(3),
                details("PCR 1", None),
                &user(),
            )
            .expect_err("no birth date");
        assert!(matches!(err, EmtctError::NotFound { .. }));
    }

    #[test]
    fn failed_insert_is_reported_as_a_write_failure() {
        let mut store = MemoryScreenings::with_birth_date(PatientId::new(7), date(2023, 3, 10));
        store.fail_writes = true;
        let store = Arc::new(store);
        let svc = ScreeningService::new(store.clone(), store);

        let err = svc
            .create_hiv_screening(
                &CallContext::background(),
                PatientId::new(7),
                PatientId::new(3),
                details("PCR 1", None),
                &user(),
            )
            .expect_err("insert should fail");
        assert!(
            matches!(
                err,
                EmtctError::WriteFailure {
                    phase: Phase::Screenings,
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn amending_missing_screening_is_not_found() {
        let err = service()
            .amend_hiv_screening(
                &CallContext::background(),
                Uuid::new_v4(),
                details("PCR 1", None),
                &user(),
            )
            .expect_err("unknown id");
        assert!(matches!(
            err,
            EmtctError::NotFound {
                entity: "hiv screening",
                ..
            }
        ));
    }

    #[test]
    fn missing_pcrs_are_grouped_by_infant_in_first_seen_order() {
        let mk = |patient: i64| {
            HivScreening::create(
                PatientId::new(patient),
                PatientId::new(1),
                date(2023, 1, 1),
                details("PCR 1", None),
                &user(),
                Utc::now(),
            )
        };
        let grouped = group_by_infant(vec![mk(8), mk(7), mk(8)]);
        let shape: Vec<(i64, usize)> = grouped
            .iter()
            .map(|g| (g.infant_id.get(), g.screenings.len()))
            .collect();
        assert_eq!(shape, vec![(8, 2), (7, 1)]);
    }
}
