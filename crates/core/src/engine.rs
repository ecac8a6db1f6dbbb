//! The reconciliation engine wired to its SQLite stores.

use crate::config::CoreConfig;
use crate::context::CallContext;
use crate::error::{EmtctError, EmtctResult, Phase};
use crate::labs::{LabResult, LabTimeline};
use crate::registry::{Patient, Pregnancy, RegistrySync};
use crate::screening::{syphilis_history, BirthDates, ScreeningService, SyphilisScreening};
use crate::store::{MirrorDb, SourceOfRecordDb};
use chrono::NaiveDate;
use emtct_types::PatientId;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    source: Arc<SourceOfRecordDb>,
    mirror: Arc<MirrorDb>,
    timeline: LabTimeline<SourceOfRecordDb>,
    registry_sync: RegistrySync<SourceOfRecordDb, MirrorDb>,
    screenings: ScreeningService<SourceOfRecordDb, MirrorDb>,
    lookup_timeout: Option<Duration>,
}

fn ensure_parent_dir(path: &Path) -> EmtctResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| EmtctError::Config(format!("cannot create {}: {e}", parent.display()))),
        _ => Ok(()),
    }
}

impl Engine {
    /// Open both databases named by `config`, creating them if needed.
    pub fn open(config: &CoreConfig) -> EmtctResult<Self> {
        ensure_parent_dir(config.source_db_path())?;
        ensure_parent_dir(config.mirror_db_path())?;
        let source =
            SourceOfRecordDb::open_with_readers(config.source_db_path(), config.sample_workers())
                .map_err(EmtctError::StoreOpen)?;
        let mirror = MirrorDb::open(config.mirror_db_path()).map_err(EmtctError::StoreOpen)?;
        Self::from_stores(
            Arc::new(source),
            Arc::new(mirror),
            config.sample_workers(),
            config.lookup_timeout(),
        )
    }

    pub fn from_stores(
        source: Arc<SourceOfRecordDb>,
        mirror: Arc<MirrorDb>,
        sample_workers: usize,
        lookup_timeout: Option<Duration>,
    ) -> EmtctResult<Self> {
        Ok(Self {
            timeline: LabTimeline::new(Arc::clone(&source), sample_workers)?,
            registry_sync: RegistrySync::new(Arc::clone(&source), Arc::clone(&mirror)),
            screenings: ScreeningService::new(Arc::clone(&source), Arc::clone(&mirror)),
            source,
            mirror,
            lookup_timeout,
        })
    }

    /// A fresh context carrying the configured per-call deadline, if any.
    pub fn call_context(&self) -> CallContext {
        match self.lookup_timeout {
            Some(timeout) => CallContext::background().with_timeout(timeout),
            None => CallContext::background(),
        }
    }

    pub fn source(&self) -> &SourceOfRecordDb {
        &self.source
    }

    pub fn mirror(&self) -> &MirrorDb {
        &self.mirror
    }

    pub fn screenings(&self) -> &ScreeningService<SourceOfRecordDb, MirrorDb> {
        &self.screenings
    }

    /// Lab results anchored on an explicit LMP.
    pub fn labs(
        &self,
        ctx: &CallContext,
        patient_id: PatientId,
        lmp: Option<NaiveDate>,
    ) -> EmtctResult<Vec<LabResult>> {
        self.timeline.reconstruct(ctx, patient_id, lmp)
    }

    /// Lab results for the patient's most recent registry pregnancy. Empty when the patient
    /// has no pregnancy in the registry.
    pub fn pregnancy_labs(
        &self,
        ctx: &CallContext,
        patient_id: PatientId,
    ) -> EmtctResult<Vec<LabResult>> {
        ctx.check(Phase::MirrorPregnancies)?;
        let pregnancy = self
            .mirror
            .find_latest_pregnancy(patient_id)
            .map_err(|e| {
                EmtctError::lookup(Phase::MirrorPregnancies, format!("patient {patient_id}"), e)
            })?;
        self.timeline
            .reconstruct(ctx, patient_id, pregnancy.map(|p| p.lmp))
    }

    pub fn syphilis_screenings(
        &self,
        ctx: &CallContext,
        infant_id: PatientId,
    ) -> EmtctResult<Vec<SyphilisScreening>> {
        ctx.check(Phase::Patients)?;
        let birth_date = self
            .source
            .find_birth_date(infant_id)
            .map_err(|e| EmtctError::lookup(Phase::Patients, format!("patient {infant_id}"), e))?;
        syphilis_history(&self.timeline, ctx, infant_id, birth_date)
    }

    pub fn sync_year(&self, ctx: &CallContext, year: i32) -> EmtctResult<Vec<Pregnancy>> {
        self.registry_sync.sync_year(ctx, year)
    }

    pub fn sync_patients(&self, ctx: &CallContext, year: i32) -> EmtctResult<Vec<Patient>> {
        self.registry_sync.sync_patients(ctx, year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, date, order, pregnancy, result, sample};

    fn engine() -> Engine {
        let source = SourceOfRecordDb::open_in_memory().unwrap();
        source
            .insert_patient(PatientId::new(100), "Maria", "Lopez", Some(date(1995, 6, 1)))
            .unwrap();
        source
            .insert_patient(PatientId::new(200), "Ana", "Lopez", Some(date(2022, 9, 1)))
            .unwrap();
        source
            .insert_pregnancy(&pregnancy(1, 100, date(2022, 1, 3)))
            .unwrap();
        source
            .insert_test_order(&order(100, 1, 11, "HIV", at(2022, 2, 1)))
            .unwrap();
        source
            .insert_test_result(&result(501, 1, 11, "Rapid", "Negative"), at(2022, 2, 2))
            .unwrap();
        source
            .insert_test_sample(&sample(1, 11, Some(at(2022, 1, 31))))
            .unwrap();
        source
            .insert_test_order(&order(200, 2, 21, "Syphilis", at(2022, 10, 1)))
            .unwrap();
        source
            .insert_test_result(&result(601, 2, 21, "VDRL", "Non-reactive"), at(2022, 10, 3))
            .unwrap();

        Engine::from_stores(
            Arc::new(source),
            Arc::new(MirrorDb::open_in_memory().unwrap()),
            2,
            None,
        )
        .unwrap()
    }

    #[test]
    fn labs_follow_the_synced_pregnancy() {
        let engine = engine();
        let ctx = engine.call_context();
        assert!(
            engine.pregnancy_labs(&ctx, PatientId::new(100)).unwrap().is_empty(),
            "nothing is anchored before the registry is synced"
        );

        let inserted = engine.sync_year(&ctx, 2022).unwrap();
        assert_eq!(inserted.len(), 1);

        let labs = engine.pregnancy_labs(&ctx, PatientId::new(100)).unwrap();
        assert_eq!(labs.len(), 1);
        assert_eq!(labs[0].test_name, "HIV - Rapid");
        assert_eq!(labs[0].sample_collected_at, Some(at(2022, 1, 31)));
    }

    #[test]
    fn patient_sync_copies_the_year_cohort() {
        let engine = engine();
        let ctx = engine.call_context();
        let inserted = engine.sync_patients(&ctx, 2022).unwrap();
        let ids: Vec<i64> = inserted.iter().map(|p| p.patient_id.get()).collect();
        assert_eq!(ids, vec![100]);
        assert!(engine.sync_patients(&ctx, 2022).unwrap().is_empty());
    }

    #[test]
    fn syphilis_screenings_are_anchored_on_birth_date() {
        let engine = engine();
        let screenings = engine
            .syphilis_screenings(&engine.call_context(), PatientId::new(200))
            .unwrap();
        assert_eq!(screenings.len(), 1);
        assert_eq!(screenings[0].test_name, "Syphilis - VDRL");
        assert_eq!(screenings[0].date_sample_taken, None);
    }

    #[test]
    fn configured_timeout_sets_a_deadline() {
        let source = Arc::new(SourceOfRecordDb::open_in_memory().unwrap());
        let mirror = Arc::new(MirrorDb::open_in_memory().unwrap());
        let engine =
            Engine::from_stores(source, mirror, 1, Some(Duration::from_nanos(1))).unwrap();
        let ctx = engine.call_context();
        std::thread::sleep(Duration::from_millis(2));
        let err = engine.sync_year(&ctx, 2022).unwrap_err();
        assert!(matches!(err, EmtctError::DeadlineExceeded { .. }));
    }

    #[test]
    fn open_creates_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::new(
            dir.path().join("nested/source.db"),
            dir.path().join("nested/mirror.db"),
            2,
            None,
        )
        .unwrap();
        let engine = Engine::open(&config).expect("open");
        assert!(dir.path().join("nested/source.db").exists());
        assert!(engine.sync_year(&engine.call_context(), 2022).unwrap().is_empty());
    }
}
