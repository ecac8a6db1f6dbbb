//! The application's own database: the mirrored pregnancy registry and screening records.

use super::source::{patient_from_row, pregnancy_from_row};
use super::{open_connection, open_memory_connection, Migration};
use crate::error::StoreResult;
use crate::registry::{Patient, PatientRegistry, Pregnancy, PregnancyRegistry};
use crate::screening::{HivScreening, HivScreeningDetails, HivScreeningRecords};
use chrono::NaiveDate;
use emtct_types::PatientId;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

const MIGRATIONS: &[Migration] = &[
    (1, include_str!("../../migrations/mirror/001_initial.sql")),
    (2, include_str!("../../migrations/mirror/002_hiv_screenings.sql")),
    (3, include_str!("../../migrations/mirror/003_patients.sql")),
];

const SCREENING_COLUMNS: &str = "id, patient_id, mother_id, test_name, screening_date,
    date_sample_taken, date_sample_received_at_hq, date_sample_shipped, date_result_received,
    date_result_shared, sample_code, destination, result, due_date, timely,
    created_at, created_by, updated_at, updated_by";

pub struct MirrorDb {
    conn: Mutex<Connection>,
}

impl MirrorDb {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = open_connection(path, MIGRATIONS)?;
        tracing::debug!(path = %path.display(), "opened mirror registry");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory_connection(MIGRATIONS)?),
        })
    }

    /// The patient's pregnancy with the most recent LMP.
    pub fn find_latest_pregnancy(&self, patient_id: PatientId) -> StoreResult<Option<Pregnancy>> {
        let conn = self.conn.lock();
        let pregnancy = conn
            .query_row(
                "SELECT pregnancy_id, patient_id, lmp, edd, end_time FROM pregnancies
                 WHERE patient_id = ?1
                 ORDER BY lmp DESC, pregnancy_id DESC
                 LIMIT 1",
                params![patient_id.get()],
                pregnancy_from_row,
            )
            .optional()?;
        Ok(pregnancy)
    }
}

fn screening_from_row(row: &Row<'_>) -> rusqlite::Result<HivScreening> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    Ok(HivScreening {
        id,
        patient_id: PatientId::new(row.get(1)?),
        mother_id: PatientId::new(row.get(2)?),
        details: HivScreeningDetails {
            test_name: row.get(3)?,
            screening_date: row.get(4)?,
            date_sample_taken: row.get(5)?,
            date_sample_received_at_hq: row.get(6)?,
            date_sample_shipped: row.get(7)?,
            date_result_received: row.get(8)?,
            date_result_shared: row.get(9)?,
            sample_code: row.get(10)?,
            destination: row.get(11)?,
            result: row.get(12)?,
        },
        due_date: row.get(13)?,
        timely: row.get(14)?,
        created_at: row.get(15)?,
        created_by: row.get(16)?,
        updated_at: row.get(17)?,
        updated_by: row.get(18)?,
    })
}

impl PregnancyRegistry for MirrorDb {
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>> {
        let (start, end) = crate::registry::year_bounds(year)
            .map_err(|e| crate::error::StoreError::InvalidRow(e.to_string()))?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT pregnancy_id, patient_id, lmp, edd, end_time FROM pregnancies
             WHERE lmp >= ?1 AND lmp < ?2
             ORDER BY lmp, pregnancy_id",
        )?;
        let rows = stmt.query_map(params![start, end], pregnancy_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_pregnancies(&self, pregnancies: &[Pregnancy]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pregnancies (pregnancy_id, patient_id, lmp, edd, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for p in pregnancies {
                stmt.execute(params![
                    p.pregnancy_id.get(),
                    p.patient_id.get(),
                    p.lmp,
                    p.edd,
                    p.end_time,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl PatientRegistry for MirrorDb {
    fn find_patients(&self, patient_ids: &[PatientId]) -> StoreResult<Vec<Patient>> {
        if patient_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; patient_ids.len()].join(", ");
        let sql = format!(
            "SELECT patient_id, first_name, last_name, birth_date FROM patients
             WHERE patient_id IN ({placeholders})
             ORDER BY patient_id"
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let values = patient_ids.iter().map(|id| Value::Integer(id.get()));
        let rows = stmt.query_map(params_from_iter(values), patient_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_patients(&self, patients: &[Patient]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO patients (patient_id, first_name, last_name, birth_date)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for p in patients {
                stmt.execute(params![
                    p.patient_id.get(),
                    p.first_name,
                    p.last_name,
                    p.birth_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl HivScreeningRecords for MirrorDb {
    fn insert_hiv_screening(&self, s: &HivScreening) -> StoreResult<()> {
        let d = &s.details;
        self.conn.lock().execute(
            &format!(
                "INSERT INTO hiv_screenings ({SCREENING_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                s.id.to_string(),
                s.patient_id.get(),
                s.mother_id.get(),
                d.test_name,
                d.screening_date,
                d.date_sample_taken,
                d.date_sample_received_at_hq,
                d.date_sample_shipped,
                d.date_result_received,
                d.date_result_shared,
                d.sample_code,
                d.destination,
                d.result,
                s.due_date,
                s.timely,
                s.created_at,
                s.created_by,
                s.updated_at,
                s.updated_by,
            ],
        )?;
        Ok(())
    }

    fn find_hiv_screenings(&self, patient_id: PatientId) -> StoreResult<Vec<HivScreening>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCREENING_COLUMNS} FROM hiv_screenings
             WHERE patient_id = ?1
             ORDER BY screening_date, created_at"
        ))?;
        let rows = stmt.query_map(params![patient_id.get()], screening_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn find_hiv_screening(&self, id: Uuid) -> StoreResult<Option<HivScreening>> {
        let conn = self.conn.lock();
        let screening = conn
            .query_row(
                &format!("SELECT {SCREENING_COLUMNS} FROM hiv_screenings WHERE id = ?1"),
                params![id.to_string()],
                screening_from_row,
            )
            .optional()?;
        Ok(screening)
    }

    fn update_hiv_screening(&self, s: &HivScreening) -> StoreResult<bool> {
        let d = &s.details;
        let changed = self.conn.lock().execute(
            "UPDATE hiv_screenings
             SET test_name = ?2, screening_date = ?3, date_sample_taken = ?4,
                 date_sample_received_at_hq = ?5, date_sample_shipped = ?6,
                 date_result_received = ?7, date_result_shared = ?8, sample_code = ?9,
                 destination = ?10, result = ?11, timely = ?12, updated_at = ?13,
                 updated_by = ?14
             WHERE id = ?1",
            params![
                s.id.to_string(),
                d.test_name,
                d.screening_date,
                d.date_sample_taken,
                d.date_sample_received_at_hq,
                d.date_sample_shipped,
                d.date_result_received,
                d.date_result_shared,
                d.sample_code,
                d.destination,
                d.result,
                s.timely,
                s.updated_at,
                s.updated_by,
            ],
        )?;
        Ok(changed > 0)
    }

    fn find_unsampled_due_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<HivScreening>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCREENING_COLUMNS} FROM hiv_screenings
             WHERE due_date >= ?1 AND due_date < ?2 AND date_sample_taken IS NULL
             ORDER BY due_date, patient_id"
        ))?;
        let rows = stmt.query_map(params![start, end], screening_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
