//! The clinical source of record.
//!
//! Read-only from the engine's point of view. The `insert_*` methods exist to load fixtures
//! into development and test databases.

use super::{open_connection, open_memory_connection, open_read_connection, Migration};
use crate::error::{StoreError, StoreResult};
use crate::labs::{LabFacts, TestOrder, TestResult, TestSample};
use crate::policy::DateWindow;
use crate::registry::{Patient, PatientSource, Pregnancy, PregnancySource};
use crate::screening::BirthDates;
use chrono::{NaiveDate, NaiveDateTime};
use emtct_types::{OrderId, OrderItemId, PatientId, PregnancyId, ResultId, SampleId};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

const MIGRATIONS: &[Migration] = &[(1, include_str!("../../migrations/source/001_initial.sql"))];

pub struct SourceOfRecordDb {
    conn: Mutex<Connection>,
    /// Empty for in-memory databases, where lookups share the writer.
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl SourceOfRecordDb {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_readers(path, 0)
    }

    /// Opens the database plus `readers` read-only connections for concurrent lookups.
    pub fn open_with_readers(path: &Path, readers: usize) -> StoreResult<Self> {
        let conn = open_connection(path, MIGRATIONS)?;
        let readers = (0..readers)
            .map(|_| open_read_connection(path).map(Mutex::new))
            .collect::<StoreResult<Vec<_>>>()?;
        tracing::debug!(
            path = %path.display(),
            readers = readers.len(),
            "opened source of record"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory_connection(MIGRATIONS)?),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// An idle read connection if one is free, otherwise the next in turn.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        let count = self.readers.len();
        if count == 0 {
            return self.conn.lock();
        }
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        (0..count)
            .find_map(|i| self.readers[(start + i) % count].try_lock())
            .unwrap_or_else(|| self.readers[start % count].lock())
    }

    pub fn insert_patient(
        &self,
        patient_id: PatientId,
        first_name: &str,
        last_name: &str,
        birth_date: Option<NaiveDate>,
    ) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO patients (patient_id, first_name, last_name, birth_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![patient_id.get(), first_name, last_name, birth_date],
        )?;
        Ok(())
    }

    pub fn insert_test_order(&self, order: &TestOrder) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO test_orders
             (order_item_id, order_id, visit_id, patient_id, test_name, received_at, released_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                order.order_item_id.get(),
                order.order_id.get(),
                order.visit_id,
                order.patient_id.get(),
                order.test_name,
                order.received_at,
                order.released_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_test_result(
        &self,
        result: &TestResult,
        last_modified: NaiveDateTime,
    ) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO test_results
             (result_id, order_id, order_item_id, label, value, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.result_id.get(),
                result.order_id.get(),
                result.order_item_id.get(),
                result.label,
                result.value,
                last_modified,
            ],
        )?;
        Ok(())
    }

    pub fn insert_test_sample(&self, sample: &TestSample) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO test_samples (sample_id, order_id, order_item_id, collected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sample.sample_id.map(SampleId::get),
                sample.order_id.get(),
                sample.order_item_id.get(),
                sample.collected_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_pregnancy(&self, pregnancy: &Pregnancy) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO pregnancies (pregnancy_id, patient_id, lmp, edd, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pregnancy.pregnancy_id.get(),
                pregnancy.patient_id.get(),
                pregnancy.lmp,
                pregnancy.edd,
                pregnancy.end_time,
            ],
        )?;
        Ok(())
    }
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<TestOrder> {
    Ok(TestOrder {
        order_item_id: OrderItemId::new(row.get(0)?),
        order_id: OrderId::new(row.get(1)?),
        visit_id: row.get(2)?,
        patient_id: PatientId::new(row.get(3)?),
        test_name: row.get(4)?,
        received_at: row.get(5)?,
        released_at: row.get(6)?,
    })
}

pub(crate) fn pregnancy_from_row(row: &Row<'_>) -> rusqlite::Result<Pregnancy> {
    Ok(Pregnancy {
        pregnancy_id: PregnancyId::new(row.get(0)?),
        patient_id: PatientId::new(row.get(1)?),
        lmp: row.get(2)?,
        edd: row.get(3)?,
        end_time: row.get(4)?,
    })
}

pub(crate) fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        patient_id: PatientId::new(row.get(0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        birth_date: row.get(3)?,
    })
}

impl LabFacts for SourceOfRecordDb {
    fn find_test_orders(
        &self,
        patient_id: PatientId,
        window: &DateWindow,
    ) -> StoreResult<Vec<TestOrder>> {
        const COLUMNS: &str = "SELECT order_item_id, order_id, visit_id, patient_id, test_name,
                                      received_at, released_at
                               FROM test_orders";
        let conn = self.reader();
        let orders = match *window {
            DateWindow::Between { start, end } => {
                let mut stmt = conn.prepare(&format!(
                    "{COLUMNS} WHERE patient_id = ?1 AND received_at >= ?2 AND received_at <= ?3
                     ORDER BY received_at, order_item_id"
                ))?;
                let rows = stmt.query_map(params![patient_id.get(), start, end], order_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            DateWindow::Before { end } => {
                let mut stmt = conn.prepare(&format!(
                    "{COLUMNS} WHERE patient_id = ?1 AND received_at < ?2
                     ORDER BY received_at, order_item_id"
                ))?;
                let rows = stmt.query_map(params![patient_id.get(), end], order_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(orders)
    }

    fn find_test_results(
        &self,
        patient_id: PatientId,
        order_item_ids: &[OrderItemId],
    ) -> StoreResult<Vec<TestResult>> {
        if order_item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; order_item_ids.len()].join(", ");
        let sql = format!(
            "SELECT r.result_id, r.order_id, r.order_item_id, r.label, r.value
             FROM test_results r
             INNER JOIN test_orders o ON o.order_item_id = r.order_item_id
             WHERE o.patient_id = ? AND r.order_item_id IN ({placeholders})
             ORDER BY r.last_modified DESC, r.row_id DESC"
        );
        let values = std::iter::once(Value::Integer(patient_id.get()))
            .chain(order_item_ids.iter().map(|id| Value::Integer(id.get())));

        let conn = self.reader();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(TestResult {
                result_id: ResultId::new(row.get(0)?),
                order_id: OrderId::new(row.get(1)?),
                order_item_id: OrderItemId::new(row.get(2)?),
                label: row.get(3)?,
                value: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn find_test_sample(
        &self,
        order_item_id: OrderItemId,
        order_id: OrderId,
    ) -> StoreResult<Option<TestSample>> {
        let conn = self.reader();
        let sample = conn
            .query_row(
                "SELECT sample_id, collected_at FROM test_samples
                 WHERE order_item_id = ?1 AND order_id = ?2
                 ORDER BY collected_at IS NULL, collected_at
                 LIMIT 1",
                params![order_item_id.get(), order_id.get()],
                |row| {
                    Ok(TestSample {
                        sample_id: row.get::<_, Option<i64>>(0)?.map(SampleId::new),
                        collected_at: row.get(1)?,
                        order_id,
                        order_item_id,
                    })
                },
            )
            .optional()?;
        Ok(sample)
    }
}

impl PregnancySource for SourceOfRecordDb {
    fn find_pregnancies_by_year(&self, year: i32) -> StoreResult<Vec<Pregnancy>> {
        let (start, end) = crate::registry::year_bounds(year)
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT pregnancy_id, patient_id, lmp, edd, end_time FROM pregnancies
             WHERE lmp >= ?1 AND lmp < ?2
             ORDER BY lmp, pregnancy_id",
        )?;
        let rows = stmt.query_map(params![start, end], pregnancy_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl PatientSource for SourceOfRecordDb {
    fn find_patients_by_year(&self, year: i32) -> StoreResult<Vec<Patient>> {
        let (start, end) = crate::registry::year_bounds(year)
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT p.patient_id, p.first_name, p.last_name, p.birth_date FROM patients p
             WHERE EXISTS (
                 SELECT 1 FROM pregnancies pr
                 WHERE pr.patient_id = p.patient_id AND pr.lmp >= ?1 AND pr.lmp < ?2
             )
             ORDER BY p.patient_id",
        )?;
        let rows = stmt.query_map(params![start, end], patient_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl BirthDates for SourceOfRecordDb {
    fn find_birth_date(&self, patient_id: PatientId) -> StoreResult<Option<NaiveDate>> {
        let conn = self.reader();
        let birth_date = conn
            .query_row(
                "SELECT birth_date FROM patients WHERE patient_id = ?1",
                params![patient_id.get()],
                |row| row.get::<_, Option<NaiveDate>>(0),
            )
            .optional()?;
        Ok(birth_date.flatten())
    }
}
