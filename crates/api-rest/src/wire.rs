//! JSON request and response bodies.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use emtct_core::{
    HivScreening, HivScreeningDetails, LabResult, MissingPcr, Patient, Pregnancy,
    SyphilisScreening, Timeliness,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LabResultRes {
    pub id: i64,
    pub patient_id: i64,
    pub test_name: String,
    pub result: String,
    pub order_id: i64,
    pub order_item_id: i64,
    pub order_received_at: NaiveDateTime,
    pub released_at: Option<NaiveDateTime>,
    pub sample_collected_at: Option<NaiveDateTime>,
}

impl From<LabResult> for LabResultRes {
    fn from(lab: LabResult) -> Self {
        Self {
            id: lab.result_id.get(),
            patient_id: lab.patient_id.get(),
            test_name: lab.test_name,
            result: lab.result,
            order_id: lab.order_id.get(),
            order_item_id: lab.order_item_id.get(),
            order_received_at: lab.order_received_at,
            released_at: lab.released_at,
            sample_collected_at: lab.sample_collected_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LabsRes {
    pub labs: Vec<LabResultRes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimelinessRes {
    Timely,
    NotTimely,
    NotAvailable,
}

impl From<Timeliness> for TimelinessRes {
    fn from(t: Timeliness) -> Self {
        match t {
            Timeliness::Timely => Self::Timely,
            Timeliness::NotTimely => Self::NotTimely,
            Timeliness::NotAvailable => Self::NotAvailable,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyphilisScreeningRes {
    pub id: i64,
    pub patient_id: i64,
    pub test_name: String,
    pub screening_date: NaiveDate,
    pub date_sample_taken: Option<NaiveDate>,
    pub date_result_received: Option<NaiveDate>,
    pub result: String,
    pub timely: TimelinessRes,
}

impl From<SyphilisScreening> for SyphilisScreeningRes {
    fn from(s: SyphilisScreening) -> Self {
        Self {
            id: s.id.get(),
            patient_id: s.patient_id.get(),
            test_name: s.test_name,
            screening_date: s.screening_date,
            date_sample_taken: s.date_sample_taken,
            date_result_received: s.date_result_received,
            result: s.result,
            timely: s.timely.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyphilisScreeningsRes {
    pub screenings: Vec<SyphilisScreeningRes>,
}

/// Editable fields of an HIV screening.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HivScreeningFields {
    /// Category label such as `PCR 1`, `PCR 2`, `PCR 3` or `ELISA`.
    pub test_name: String,
    pub screening_date: NaiveDate,
    #[serde(default)]
    pub date_sample_taken: Option<NaiveDate>,
    #[serde(default)]
    pub date_sample_received_at_hq: Option<NaiveDate>,
    #[serde(default)]
    pub date_sample_shipped: Option<NaiveDate>,
    #[serde(default)]
    pub date_result_received: Option<NaiveDate>,
    #[serde(default)]
    pub date_result_shared: Option<NaiveDate>,
    #[serde(default)]
    pub sample_code: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub result: String,
}

impl From<HivScreeningFields> for HivScreeningDetails {
    fn from(f: HivScreeningFields) -> Self {
        Self {
            test_name: f.test_name,
            screening_date: f.screening_date,
            date_sample_taken: f.date_sample_taken,
            date_sample_received_at_hq: f.date_sample_received_at_hq,
            date_sample_shipped: f.date_sample_shipped,
            date_result_received: f.date_result_received,
            date_result_shared: f.date_result_shared,
            sample_code: f.sample_code,
            destination: f.destination,
            result: f.result,
        }
    }
}

impl From<HivScreeningDetails> for HivScreeningFields {
    fn from(d: HivScreeningDetails) -> Self {
        Self {
            test_name: d.test_name,
            screening_date: d.screening_date,
            date_sample_taken: d.date_sample_taken,
            date_sample_received_at_hq: d.date_sample_received_at_hq,
            date_sample_shipped: d.date_sample_shipped,
            date_result_received: d.date_result_received,
            date_result_shared: d.date_result_shared,
            sample_code: d.sample_code,
            destination: d.destination,
            result: d.result,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateHivScreeningReq {
    pub mother_id: i64,
    /// User recorded as the author of the screening.
    pub user: String,
    pub screening: HivScreeningFields,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AmendHivScreeningReq {
    pub user: String,
    pub screening: HivScreeningFields,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HivScreeningRes {
    pub id: String,
    pub patient_id: i64,
    pub mother_id: i64,
    pub screening: HivScreeningFields,
    pub due_date: NaiveDate,
    pub timely: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl From<HivScreening> for HivScreeningRes {
    fn from(s: HivScreening) -> Self {
        Self {
            id: s.id.to_string(),
            patient_id: s.patient_id.get(),
            mother_id: s.mother_id.get(),
            screening: s.details.into(),
            due_date: s.due_date,
            timely: s.timely,
            created_at: s.created_at,
            created_by: s.created_by,
            updated_at: s.updated_at,
            updated_by: s.updated_by,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HivScreeningsRes {
    pub screenings: Vec<HivScreeningRes>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncPregnanciesReq {
    pub year: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PregnancyRes {
    pub pregnancy_id: i64,
    pub patient_id: i64,
    pub lmp: NaiveDate,
    pub edd: Option<NaiveDate>,
    pub end_time: Option<NaiveDateTime>,
}

impl From<Pregnancy> for PregnancyRes {
    fn from(p: Pregnancy) -> Self {
        Self {
            pregnancy_id: p.pregnancy_id.get(),
            patient_id: p.patient_id.get(),
            lmp: p.lmp,
            edd: p.edd,
            end_time: p.end_time,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncPregnanciesRes {
    pub year: i32,
    pub inserted: Vec<PregnancyRes>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncPatientsReq {
    pub year: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub patient_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
}

impl From<Patient> for PatientRes {
    fn from(p: Patient) -> Self {
        Self {
            patient_id: p.patient_id.get(),
            first_name: p.first_name,
            last_name: p.last_name,
            birth_date: p.birth_date,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncPatientsRes {
    pub year: i32,
    pub total: usize,
    pub inserted: Vec<PatientRes>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MissingPcrsQuery {
    pub year: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MissingPcrRes {
    pub infant_id: i64,
    pub screenings: Vec<HivScreeningRes>,
}

impl From<MissingPcr> for MissingPcrRes {
    fn from(m: MissingPcr) -> Self {
        Self {
            infant_id: m.infant_id.get(),
            screenings: m.screenings.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MissingPcrsRes {
    pub year: i32,
    pub infants: Vec<MissingPcrRes>,
}
