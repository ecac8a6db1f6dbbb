//! # EMTCT Core
//!
//! Clinical record reconciliation for the elimination of mother-to-child transmission of
//! HIV and syphilis.
//!
//! This crate contains:
//! - lab timeline reconstruction from order, result and sample facts ([`labs`])
//! - the infant screening policy: timeliness and due dates ([`policy`])
//! - pregnancy and patient registry synchronisation against the source of record ([`registry`])
//! - HIV and syphilis screening records ([`screening`])
//! - the SQLite stores behind the capability traits ([`store`])
//!
//! **No API concerns**: HTTP handlers and the command line belong in `api-rest` and `cli`.

pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod labs;
pub mod policy;
pub mod registry;
pub mod screening;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CoreConfig;
pub use context::CallContext;
pub use engine::Engine;
pub use error::{EmtctError, EmtctResult, Phase, StoreError, StoreResult};
pub use labs::{LabFacts, LabResult, LabTimeline, TestOrder, TestResult, TestSample};
pub use policy::{due_date, is_timely, TestCategory};
pub use registry::{
    Patient, PatientRegistry, PatientSource, Pregnancy, PregnancyRegistry, PregnancySource,
    RegistrySync,
};
pub use screening::{
    HivScreening, HivScreeningDetails, MissingPcr, ScreeningService, SyphilisScreening,
    Timeliness,
};
pub use store::{MirrorDb, SourceOfRecordDb};
