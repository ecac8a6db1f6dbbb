//! Laboratory facts and the reconciled lab timeline.
//!
//! The clinical source of record cannot express "orders with their latest results and the
//! date the specimen was drawn" as a single query, so the facts are fetched as three
//! independent streams and joined here:
//!
//! - [`TestOrder`]: one ordered test within a visit (keyed by order-item)
//! - [`TestResult`]: an observed outcome for an order-item (keyed by result id)
//! - [`TestSample`]: a specimen tied to an order-item
//!
//! Any backing store that can answer the three [`LabFacts`] lookups can drive the
//! [`LabTimeline`] reconstructor.

use crate::error::StoreResult;
use crate::policy::DateWindow;
use chrono::NaiveDateTime;
use emtct_types::{OrderId, OrderItemId, PatientId, ResultId, SampleId};
use serde::{Deserialize, Serialize};

pub mod timeline;

pub use timeline::LabTimeline;

/// A single ordered laboratory test. Read-only fact from the source of record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOrder {
    pub patient_id: PatientId,
    pub visit_id: i64,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub test_name: String,
    /// When the lab received the order. Lab queries are windowed on this time.
    pub received_at: NaiveDateTime,
    pub released_at: Option<NaiveDateTime>,
}

/// An observed outcome for an order-item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub result_id: ResultId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub label: String,
    pub value: String,
}

/// A physical specimen tied to an order-item.
///
/// `sample_id` and `collected_at` are both empty when the specimen type has been requested
/// but nothing has been drawn yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSample {
    pub sample_id: Option<SampleId>,
    pub collected_at: Option<NaiveDateTime>,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
}

/// One reconciled lab result: an order, one of its results, and its earliest sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabResult {
    pub result_id: ResultId,
    pub patient_id: PatientId,
    /// `"<test name> - <result label>"`
    pub test_name: String,
    pub result: String,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub order_received_at: NaiveDateTime,
    pub released_at: Option<NaiveDateTime>,
    pub sample_collected_at: Option<NaiveDateTime>,
}

/// Read-only lookups a backing store must answer to drive lab reconstruction.
///
/// Implementations must be safe to call from several threads at once: per-order sample
/// lookups are fanned out across a bounded worker pool. The fan-out only pays off when the
/// provider can serve lookups concurrently (see `SourceOfRecordDb::open_with_readers`).
pub trait LabFacts: Send + Sync {
    /// Orders for the patient whose received time falls in `window`.
    fn find_test_orders(
        &self,
        patient_id: PatientId,
        window: &DateWindow,
    ) -> StoreResult<Vec<TestOrder>>;

    /// Results for the patient restricted to `order_item_ids`, most recently modified first.
    fn find_test_results(
        &self,
        patient_id: PatientId,
        order_item_ids: &[OrderItemId],
    ) -> StoreResult<Vec<TestResult>>;

    /// The earliest collected sample for the order, if any specimen exists.
    fn find_test_sample(
        &self,
        order_item_id: OrderItemId,
        order_id: OrderId,
    ) -> StoreResult<Option<TestSample>>;
}
