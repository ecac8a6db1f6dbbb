//! Three-phase lab timeline reconstruction.
//!
//! 1. fetch the patient's orders received inside the window
//! 2. fetch results for the selected order-items
//! 3. fetch the earliest sample per order (fanned out over a bounded pool)
//!
//! The fetched facts are then merged into [`LabResult`]s and deduplicated by result id,
//! keeping the first occurrence. Any failed lookup aborts the whole call.

use super::{LabFacts, LabResult, TestOrder, TestResult, TestSample};
use crate::context::CallContext;
use crate::error::{EmtctError, EmtctResult, Phase};
use crate::policy::DateWindow;
use chrono::{NaiveDate, NaiveDateTime};
use emtct_types::{OrderItemId, PatientId, ResultId};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Reconstructs reconciled lab results from any [`LabFacts`] provider.
pub struct LabTimeline<F> {
    facts: Arc<F>,
    pool: Arc<rayon::ThreadPool>,
}

impl<F> Clone for LabTimeline<F> {
    fn clone(&self) -> Self {
        Self {
            facts: Arc::clone(&self.facts),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<F: LabFacts> LabTimeline<F> {
    /// Creates a reconstructor whose sample lookups run on at most `sample_workers` threads.
    pub fn new(facts: Arc<F>, sample_workers: usize) -> EmtctResult<Self> {
        if sample_workers == 0 {
            return Err(EmtctError::InvalidInput(
                "sample_workers must be at least 1".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(sample_workers)
            .thread_name(|i| format!("emtct-samples-{i}"))
            .build()
            .map_err(|e| EmtctError::Config(format!("failed to build sample pool: {e}")))?;

        Ok(Self {
            facts,
            pool: Arc::new(pool),
        })
    }

    pub fn facts(&self) -> &F {
        &self.facts
    }

    /// Lab results for a pregnancy anchored on its LMP.
    ///
    /// Returns an empty list without touching the store when `lmp` is `None`.
    pub fn reconstruct(
        &self,
        ctx: &CallContext,
        patient_id: PatientId,
        lmp: Option<NaiveDate>,
    ) -> EmtctResult<Vec<LabResult>> {
        let Some(lmp) = lmp else {
            tracing::debug!(%patient_id, "no anchor date, skipping lab reconstruction");
            return Ok(Vec::new());
        };
        self.run(ctx, patient_id, DateWindow::pregnancy(lmp), |_| true)
    }

    /// Screening history for one test category, anchored on the infant's birth date.
    ///
    /// Orders are windowed to the first two years of life and only order-items whose test
    /// name matches `category` (case-insensitive) have their results fetched.
    pub fn reconstruct_screening_history(
        &self,
        ctx: &CallContext,
        patient_id: PatientId,
        birth_date: Option<NaiveDate>,
        category: &str,
    ) -> EmtctResult<Vec<LabResult>> {
        let Some(birth_date) = birth_date else {
            tracing::debug!(%patient_id, "no birth date, skipping screening history");
            return Ok(Vec::new());
        };
        let category = category.trim();
        self.run(
            ctx,
            patient_id,
            DateWindow::infant_screening(birth_date),
            |order| order.test_name.trim().eq_ignore_ascii_case(category),
        )
    }

    fn run(
        &self,
        ctx: &CallContext,
        patient_id: PatientId,
        window: DateWindow,
        select: impl Fn(&TestOrder) -> bool,
    ) -> EmtctResult<Vec<LabResult>> {
        let subject = format!("patient {patient_id}");

        ctx.check(Phase::TestOrders)?;
        let orders = self
            .facts
            .find_test_orders(patient_id, &window)
            .map_err(|e| EmtctError::lookup(Phase::TestOrders, &subject, e))?;
        let orders: Vec<TestOrder> = orders.into_iter().filter(|o| select(o)).collect();
        tracing::debug!(%patient_id, orders = orders.len(), "fetched test orders");
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let mut item_ids: Vec<OrderItemId> = orders.iter().map(|o| o.order_item_id).collect();
        item_ids.sort_unstable();
        item_ids.dedup();

        ctx.check(Phase::TestResults)?;
        let results = self
            .facts
            .find_test_results(patient_id, &item_ids)
            .map_err(|e| EmtctError::lookup(Phase::TestResults, &subject, e))?;
        tracing::debug!(%patient_id, results = results.len(), "fetched test results");

        let samples = self.fetch_samples(ctx, &subject, &orders)?;
        tracing::debug!(%patient_id, samples = samples.len(), "fetched test samples");

        Ok(merge(patient_id, &orders, results, &samples))
    }

    fn fetch_samples(
        &self,
        ctx: &CallContext,
        subject: &str,
        orders: &[TestOrder],
    ) -> EmtctResult<Vec<TestSample>> {
        let facts = &*self.facts;
        let found = self.pool.install(|| {
            orders
                .par_iter()
                .map(|order| {
                    ctx.check(Phase::TestSamples)?;
                    facts
                        .find_test_sample(order.order_item_id, order.order_id)
                        .map_err(|e| EmtctError::lookup(Phase::TestSamples, subject, e))
                })
                .collect::<EmtctResult<Vec<Option<TestSample>>>>()
        })?;

        Ok(found.into_iter().flatten().collect())
    }
}

/// Joins orders, results and samples into lab results, unique by result id.
///
/// Output order follows `results`. A result whose order-item is not among `orders` is
/// dropped. When several samples exist for an order-item, the earliest collected one wins;
/// a collected sample always beats an uncollected specimen.
pub(crate) fn merge(
    patient_id: PatientId,
    orders: &[TestOrder],
    results: Vec<TestResult>,
    samples: &[TestSample],
) -> Vec<LabResult> {
    let orders_by_item: HashMap<OrderItemId, &TestOrder> =
        orders.iter().map(|o| (o.order_item_id, o)).collect();

    let mut collected: HashMap<OrderItemId, Option<NaiveDateTime>> = HashMap::new();
    for sample in samples {
        let slot = collected.entry(sample.order_item_id).or_insert(None);
        *slot = earliest(*slot, sample.collected_at);
    }

    let mut seen: HashSet<ResultId> = HashSet::with_capacity(results.len());
    let mut merged = Vec::with_capacity(results.len());
    for result in results {
        let Some(order) = orders_by_item.get(&result.order_item_id) else {
            tracing::warn!(
                %patient_id,
                result_id = %result.result_id,
                order_item_id = %result.order_item_id,
                "test result has no matching order, skipping"
            );
            continue;
        };
        if !seen.insert(result.result_id) {
            continue;
        }
        merged.push(LabResult {
            result_id: result.result_id,
            patient_id,
            test_name: format!("{} - {}", order.test_name, result.label),
            result: result.value,
            order_id: result.order_id,
            order_item_id: result.order_item_id,
            order_received_at: order.received_at,
            released_at: order.released_at,
            sample_collected_at: collected.get(&result.order_item_id).copied().flatten(),
        });
    }
    merged
}

fn earliest(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
