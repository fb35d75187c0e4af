//! Random charge/payment pair generation.
//!
//! Cardinalities are kept small (10 departments, 100 accounts, 10 000
//! patients) so the map/reduce indexes have real grouping work to do.

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::types::{Charge, Payment};

const PATIENT_CARDINALITY: u32 = 10_000;
const DEPARTMENT_CARDINALITY: u32 = 10;
const ACCOUNT_CARDINALITY: u32 = 100;
const HOST_SYSTEM_CARDINALITY: u32 = 10;

/// Exclusive upper bound for generated magnitudes.
const MAX_AMOUNT: u32 = 10_000;

/// Payments are posted somewhere in the trailing year.
const POSTED_WINDOW_DAYS: i64 = 365;

/// ACH receipt lags the posted date by 0..5 days.
const ACH_LAG_DAYS: i64 = 5;

/// One payment in four carries an amount unrelated to its charge.
const MISMATCH_ODDS: u32 = 4;

/// Generates linked charge/payment pairs from a single random source.
pub struct RecordFactory {
    rng: StdRng,
}

impl RecordFactory {
    /// Factory seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic factory, for reproducible runs and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a charge and the payment that settles it.
    pub fn generate_charge_payment(&mut self) -> (Charge, Payment) {
        let charge = self.generate_charge();
        let payment = self.generate_payment_for(&charge);
        (charge, payment)
    }

    fn generate_charge(&mut self) -> Charge {
        Charge {
            id: format!("Charge-{}", self.next_uuid()),
            patient_id: format!("Patient{}", self.rng.gen_range(0..PATIENT_CARDINALITY)),
            gl_department: format!("Dept{}", self.rng.gen_range(0..DEPARTMENT_CARDINALITY)),
            gl_account: format!("Acct{}", self.rng.gen_range(0..ACCOUNT_CARDINALITY)),
            posted_date: None,
            discharge_date: None,
            amount: f64::from(self.rng.gen_range(0..MAX_AMOUNT)),
            host_system: format!("System{}", self.rng.gen_range(0..HOST_SYSTEM_CARDINALITY)),
            tags: Vec::new(),
        }
    }

    fn generate_payment_for(&mut self, charge: &Charge) -> Payment {
        let posted = Utc::now() - Duration::days(self.rng.gen_range(0..POSTED_WINDOW_DAYS));
        let ach_received = posted + Duration::days(self.rng.gen_range(0..ACH_LAG_DAYS));

        // Payments are always strictly negative. A zero-amount charge would
        // otherwise produce a zero payment, so magnitudes start at 1.
        let amount = if self.rng.gen_range(0..MISMATCH_ODDS) == 1 {
            -f64::from(self.rng.gen_range(1..=MAX_AMOUNT))
        } else if charge.amount > 0.0 {
            -charge.amount
        } else {
            -f64::from(self.rng.gen_range(1..=MAX_AMOUNT))
        };

        Payment {
            id: format!("Payment-{}", self.next_uuid()),
            patient_id: charge.patient_id.clone(),
            gl_account: charge.gl_account.clone(),
            gl_department: charge.gl_department.clone(),
            posted_date: Some(posted),
            discharge_date: None,
            amount,
            ach: None,
            ach_received_date: Some(ach_received),
            tags: Vec::new(),
        }
    }

    /// UUIDs drawn from the factory's own generator so seeded runs repeat.
    fn next_uuid(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.gen())
            .into_uuid()
            .simple()
            .to_string()
    }
}
