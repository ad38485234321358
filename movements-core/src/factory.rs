//! Stamping of validated movements
//!
//! The factory assigns the id, the human-facing reference, the display
//! date and time, and the `correct` flag. It reads the clock and a random
//! source and nothing else; it never touches the store.

use crate::types::{CustomerId, Movement, NormalizedMovement};
use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use uuid::Uuid;

const DATE_FORMAT: &str = "%d-%m-%Y";
const TIME_FORMAT: &str = "%H:%M:%S";
const REFERENCE_SUFFIX_BOUND: u32 = 999_999;

/// Stamps normalized movements into ledger records
#[derive(Debug, Clone)]
pub struct MovementFactory {
    /// Fixed display timezone
    offset: FixedOffset,
}

impl Default for MovementFactory {
    fn default() -> Self {
        Self::new(-5 * 3600).expect("UTC-05:00 is a valid offset")
    }
}

impl MovementFactory {
    /// Create a factory stamping in the given offset (seconds east of UTC).
    /// Returns `None` if the offset is out of range.
    pub fn new(display_utc_offset_secs: i32) -> Option<Self> {
        FixedOffset::east_opt(display_utc_offset_secs).map(|offset| Self { offset })
    }

    /// Stamp with the current clock and thread-local randomness
    pub fn stamp(&self, normalized: NormalizedMovement) -> Movement {
        self.stamp_at(normalized, Utc::now(), &mut rand::thread_rng())
    }

    /// Stamp with an explicit clock reading and random source
    pub fn stamp_at<R: Rng + ?Sized>(
        &self,
        normalized: NormalizedMovement,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Movement {
        let local = now.with_timezone(&self.offset);
        let reference = reference_for(&normalized.customer, rng);

        Movement {
            id: Uuid::now_v7(),
            reference,
            customer: normalized.customer,
            account: normalized.account,
            transfer_customer: normalized.transfer_customer,
            transfer_account: normalized.transfer_account,
            concept: normalized.concept,
            movement_type: normalized.movement_type,
            amount: normalized.amount,
            date: local.format(DATE_FORMAT).to_string(),
            time: local.format(TIME_FORMAT).to_string(),
            observations: normalized.observations,
            correct: true,
            transfer_id: None,
        }
    }

    /// Draw a fresh reference after a collision
    pub fn restamp_reference(&self, movement: &mut Movement) {
        movement.reference = reference_for(&movement.customer, &mut rand::thread_rng());
    }
}

fn reference_for<R: Rng + ?Sized>(customer: &CustomerId, rng: &mut R) -> String {
    let suffix = rng.gen_range(0..REFERENCE_SUFFIX_BOUND);
    format!("{}-{:06}", customer, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Concept, MovementType};
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal::Decimal;

    fn deposit() -> NormalizedMovement {
        NormalizedMovement {
            customer: CustomerId::new("78345212"),
            account: AccountId::new("78345212-653"),
            transfer_customer: None,
            transfer_account: None,
            concept: Concept::Deposit,
            movement_type: MovementType::Payment,
            amount: Decimal::new(2000, 2),
            observations: "Deposit of 20.00".to_string(),
        }
    }

    #[test]
    fn test_stamp_fields() {
        let factory = MovementFactory::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 15).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let movement = factory.stamp_at(deposit(), now, &mut rng);

        // 02:30 UTC is the previous evening in Bogota
        assert_eq!(movement.date, "29-02-2024");
        assert_eq!(movement.time, "21:30:15");
        assert!(movement.correct);
        assert_eq!(movement.amount, Decimal::new(2000, 2));
        assert_eq!(movement.transfer_id, None);
    }

    #[test]
    fn test_reference_shape() {
        let factory = MovementFactory::default();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let movement = factory.stamp_at(deposit(), Utc::now(), &mut rng);
            let (prefix, suffix) = movement.reference.rsplit_once('-').unwrap();
            assert_eq!(prefix, "78345212");
            assert_eq!(suffix.len(), 6);
            assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_distinct_ids() {
        let factory = MovementFactory::default();
        let a = factory.stamp(deposit());
        let b = factory.stamp(deposit());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(MovementFactory::new(90_000).is_none());
        assert!(MovementFactory::new(0).is_some());
    }
}
