use strum_macros::Display;

use crate::source::Observation;
use crate::storage::HistoryRecord;

/// Which change rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Reason {
    #[strum(to_string = "New check with a discount")]
    FirstTime,
    #[strum(to_string = "Price dropped")]
    PriceDrop,
    #[strum(to_string = "Discount increased")]
    DiscountIncrease,
    #[strum(to_string = "New discount")]
    NewDiscount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Set when a change rule matched, i.e. a notification is attempted.
    pub reason: Option<Reason>,
    /// Whether the notification actually goes out.
    pub deliver: bool,
}

impl Decision {
    pub const fn attempted(&self) -> bool {
        self.reason.is_some()
    }
}

/// First matching rule wins. Rules other than the first-time rule do not
/// look at the threshold; that is left to [`passes_gate`].
pub fn detect_change(
    observation: &Observation,
    prior: Option<&HistoryRecord>,
    threshold: u8,
) -> Option<Reason> {
    let discount = observation.discount_percent;

    let Some(prior) = prior else {
        return (discount >= threshold).then_some(Reason::FirstTime);
    };

    if observation.price < prior.last_price {
        Some(Reason::PriceDrop)
    } else if discount > prior.last_discount {
        Some(Reason::DiscountIncrease)
    } else if discount >= threshold && prior.last_discount == 0 {
        Some(Reason::NewDiscount)
    } else {
        None
    }
}

pub const fn passes_gate(observation: &Observation, threshold: u8) -> bool {
    observation.discount_percent >= threshold
}

pub fn decide(observation: &Observation, prior: Option<&HistoryRecord>, threshold: u8) -> Decision {
    let reason = detect_change(observation, prior, threshold);
    Decision {
        reason,
        deliver: reason.is_some() && passes_gate(observation, threshold),
    }
}
