//! Enrichment lifecycle state machine.
//!
//! Every write of a dataset's `status` goes through
//! [`EnrichmentStatus::apply`], which enforces the transition table:
//!
//! ```text
//! MINIMAL ─┬─ success ─────────▶ ENRICHED
//!          └─ success(partial) ▶ PENDING ── success ──▶ ENRICHED
//!
//! MINIMAL | ENRICHING | PENDING ── not found ─────────▶ FAILED
//!                               ── attempts >= 3 ────▶ FAILED
//!                               ── attempts <  3 ────▶ (unchanged)
//! ```
//!
//! `ENRICHED` and `FAILED` are absorbing: any event applied to them is
//! rejected with [`InvalidTransition`]. A rate-limit signal is not an
//! event at all; it never reaches the state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of failed attempts after which a dataset is abandoned.
pub const MAX_ATTEMPTS: u32 = 3;

/// Where a dataset is in the enrichment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStatus {
    /// Known only by its identifying fields.
    Minimal,
    /// An enrichment call is in flight.
    Enriching,
    /// Partially enriched, waiting for another pass.
    Pending,
    /// Fully enriched; eligible for embedding.
    Enriched,
    /// Terminal. The dataset is inactive and excluded from all phases.
    Failed,
}

/// Something that happened to a dataset during an enrichment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentEvent {
    /// The source returned usable content. `partial` is set when the
    /// source signalled that some fields are still missing.
    Succeeded { partial: bool },
    /// The source reported that the dataset does not exist.
    NotFound,
    /// A retryable failure. `attempts` is the attempt count *after*
    /// this failure was recorded.
    AttemptFailed { attempts: u32 },
}

/// Returned when an event is applied to a status that cannot accept it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid enrichment transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: EnrichmentStatus,
    pub event: EnrichmentEvent,
}

impl EnrichmentStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [EnrichmentStatus; 5] = [
        EnrichmentStatus::Minimal,
        EnrichmentStatus::Enriching,
        EnrichmentStatus::Pending,
        EnrichmentStatus::Enriched,
        EnrichmentStatus::Failed,
    ];

    /// Statuses selected by the enrichment phase.
    pub const ENRICHABLE: [EnrichmentStatus; 2] =
        [EnrichmentStatus::Minimal, EnrichmentStatus::Pending];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrichmentStatus::Minimal => "MINIMAL",
            EnrichmentStatus::Enriching => "ENRICHING",
            EnrichmentStatus::Pending => "PENDING",
            EnrichmentStatus::Enriched => "ENRICHED",
            EnrichmentStatus::Failed => "FAILED",
        }
    }

    /// `true` for statuses no event can leave.
    pub fn is_absorbing(self) -> bool {
        matches!(self, EnrichmentStatus::Enriched | EnrichmentStatus::Failed)
    }

    /// Compute the next status for `event`.
    ///
    /// Callers must also deactivate the dataset whenever the result is
    /// [`EnrichmentStatus::Failed`]; [`crate::models::Dataset::apply`]
    /// does both together.
    pub fn apply(self, event: EnrichmentEvent) -> Result<EnrichmentStatus, InvalidTransition> {
        if self.is_absorbing() {
            return Err(InvalidTransition { from: self, event });
        }

        let next = match event {
            EnrichmentEvent::Succeeded { partial: true } => EnrichmentStatus::Pending,
            EnrichmentEvent::Succeeded { partial: false } => EnrichmentStatus::Enriched,
            EnrichmentEvent::NotFound => EnrichmentStatus::Failed,
            EnrichmentEvent::AttemptFailed { attempts } if attempts >= MAX_ATTEMPTS => {
                EnrichmentStatus::Failed
            }
            EnrichmentEvent::AttemptFailed { .. } => self,
        };

        Ok(next)
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrichmentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(EnrichmentStatus::Minimal),
            "ENRICHING" => Ok(EnrichmentStatus::Enriching),
            "PENDING" => Ok(EnrichmentStatus::Pending),
            "ENRICHED" => Ok(EnrichmentStatus::Enriched),
            "FAILED" => Ok(EnrichmentStatus::Failed),
            other => anyhow::bail!("unknown enrichment status: '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use EnrichmentEvent::*;
    use EnrichmentStatus::*;

    #[test]
    fn test_minimal_success_enriches() {
        assert_eq!(Minimal.apply(Succeeded { partial: false }), Ok(Enriched));
    }

    #[test]
    fn test_partial_success_goes_pending() {
        assert_eq!(Minimal.apply(Succeeded { partial: true }), Ok(Pending));
        assert_eq!(Pending.apply(Succeeded { partial: true }), Ok(Pending));
        assert_eq!(Pending.apply(Succeeded { partial: false }), Ok(Enriched));
    }

    #[test]
    fn test_not_found_is_terminal_from_any_open_state() {
        for from in [Minimal, Enriching, Pending] {
            assert_eq!(from.apply(NotFound), Ok(Failed));
        }
    }

    #[test]
    fn test_attempts_below_ceiling_keep_status() {
        assert_eq!(Minimal.apply(AttemptFailed { attempts: 1 }), Ok(Minimal));
        assert_eq!(Pending.apply(AttemptFailed { attempts: 2 }), Ok(Pending));
    }

    #[test]
    fn test_attempt_ceiling_fails() {
        assert_eq!(Minimal.apply(AttemptFailed { attempts: 3 }), Ok(Failed));
        assert_eq!(Pending.apply(AttemptFailed { attempts: 7 }), Ok(Failed));
    }

    #[test]
    fn test_absorbing_states_reject_events() {
        for from in [Enriched, Failed] {
            for event in [Succeeded { partial: false }, NotFound, AttemptFailed { attempts: 1 }] {
                let err = from.apply(event).unwrap_err();
                assert_eq!(err.from, from);
            }
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in EnrichmentStatus::ALL {
            assert_eq!(s.as_str().parse::<EnrichmentStatus>().unwrap(), s);
        }
        assert!("DONE".parse::<EnrichmentStatus>().is_err());
    }
}
