// =============================================================================
// Shared types used across the Haetae trading engine
// =============================================================================

use chrono::{DateTime, NaiveTime};
use chrono_tz::Asia::Seoul;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in KST. All market logic runs on the Seoul clock.
pub fn now_kst() -> DateTime<Tz> {
    chrono::Utc::now().with_timezone(&Seoul)
}

/// Per-symbol trading lifecycle. Transitions are strictly forward except for
/// the cancel/timeout recovery edges handled by the recovery manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingStatus {
    Watching,
    BuyReady,
    BuyOrdered,
    PartialBought,
    Bought,
    SellReady,
    SellOrdered,
    PartialSold,
    Sold,
}

impl TradingStatus {
    /// Whether `next` is a legal transition from `self`.
    ///
    /// Allowed graph:
    ///   WATCHING → BUY_ORDERED → PARTIAL_BOUGHT → BOUGHT → SELL_ORDERED
    ///                        ↘───── BOUGHT ─────↗            ↓
    ///                                             PARTIAL_SOLD → SOLD
    ///   BUY_ORDERED/PARTIAL_BOUGHT → WATCHING   (cancel / timeout recovery)
    ///   SELL_ORDERED/PARTIAL_SOLD  → BOUGHT     (cancel / timeout recovery)
    pub fn can_transition_to(self, next: TradingStatus) -> bool {
        use TradingStatus::*;
        matches!(
            (self, next),
            (Watching, BuyReady)
                | (Watching, BuyOrdered)
                | (BuyReady, BuyOrdered)
                | (BuyOrdered, PartialBought)
                | (BuyOrdered, Bought)
                | (PartialBought, PartialBought)
                | (PartialBought, Bought)
                | (Bought, SellReady)
                | (Bought, SellOrdered)
                | (SellReady, SellOrdered)
                | (SellOrdered, PartialSold)
                | (SellOrdered, Sold)
                | (PartialSold, PartialSold)
                | (PartialSold, Sold)
                // cancel / timeout recovery
                | (BuyOrdered, Watching)
                | (PartialBought, Watching)
                | (SellOrdered, Bought)
                | (PartialSold, Bought)
        )
    }

    /// True while a buy order is open (at most one per symbol).
    pub fn has_open_buy_order(self) -> bool {
        matches!(self, TradingStatus::BuyOrdered | TradingStatus::PartialBought)
    }

    /// True while a sell order is open (at most one per symbol).
    pub fn has_open_sell_order(self) -> bool {
        matches!(self, TradingStatus::SellOrdered | TradingStatus::PartialSold)
    }
}

impl std::fmt::Display for TradingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Watching => "WATCHING",
            Self::BuyReady => "BUY_READY",
            Self::BuyOrdered => "BUY_ORDERED",
            Self::PartialBought => "PARTIAL_BOUGHT",
            Self::Bought => "BOUGHT",
            Self::SellReady => "SELL_READY",
            Self::SellOrdered => "SELL_ORDERED",
            Self::PartialSold => "PARTIAL_SOLD",
            Self::Sold => "SOLD",
        };
        write!(f, "{s}")
    }
}

/// Net direction of recent contract flow for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPressure {
    Buy,
    Sell,
    Neutral,
}

impl Default for MarketPressure {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for MarketPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Intraday phase derived from the KST wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPhase {
    Opening,
    Active,
    Lunch,
    PreClose,
    Closing,
    Closed,
}

impl MarketPhase {
    /// Phase for a time inside the regular session. The caller decides
    /// whether the market is open at all (weekends, pre-open) and maps those
    /// cases to `Closed`.
    pub fn from_session_time(t: NaiveTime) -> MarketPhase {
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        if t <= at(9, 30) {
            MarketPhase::Opening
        } else if t <= at(12, 0) {
            MarketPhase::Active
        } else if t <= at(13, 0) {
            MarketPhase::Lunch
        } else if t <= at(14, 50) {
            MarketPhase::Active
        } else if t <= at(15, 0) {
            MarketPhase::PreClose
        } else {
            MarketPhase::Closing
        }
    }
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Lunch => "lunch",
            Self::PreClose => "pre_close",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Buy or sell leg of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        use TradingStatus::*;
        assert!(Watching.can_transition_to(BuyOrdered));
        assert!(BuyOrdered.can_transition_to(PartialBought));
        assert!(BuyOrdered.can_transition_to(Bought));
        assert!(PartialBought.can_transition_to(Bought));
        assert!(Bought.can_transition_to(SellOrdered));
        assert!(SellOrdered.can_transition_to(PartialSold));
        assert!(PartialSold.can_transition_to(Sold));
    }

    #[test]
    fn no_direct_watching_to_bought() {
        assert!(!TradingStatus::Watching.can_transition_to(TradingStatus::Bought));
        assert!(!TradingStatus::Watching.can_transition_to(TradingStatus::Sold));
        assert!(!TradingStatus::Sold.can_transition_to(TradingStatus::Watching));
    }

    #[test]
    fn recovery_transitions_allowed() {
        use TradingStatus::*;
        assert!(BuyOrdered.can_transition_to(Watching));
        assert!(PartialBought.can_transition_to(Watching));
        assert!(SellOrdered.can_transition_to(Bought));
        assert!(PartialSold.can_transition_to(Bought));
    }

    #[test]
    fn session_phase_boundaries() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(MarketPhase::from_session_time(t(9, 10)), MarketPhase::Opening);
        assert_eq!(MarketPhase::from_session_time(t(9, 30)), MarketPhase::Opening);
        assert_eq!(MarketPhase::from_session_time(t(10, 0)), MarketPhase::Active);
        assert_eq!(MarketPhase::from_session_time(t(12, 30)), MarketPhase::Lunch);
        assert_eq!(MarketPhase::from_session_time(t(13, 30)), MarketPhase::Active);
        assert_eq!(MarketPhase::from_session_time(t(14, 55)), MarketPhase::PreClose);
        assert_eq!(MarketPhase::from_session_time(t(15, 10)), MarketPhase::Closing);
    }

    #[test]
    fn open_order_flags() {
        assert!(TradingStatus::BuyOrdered.has_open_buy_order());
        assert!(TradingStatus::PartialBought.has_open_buy_order());
        assert!(!TradingStatus::Bought.has_open_buy_order());
        assert!(TradingStatus::SellOrdered.has_open_sell_order());
        assert!(TradingStatus::PartialSold.has_open_sell_order());
    }
}
