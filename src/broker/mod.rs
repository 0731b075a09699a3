// =============================================================================
// Broker interface — the seam between the executor and the KIS REST client
// =============================================================================

pub mod client;

use anyhow::Result;

use crate::types::OrderSide;

/// Normalized order acknowledgment from the broker.
#[derive(Debug, Clone, Default)]
pub struct OrderAck {
    pub rt_cd: String,
    pub msg_cd: String,
    pub msg1: String,
    pub order_no: String,
    pub orgno: String,
    /// HHMMSS as echoed by the broker.
    pub order_time: String,
}

impl OrderAck {
    /// Acceptance policy: `rt_cd` of "0"/"00", an entirely empty rt_cd and
    /// msg_cd pair, or a present order number all count as accepted. The
    /// execution notice stream is the source of truth for fills.
    pub fn accepted(&self) -> bool {
        let rt = self.rt_cd.trim();
        let msg = self.msg_cd.trim();
        rt == "0" || rt == "00" || (rt.is_empty() && msg.is_empty()) || !self.order_no.trim().is_empty()
    }
}

/// Normalized cancel acknowledgment.
#[derive(Debug, Clone, Default)]
pub struct CancelAck {
    pub rt_cd: String,
    pub msg_cd: String,
    pub msg1: String,
}

impl CancelAck {
    pub fn accepted(&self) -> bool {
        self.rt_cd.trim() == "0"
    }
}

/// The order surface the executor depends on. The production implementation
/// is [`client::KisClient`]; tests substitute a scripted broker.
pub trait BrokerApi: Send + Sync {
    fn place_order(
        &self,
        side: OrderSide,
        code: &str,
        qty: u32,
        price: f64,
    ) -> impl std::future::Future<Output = Result<OrderAck>> + Send;

    fn cancel_order(
        &self,
        orgno: &str,
        order_no: &str,
    ) -> impl std::future::Future<Output = Result<CancelAck>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptance_policy() {
        let ok = OrderAck { rt_cd: "0".into(), ..OrderAck::default() };
        assert!(ok.accepted());
        let ok00 = OrderAck { rt_cd: "00".into(), ..OrderAck::default() };
        assert!(ok00.accepted());

        // Simulated/empty response with blank codes counts as accepted.
        let blank = OrderAck::default();
        assert!(blank.accepted());

        // Error code without an order number is rejected.
        let failed = OrderAck {
            rt_cd: "1".into(),
            msg_cd: "APBK0013".into(),
            msg1: "주문가능금액을 초과했습니다".into(),
            ..OrderAck::default()
        };
        assert!(!failed.accepted());

        // An order number rescues an otherwise odd response.
        let odd = OrderAck {
            rt_cd: "1".into(),
            order_no: "0000117057".into(),
            ..OrderAck::default()
        };
        assert!(odd.accepted());
    }

    #[test]
    fn cancel_ack_is_strict() {
        assert!(CancelAck { rt_cd: "0".into(), ..CancelAck::default() }.accepted());
        assert!(!CancelAck { rt_cd: "1".into(), ..CancelAck::default() }.accepted());
        assert!(!CancelAck::default().accepted());
    }
}
