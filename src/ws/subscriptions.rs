// =============================================================================
// Subscription manager — capacity-bounded symbol set + per-TR callbacks
// =============================================================================
//
// One symbol costs two connection slots (contract + quote). The account
// notice stream occupies the system slots. Read operations copy the set out
// so no caller iterates while holding the lock.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::parser::{ContractTick, ExecutionNotice, OrderbookTick};

pub const TR_CONTRACT: &str = "H0STCNT0";
pub const TR_ORDERBOOK: &str = "H0STASP0";
pub const TR_NOTICE: &str = "H0STCNI0";
pub const TR_NOTICE_DEMO: &str = "H0STCNI9";

/// Parsed realtime event dispatched to registered callbacks.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Contract(ContractTick),
    Orderbook(OrderbookTick),
    Notice(ExecutionNotice),
}

pub type EventCallback = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

struct Inner {
    subscribed: HashSet<String>,
    callbacks: HashMap<String, Vec<EventCallback>>,
}

pub struct SubscriptionManager {
    inner: Mutex<Inner>,
    max_symbols: usize,
    max_connections: u32,
    connections_per_stock: u32,
    system_connections: u32,
}

impl SubscriptionManager {
    pub fn new(max_connections: u32, connections_per_stock: u32, system_connections: u32) -> Self {
        let per_stock = connections_per_stock.max(1);
        let usable = max_connections.saturating_sub(system_connections);
        let max_symbols = (usable / per_stock) as usize;
        Self {
            inner: Mutex::new(Inner {
                subscribed: HashSet::new(),
                callbacks: HashMap::new(),
            }),
            max_symbols,
            max_connections,
            connections_per_stock: per_stock,
            system_connections,
        }
    }

    // -------------------------------------------------------------------------
    // Capacity
    // -------------------------------------------------------------------------

    pub fn max_symbols(&self) -> usize {
        self.max_symbols
    }

    /// Room for one more symbol (two more slots).
    pub fn has_capacity(&self) -> bool {
        self.inner.lock().subscribed.len() < self.max_symbols
    }

    /// A symbol already subscribed can always "subscribe" again.
    pub fn can_subscribe(&self, code: &str) -> bool {
        let inner = self.inner.lock();
        inner.subscribed.contains(code) || inner.subscribed.len() < self.max_symbols
    }

    /// `slots_used + system_slots ≤ max_connections` always holds.
    pub fn slots_used(&self) -> u32 {
        self.inner.lock().subscribed.len() as u32 * self.connections_per_stock
            + self.system_connections
    }

    pub fn usage(&self) -> String {
        format!("{}/{}", self.slots_used(), self.max_connections)
    }

    // -------------------------------------------------------------------------
    // Set management
    // -------------------------------------------------------------------------

    pub fn add(&self, code: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.subscribed.contains(code) {
            debug!(code, "already subscribed");
            return true;
        }
        if inner.subscribed.len() >= self.max_symbols {
            warn!(
                code,
                subscribed = inner.subscribed.len(),
                max = self.max_symbols,
                "subscription capacity reached"
            );
            return false;
        }
        inner.subscribed.insert(code.to_string());
        true
    }

    pub fn remove(&self, code: &str) {
        self.inner.lock().subscribed.remove(code);
    }

    pub fn is_subscribed(&self, code: &str) -> bool {
        self.inner.lock().subscribed.contains(code)
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.inner.lock().subscribed.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().subscribed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.subscribed.clear();
    }

    // -------------------------------------------------------------------------
    // Callbacks
    // -------------------------------------------------------------------------

    pub fn register(&self, tr_id: &str, callback: EventCallback) {
        self.inner
            .lock()
            .callbacks
            .entry(tr_id.to_string())
            .or_default()
            .push(callback);
        debug!(tr_id, "callback registered");
    }

    /// Copy-on-emit: the callback list is cloned under the lock and invoked
    /// after release, so callbacks may call back into the manager.
    pub fn dispatch(&self, tr_id: &str, event: &GatewayEvent) {
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock();
            inner.callbacks.get(tr_id).cloned().unwrap_or_default()
        };
        for cb in callbacks {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn capacity_arithmetic() {
        // 41 total, 1 system, 2 per symbol → 20 symbols.
        let mgr = SubscriptionManager::new(41, 2, 1);
        assert_eq!(mgr.max_symbols(), 20);
        assert_eq!(mgr.slots_used(), 1);
        assert!(mgr.has_capacity());

        for i in 0..20 {
            assert!(mgr.add(&format!("{i:06}")));
        }
        assert!(!mgr.has_capacity());
        assert!(!mgr.add("999999"));
        // The invariant slots_used ≤ max holds at the boundary.
        assert!(mgr.slots_used() <= 41);
        assert_eq!(mgr.usage(), "41/41");

        // Re-adding an existing symbol is fine even at capacity.
        assert!(mgr.add("000000"));
        assert!(mgr.can_subscribe("000000"));
        assert!(!mgr.can_subscribe("999999"));
    }

    #[test]
    fn remove_frees_a_slot() {
        let mgr = SubscriptionManager::new(5, 2, 1);
        assert_eq!(mgr.max_symbols(), 2);
        assert!(mgr.add("000001"));
        assert!(mgr.add("000002"));
        assert!(!mgr.add("000003"));
        mgr.remove("000001");
        assert!(mgr.add("000003"));
        assert_eq!(mgr.count(), 2);
    }

    #[test]
    fn dispatch_invokes_registered_callbacks() {
        let mgr = SubscriptionManager::new(41, 2, 1);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        mgr.register(
            TR_CONTRACT,
            Arc::new(move |event| {
                if matches!(event, GatewayEvent::Contract(_)) {
                    hits2.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let tick = ContractTick {
            code: "005930".into(),
            ..ContractTick::default()
        };
        mgr.dispatch(TR_CONTRACT, &GatewayEvent::Contract(tick.clone()));
        mgr.dispatch(TR_ORDERBOOK, &GatewayEvent::Contract(tick));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_reenter_manager() {
        let mgr = Arc::new(SubscriptionManager::new(41, 2, 1));
        let mgr2 = mgr.clone();
        mgr.register(
            TR_NOTICE,
            Arc::new(move |_| {
                // Would deadlock if dispatch held the lock while invoking.
                mgr2.remove("005930");
            }),
        );
        mgr.add("005930");
        let notice = ExecutionNotice {
            customer_id: String::new(),
            account_no: String::new(),
            order_no: "1".into(),
            orig_order_no: String::new(),
            sell_buy_dvsn: "02".into(),
            stock_code: "005930".into(),
            exec_qty: 1,
            exec_price: 1.0,
            exec_time: "090000".into(),
            reject_yn: "0".into(),
            exec_yn: "2".into(),
            receipt_yn: "1".into(),
            branch_no: String::new(),
            ord_qty: 1,
            ord_price: 1.0,
            stock_name: String::new(),
        };
        mgr.dispatch(TR_NOTICE, &GatewayEvent::Notice(notice));
        assert!(!mgr.is_subscribed("005930"));
    }
}
