pub mod cache;
pub mod model;
pub mod store;

pub use model::{DailyBar, OrderRef, RealtimeData, ReferenceData, Snapshot, StockMeta, TradeInfo, TradeUpdates};
pub use store::{IntradaySeed, StockStore, StoreSummary};
