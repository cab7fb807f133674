//! Inventory event catalogue. The stock ledger that emits these lives with
//! the inventory service.

mod events;

pub use events::{
    InventoryAdjustedData, InventoryEvent, LowStockData, OutOfStockData, ReleaseReason,
    ReservedItem, StockReleasedData, StockReplenishedData, StockReservationConfirmedData,
    StockReservationFailedData, StockReservedData, StockTransferredData, UnavailableItem,
};
