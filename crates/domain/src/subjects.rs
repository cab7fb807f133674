//! Broker subjects, one per event. Each is `<context>.<fact>` so the
//! stream patterns `order.*`, `payment.*` and `inventory.*` capture them.

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_CONFIRMED: &str = "order.confirmed";
pub const ORDER_FAILED: &str = "order.failed";
pub const ORDER_STATUS_CHANGED: &str = "order.status_changed";
pub const ORDER_CANCELLED: &str = "order.cancelled";
pub const ORDER_ITEM_ADDED: &str = "order.item_added";
pub const ORDER_ITEM_REMOVED: &str = "order.item_removed";

pub const PAYMENT_CREATED: &str = "payment.created";
pub const PAYMENT_PROCESSING: &str = "payment.processing";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const PAYMENT_REFUNDED: &str = "payment.refunded";

pub const INVENTORY_RESERVED: &str = "inventory.reserved";
pub const INVENTORY_RESERVATION_CONFIRMED: &str = "inventory.reservation_confirmed";
pub const INVENTORY_RELEASED: &str = "inventory.released";
pub const INVENTORY_RESERVATION_FAILED: &str = "inventory.reservation_failed";
pub const INVENTORY_LOW_STOCK: &str = "inventory.low_stock";
pub const INVENTORY_OUT_OF_STOCK: &str = "inventory.out_of_stock";
pub const INVENTORY_REPLENISHED: &str = "inventory.replenished";
pub const INVENTORY_ADJUSTED: &str = "inventory.adjusted";
pub const INVENTORY_TRANSFERRED: &str = "inventory.transferred";
