//! Which service listens to which subjects.
//!
//! ```text
//! order-service      PAYMENTS   payment.succeeded, payment.failed
//!                    INVENTORY  inventory.reservation_failed
//! inventory-service  ORDERS     order.created, order.confirmed, order.failed, order.cancelled
//! payment-service    ORDERS     order.created, order.cancelled
//!                    INVENTORY  inventory.reserved
//! ```

use std::time::Duration;

use domain::subjects;
use messaging::ConsumerConfig;
use messaging::topology::{INVENTORY_STREAM, ORDERS_STREAM, PAYMENTS_STREAM};

use crate::handlers::{inventory, order, payment};

/// Delivery settings shared by every saga consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub max_deliver: u32,
    pub ack_wait: Duration,
    pub nak_delay: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_deliver: messaging::topology::DEFAULT_MAX_DELIVER,
            ack_wait: Duration::from_secs(30),
            nak_delay: Duration::from_millis(500),
        }
    }
}

impl DeliverySettings {
    fn apply(&self, config: ConsumerConfig) -> ConsumerConfig {
        config
            .with_max_deliver(self.max_deliver)
            .with_ack_wait(self.ack_wait)
            .with_nak_delay(self.nak_delay)
    }
}

pub fn order_service_consumers(settings: &DeliverySettings) -> Vec<ConsumerConfig> {
    vec![
        settings.apply(ConsumerConfig::for_service(
            order::SERVICE,
            PAYMENTS_STREAM,
            &[subjects::PAYMENT_SUCCEEDED, subjects::PAYMENT_FAILED],
        )),
        settings.apply(ConsumerConfig::for_service(
            order::SERVICE,
            INVENTORY_STREAM,
            &[subjects::INVENTORY_RESERVATION_FAILED],
        )),
    ]
}

pub fn inventory_service_consumers(settings: &DeliverySettings) -> Vec<ConsumerConfig> {
    vec![settings.apply(ConsumerConfig::for_service(
        inventory::SERVICE,
        ORDERS_STREAM,
        &[
            subjects::ORDER_CREATED,
            subjects::ORDER_CONFIRMED,
            subjects::ORDER_FAILED,
            subjects::ORDER_CANCELLED,
        ],
    ))]
}

pub fn payment_service_consumers(settings: &DeliverySettings) -> Vec<ConsumerConfig> {
    vec![
        settings.apply(ConsumerConfig::for_service(
            payment::SERVICE,
            ORDERS_STREAM,
            &[subjects::ORDER_CREATED, subjects::ORDER_CANCELLED],
        )),
        settings.apply(ConsumerConfig::for_service(
            payment::SERVICE,
            INVENTORY_STREAM,
            &[subjects::INVENTORY_RESERVED],
        )),
    ]
}

/// Every durable consumer the saga declares.
pub fn saga_consumers(settings: &DeliverySettings) -> Vec<ConsumerConfig> {
    let mut consumers = order_service_consumers(settings);
    consumers.extend(inventory_service_consumers(settings));
    consumers.extend(payment_service_consumers(settings));
    consumers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_names_are_unique() {
        let consumers = saga_consumers(&DeliverySettings::default());
        let mut names: Vec<&str> = consumers.iter().map(|c| c.durable_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), consumers.len());
        assert!(names.contains(&"payment-service-inventory"));
    }

    #[test]
    fn order_created_fans_out_to_inventory_and_payment() {
        let interested: Vec<String> = saga_consumers(&DeliverySettings::default())
            .into_iter()
            .filter(|c| c.accepts(subjects::ORDER_CREATED))
            .map(|c| c.queue_group)
            .collect();
        assert_eq!(interested, vec!["inventory-service-queue", "payment-service-queue"]);
    }

    #[test]
    fn settings_reach_every_consumer() {
        let settings = DeliverySettings {
            max_deliver: 3,
            ack_wait: Duration::from_secs(5),
            nak_delay: Duration::ZERO,
        };
        for consumer in saga_consumers(&settings) {
            assert_eq!(consumer.max_deliver, 3);
            assert_eq!(consumer.ack_wait, Duration::from_secs(5));
            assert_eq!(consumer.nak_delay, Duration::ZERO);
        }
    }
}
