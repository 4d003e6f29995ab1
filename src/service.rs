use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::errors::FulfillmentError;
use crate::domain::master::{MasterCommandHandler, MasterRating, RateMaster};
use crate::domain::order::{
    AssignMasters, CreateOrder, OrderCommandHandler, PlacedOrder, UpdateOrderStatus,
};
use crate::metrics::Metrics;
use crate::models::OrderDetails;
use crate::store::{FulfillmentStore, StoreResult};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Fulfillment Service - public entry point for the core operations
// ============================================================================
//
// Wraps each command handler call in:
// - a transaction deadline (expiry drops the transaction, which rolls back)
// - transient-failure retries of the whole unit of work
// - Prometheus bookkeeping
//
// ============================================================================

pub struct FulfillmentService {
    orders: OrderCommandHandler,
    masters: MasterCommandHandler,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
    tx_timeout: Duration,
}

impl FulfillmentService {
    pub fn new(store: Arc<dyn FulfillmentStore>, metrics: Arc<Metrics>, config: &AppConfig) -> Self {
        Self {
            orders: OrderCommandHandler::new(store.clone()),
            masters: MasterCommandHandler::new(store),
            metrics,
            retry: config.retry_config(),
            tx_timeout: config.transaction_timeout,
        }
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn create_order(&self, command: &CreateOrder, user_id: Uuid) -> StoreResult<PlacedOrder> {
        let orders = &self.orders;
        let placed = self
            .run("create_order", move || orders.create_order(command, user_id))
            .await?;

        let companion_tools = placed
            .order
            .order_products
            .iter()
            .map(|line| line.tools.len())
            .sum();
        self.metrics.record_order_created(
            placed.order.order_products.len(),
            companion_tools,
            placed.order.order_tools.len(),
        );

        Ok(placed)
    }

    pub async fn assign_masters(&self, command: &AssignMasters) -> StoreResult<OrderDetails> {
        let orders = &self.orders;
        let details = self
            .run("assign_masters", move || orders.assign_masters(command))
            .await?;

        self.metrics.record_masters_assigned(command.master_ids.len());
        Ok(details)
    }

    pub async fn update_order_status(&self, command: &UpdateOrderStatus) -> StoreResult<OrderDetails> {
        let orders = &self.orders;
        self.run("update_order_status", move || orders.update_status(command))
            .await
    }

    pub async fn get_order(&self, order_id: Uuid) -> StoreResult<OrderDetails> {
        let orders = &self.orders;
        self.run("get_order", move || orders.get_order(order_id)).await
    }

    pub async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        let orders = &self.orders;
        self.run("delete_order", move || orders.delete_order(order_id))
            .await
    }

    pub async fn rate_master(&self, command: &RateMaster, user_id: Uuid) -> StoreResult<MasterRating> {
        let masters = &self.masters;
        let rating = self
            .run("rate_master", move || masters.rate_master(command, user_id))
            .await?;

        self.metrics.record_rating();
        Ok(rating)
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let timeout = self.tx_timeout;
        let metrics = &self.metrics;
        let mut attempts = 0;

        let outcome = retry_on_transient(self.retry.clone(), |n| {
            attempts = n;
            if n > 1 {
                metrics.record_retry_attempt(operation, n);
            }

            let unit_of_work = attempt();
            async move {
                match tokio::time::timeout(timeout, unit_of_work).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            operation,
                            timeout_ms = timeout.as_millis() as u64,
                            "Transaction deadline exceeded, rolled back"
                        );
                        Err(FulfillmentError::Timeout(timeout))
                    }
                }
            }
        })
        .await;

        let result = outcome.into_result();
        if attempts > 1 {
            self.metrics.record_retry_outcome(operation, result.is_ok());
        }

        let failure = result.as_ref().err();
        match failure {
            Some(error) if error.is_client_error() => {
                tracing::debug!(operation, kind = error.kind(), error = %error, "Request rejected");
                if let FulfillmentError::InsufficientStock { entity, .. } = error {
                    self.metrics.record_stock_rejection(&entity.to_lowercase());
                }
            }
            Some(error) => {
                tracing::error!(operation, kind = error.kind(), error = %error, "Operation failed");
            }
            None => {}
        }
        self.metrics.record_operation(
            operation,
            started.elapsed().as_secs_f64(),
            failure.map(FulfillmentError::kind),
        );

        result
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::master::Star;
    use crate::domain::order::{Measure, OrderProductRequest, PaymentType};
    use crate::models::{Level, Master, Product};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct Fixture {
        store: InMemoryStore,
        product: Product,
        level: Level,
    }

    async fn fixture(store: InMemoryStore) -> Fixture {
        let product = Product {
            id: Uuid::new_v4(),
            name: "Concrete mixer".to_string(),
            quantity: 4,
            price_hourly: Decimal::from(10),
            price_daily: Decimal::from(50),
            is_active: true,
        };
        let level = Level {
            id: Uuid::new_v4(),
            name: "Junior".to_string(),
            price_hourly: Decimal::from(2),
            price_daily: Decimal::from(20),
        };
        store.add_product(product.clone()).await;
        store.add_level(level.clone()).await;

        Fixture {
            store,
            product,
            level,
        }
    }

    fn service(store: &InMemoryStore, config: AppConfig) -> FulfillmentService {
        FulfillmentService::new(
            Arc::new(store.clone()),
            Arc::new(Metrics::new().unwrap()),
            &config,
        )
    }

    fn command(fixture: &Fixture, count: i32) -> CreateOrder {
        CreateOrder {
            lat: 40.0,
            long: 70.0,
            address: "Yunusobod 4".to_string(),
            date: Utc::now(),
            payment_type: PaymentType::Card,
            with_delivery: false,
            comment_to_delivery: None,
            promo_code: None,
            order_products: vec![OrderProductRequest {
                product_id: fixture.product.id,
                level_id: fixture.level.id,
                count,
                measure: Measure::Day,
                measure_count: 2,
                tools: vec![],
            }],
            order_tools: vec![],
        }
    }

    fn counter(service: &FulfillmentService, name: &str) -> f64 {
        service
            .metrics()
            .registry()
            .gather()
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.metric.iter().map(|c| c.counter.value.unwrap_or(0.0)).sum())
            .unwrap_or(0.0)
    }

    #[tokio::test]
    async fn test_create_order_records_metrics() {
        let fixture = fixture(InMemoryStore::new()).await;
        let service = service(&fixture.store, AppConfig::default());

        let placed = service
            .create_order(&command(&fixture, 1), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(placed.order.order.total, Decimal::from(147));
        assert_eq!(counter(&service, "orders_created_total"), 1.0);
        assert_eq!(counter(&service, "order_line_items_total"), 1.0);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_once() {
        let fixture = fixture(InMemoryStore::new()).await;
        fixture.store.inject_commit_conflicts(1);
        let service = service(&fixture.store, AppConfig::default());

        service
            .create_order(&command(&fixture, 1), Uuid::new_v4())
            .await
            .unwrap();

        let state = fixture.store.snapshot().await;
        assert_eq!(state.orders.len(), 1);
        assert_eq!(state.products[&fixture.product.id].quantity, 3);
        assert_eq!(counter(&service, "retry_attempts_total"), 1.0);
        assert_eq!(counter(&service, "retry_success_total"), 1.0);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let fixture = fixture(InMemoryStore::new()).await;
        let service = service(&fixture.store, AppConfig::default());

        let result = service
            .create_order(&command(&fixture, 9), Uuid::new_v4())
            .await;

        assert!(matches!(
            result,
            Err(FulfillmentError::InsufficientStock { .. })
        ));
        assert_eq!(counter(&service, "retry_attempts_total"), 0.0);
        assert_eq!(counter(&service, "stock_rejections_total"), 1.0);
        assert_eq!(counter(&service, "operation_failures_total"), 1.0);
    }

    #[tokio::test]
    async fn test_lost_race_is_retried_against_fresh_stock() {
        let fixture = fixture(InMemoryStore::new()).await;
        // a concurrent order takes 2 of the 4 units after our pre-check
        fixture.store.take_on_next_decrement(2);
        let service = service(&fixture.store, AppConfig::default());

        let result = service
            .create_order(&command(&fixture, 3), Uuid::new_v4())
            .await;

        match result {
            Err(FulfillmentError::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(counter(&service, "retry_attempts_total"), 1.0);
        assert_eq!(counter(&service, "retry_failure_total"), 1.0);
        assert_eq!(counter(&service, "stock_rejections_total"), 1.0);

        let state = fixture.store.snapshot().await;
        assert!(state.orders.is_empty());
        assert_eq!(state.products[&fixture.product.id].quantity, 2);
    }

    #[tokio::test]
    async fn test_concurrent_reservation_leaving_enough_stock_succeeds() {
        let fixture = fixture(InMemoryStore::new()).await;
        // a concurrent order takes 1 of the 4 units; 3 are still enough
        fixture.store.take_on_next_decrement(1);
        let service = service(&fixture.store, AppConfig::default());

        let placed = service
            .create_order(&command(&fixture, 3), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(placed.order.order_products[0].line.count, 3);
        assert_eq!(counter(&service, "retry_attempts_total"), 0.0);
        let state = fixture.store.snapshot().await;
        assert_eq!(state.orders.len(), 1);
        assert_eq!(state.products[&fixture.product.id].quantity, 0);
        assert!(!state.products[&fixture.product.id].is_active);
    }

    #[tokio::test]
    async fn test_deadline_rolls_back() {
        let store = InMemoryStore::new().with_commit_delay(Duration::from_millis(200));
        let fixture = fixture(store).await;
        let config = AppConfig {
            transaction_timeout: Duration::from_millis(20),
            retry_max_attempts: 2,
            ..AppConfig::default()
        };
        let service = service(&fixture.store, config);

        let result = service
            .create_order(&command(&fixture, 1), Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(FulfillmentError::Timeout(_))));
        assert_eq!(counter(&service, "retry_failure_total"), 1.0);

        let state = fixture.store.snapshot().await;
        assert!(state.orders.is_empty());
        assert_eq!(state.products[&fixture.product.id].quantity, 4);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let fixture = fixture(InMemoryStore::new()).await;
        let master = Master {
            id: Uuid::new_v4(),
            name: "Jasur".to_string(),
            is_active: false,
            star: None,
        };
        fixture.store.add_master(master.clone()).await;
        let service = service(&fixture.store, AppConfig::default());

        let order_id = service
            .create_order(&command(&fixture, 1), Uuid::new_v4())
            .await
            .unwrap()
            .order
            .order
            .id;

        service
            .assign_masters(&AssignMasters {
                order_id,
                master_ids: vec![master.id],
            })
            .await
            .unwrap();
        assert_eq!(counter(&service, "masters_assigned_total"), 1.0);

        let completed = service
            .update_order_status(&UpdateOrderStatus {
                order_id,
                status: crate::domain::order::OrderStatus::Completed,
            })
            .await
            .unwrap();
        assert_eq!(completed.masters.len(), 1);

        let rating = service
            .rate_master(
                &RateMaster {
                    master_id: master.id,
                    star: Star::try_from(5).unwrap(),
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        assert_eq!(rating.average, Decimal::from(5));
        assert_eq!(counter(&service, "ratings_recorded_total"), 1.0);

        let fetched = service.get_order(order_id).await.unwrap();
        assert_eq!(fetched.order.status, crate::domain::order::OrderStatus::Completed);

        service.delete_order(order_id).await.unwrap();
        assert!(matches!(
            service.get_order(order_id).await,
            Err(FulfillmentError::NotFound { .. })
        ));
    }
}
