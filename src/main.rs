use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod config;
mod domain;
mod metrics;
mod models;
mod service;
mod store;
mod utils;

use config::AppConfig;
use domain::master::{RateMaster, Star};
use domain::order::{
    AssignMasters, CompanionToolRequest, CreateOrder, Measure, OrderProductRequest, OrderStatus,
    OrderToolRequest, PaymentType, UpdateOrderStatus,
};
use models::{Level, Master, Product, Tool};
use service::FulfillmentService;
use store::{FulfillmentStore, InMemoryStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize structured logging with environment-based filtering
    // RUST_LOG wins over FULFILLMENT_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!("🚀 Starting order fulfillment core");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // Metrics HTTP server runs on its own actix system in a background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Open the store ===
    let (store, demo): (Arc<dyn FulfillmentStore>, Option<DemoCatalog>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let store = PgStore::connect(url, config.db_max_connections).await?;
            store.ensure_schema().await?;
            tracing::info!("✅ Schema ready");
            (Arc::new(store), None)
        }
        None => {
            tracing::info!("No database configured, using the in-memory store with a demo catalog");
            let store = InMemoryStore::new();
            let demo = DemoCatalog::seed(&store).await;
            (Arc::new(store), Some(demo))
        }
    };

    let service = FulfillmentService::new(store, metrics.clone(), &config);

    // === 3. Demonstrate the order lifecycle ===
    if let Some(demo) = demo {
        run_demo(&service, &demo).await?;
    }

    tracing::info!("⏳ Serving metrics, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");

    Ok(())
}

struct DemoCatalog {
    scaffold: Product,
    expert: Level,
    drill: Tool,
    ladder: Tool,
    master: Master,
}

impl DemoCatalog {
    async fn seed(store: &InMemoryStore) -> Self {
        let demo = Self {
            scaffold: Product {
                id: Uuid::new_v4(),
                name: "Scaffolding set".to_string(),
                quantity: 6,
                price_hourly: Decimal::from(8),
                price_daily: Decimal::from(50),
                is_active: true,
            },
            expert: Level {
                id: Uuid::new_v4(),
                name: "Expert".to_string(),
                price_hourly: Decimal::from(3),
                price_daily: Decimal::from(20),
            },
            drill: Tool {
                id: Uuid::new_v4(),
                name: "Hammer drill".to_string(),
                quantity: 4,
                price: Decimal::from(6),
                is_active: true,
            },
            ladder: Tool {
                id: Uuid::new_v4(),
                name: "Ladder".to_string(),
                quantity: 10,
                price: Decimal::from(4),
                is_active: true,
            },
            master: Master {
                id: Uuid::new_v4(),
                name: "Demo master".to_string(),
                is_active: false,
                star: None,
            },
        };

        store.add_product(demo.scaffold.clone()).await;
        store.add_level(demo.expert.clone()).await;
        store.add_tool(demo.drill.clone()).await;
        store.add_tool(demo.ladder.clone()).await;
        store.add_master(demo.master.clone()).await;
        demo
    }
}

async fn run_demo(service: &FulfillmentService, demo: &DemoCatalog) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle");

    let customer_id = Uuid::new_v4();
    let placed = service
        .create_order(
            &CreateOrder {
                lat: 41.31,
                long: 69.28,
                address: "Amir Temur 1".to_string(),
                date: Utc::now(),
                payment_type: PaymentType::Card,
                with_delivery: true,
                comment_to_delivery: Some("Gate 3".to_string()),
                promo_code: Some("WELCOME".to_string()),
                order_products: vec![OrderProductRequest {
                    product_id: demo.scaffold.id,
                    level_id: demo.expert.id,
                    count: 2,
                    measure: Measure::Day,
                    measure_count: 3,
                    tools: vec![CompanionToolRequest {
                        tool_id: demo.drill.id,
                        count: 1,
                    }],
                }],
                order_tools: vec![OrderToolRequest {
                    tool_id: demo.ladder.id,
                    count: 2,
                }],
            },
            customer_id,
        )
        .await?;

    let order_id = placed.order.order.id;
    tracing::info!(
        order_id = %order_id,
        subtotal = %placed.pricing.subtotal,
        discount = %placed.pricing.discount,
        total = %placed.pricing.total,
        "✅ Order created"
    );

    service
        .assign_masters(&AssignMasters {
            order_id,
            master_ids: vec![demo.master.id],
        })
        .await?;

    service
        .update_order_status(&UpdateOrderStatus {
            order_id,
            status: OrderStatus::Completed,
        })
        .await?;

    for star in [5, 4] {
        let rating = service
            .rate_master(
                &RateMaster {
                    master_id: demo.master.id,
                    star: Star::try_from(star)?,
                },
                customer_id,
            )
            .await?;
        tracing::info!(average = %rating.average, "Master average updated");
    }

    let details = service.get_order(order_id).await?;
    tracing::info!(
        order_id = %order_id,
        status = %details.order.status,
        masters = details.masters.len(),
        "🎉 Demo complete"
    );

    Ok(())
}
