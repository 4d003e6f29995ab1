use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::commands::RateMaster;
use crate::domain::errors::FulfillmentError;
use crate::models::MasterStar;
use crate::store::{finish, FulfillmentStore, StoreResult, StoreTransaction};

// ============================================================================
// Master Command Handler
// ============================================================================
//
// A rating is appended and the cached average recomputed from every rating
// of the master in the same transaction. The master row is locked first, so
// concurrent ratings of one master are applied one after another and the
// cached value always equals the mean of all committed ratings.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRating {
    pub rating: MasterStar,
    /// Unrounded mean after this rating
    pub average: Decimal,
}

#[derive(Clone)]
pub struct MasterCommandHandler {
    store: Arc<dyn FulfillmentStore>,
}

impl MasterCommandHandler {
    pub fn new(store: Arc<dyn FulfillmentStore>) -> Self {
        Self { store }
    }

    pub async fn rate_master(&self, command: &RateMaster, user_id: Uuid) -> StoreResult<MasterRating> {
        let mut tx = self.store.begin().await?;
        let result = rate_in(tx.as_mut(), command, user_id).await;
        finish(tx, result).await
    }
}

async fn rate_in(
    tx: &mut dyn StoreTransaction,
    command: &RateMaster,
    user_id: Uuid,
) -> StoreResult<MasterRating> {
    tx.lock_master(command.master_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Master", command.master_id))?;

    let rating = MasterStar {
        id: Uuid::new_v4(),
        master_id: command.master_id,
        user_id,
        star: command.star.value(),
        created_at: Utc::now(),
    };
    tx.insert_master_star(&rating).await?;

    let average = tx
        .average_master_star(command.master_id)
        .await?
        .ok_or_else(|| {
            FulfillmentError::Internal(format!(
                "rating {} missing from average of master {}",
                rating.id, command.master_id
            ))
        })?;
    tx.set_master_star(command.master_id, average).await?;

    tracing::info!(
        master_id = %command.master_id,
        user_id = %user_id,
        star = rating.star,
        average = %average,
        "⭐ Master rated"
    );

    Ok(MasterRating { rating, average })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::master::Star;
    use crate::models::Master;
    use crate::store::InMemoryStore;
    use std::str::FromStr;

    async fn seeded() -> (InMemoryStore, Master) {
        let store = InMemoryStore::new();
        let master = Master {
            id: Uuid::new_v4(),
            name: "Dilshod".to_string(),
            is_active: true,
            star: None,
        };
        store.add_master(master.clone()).await;
        (store, master)
    }

    fn rate(master_id: Uuid, star: i32) -> RateMaster {
        RateMaster {
            master_id,
            star: Star::try_from(star).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_average_follows_every_rating() {
        let (store, master) = seeded().await;
        let handler = MasterCommandHandler::new(Arc::new(store.clone()));

        for star in [5, 3, 4] {
            handler
                .rate_master(&rate(master.id, star), Uuid::new_v4())
                .await
                .unwrap();
        }
        assert_eq!(
            store.snapshot().await.masters[&master.id].star,
            Some(Decimal::from(4))
        );

        let rated = handler
            .rate_master(&rate(master.id, 2), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(rated.average, Decimal::from_str("3.5").unwrap());
        assert_eq!(rated.rating.star, 2);

        let state = store.snapshot().await;
        assert_eq!(state.master_stars.len(), 4);
        assert_eq!(state.masters[&master.id].star, Some(rated.average));
    }

    #[tokio::test]
    async fn test_same_user_may_rate_twice() {
        let (store, master) = seeded().await;
        let handler = MasterCommandHandler::new(Arc::new(store.clone()));
        let user_id = Uuid::new_v4();

        handler.rate_master(&rate(master.id, 5), user_id).await.unwrap();
        let second = handler.rate_master(&rate(master.id, 1), user_id).await.unwrap();

        assert_eq!(second.average, Decimal::from(3));
        assert_eq!(store.snapshot().await.master_stars.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_master_records_nothing() {
        let (store, _) = seeded().await;
        let handler = MasterCommandHandler::new(Arc::new(store.clone()));
        let missing = Uuid::new_v4();

        let result = handler.rate_master(&rate(missing, 5), Uuid::new_v4()).await;

        assert!(matches!(
            result,
            Err(FulfillmentError::NotFound { entity: "Master", id }) if id == missing
        ));
        assert!(store.snapshot().await.master_stars.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ratings_keep_average_exact() {
        let (store, master) = seeded().await;
        let handler = MasterCommandHandler::new(Arc::new(store.clone()));

        let stars = [5, 4, 3, 2, 1, 5, 4, 3];
        let tasks: Vec<_> = stars
            .iter()
            .map(|&star| {
                let handler = handler.clone();
                let command = rate(master.id, star);
                tokio::spawn(async move { handler.rate_master(&command, Uuid::new_v4()).await })
            })
            .collect();

        for result in futures_util::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let state = store.snapshot().await;
        assert_eq!(state.master_stars.len(), stars.len());
        // 27 / 8
        assert_eq!(
            state.masters[&master.id].star,
            Some(Decimal::from_str("3.375").unwrap())
        );
    }
}
