// 位置历史存储库

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::database::store::LocationHistory;
use crate::error::StoreError;
use crate::models::LocationRecord;

/// 追加写入 location_history 表
pub struct LocationHistoryOperation {
    db: Arc<PgPool>,
}

impl LocationHistoryOperation {
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocationHistory for LocationHistoryOperation {
    async fn append(&self, record: &LocationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO location_history
                (user_id, device_id, latitude, longitude, speed, heading, recorded_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.device_id)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.speed)
        .bind(record.heading)
        .bind(record.last_update)
        .execute(&*self.db)
        .await?;

        Ok(())
    }
}
