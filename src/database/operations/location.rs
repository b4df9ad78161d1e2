// 位置存储库
// 包含 user_locations 表相关的数据库操作

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::database::store::LocationStore;
use crate::error::StoreError;
use crate::models::LocationRecord;

/// 位置存储库，基于 PostgreSQL 的 user_locations 表
pub struct LocationOperation {
    db: Arc<PgPool>,
}

impl LocationOperation {
    /// 创建新的位置存储库实例
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocationStore for LocationOperation {
    async fn upsert(&self, record: &LocationRecord) -> Result<LocationRecord, StoreError> {
        // created_at 只在首次插入时写入
        let stored = sqlx::query_as::<_, LocationRecord>(
            r#"
            INSERT INTO user_locations (
                user_id, device_id, latitude, longitude, speed, heading,
                avatar_id, color, is_anonymous, last_update, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id)
            DO UPDATE SET
                device_id = EXCLUDED.device_id,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                speed = EXCLUDED.speed,
                heading = EXCLUDED.heading,
                avatar_id = EXCLUDED.avatar_id,
                color = EXCLUDED.color,
                is_anonymous = EXCLUDED.is_anonymous,
                last_update = EXCLUDED.last_update
            RETURNING
                user_id, device_id, latitude, longitude, speed, heading,
                avatar_id, color, is_anonymous, last_update, created_at
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.device_id)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.speed)
        .bind(record.heading)
        .bind(record.avatar_id)
        .bind(&record.color)
        .bind(record.is_anonymous)
        .bind(record.last_update)
        .bind(record.created_at)
        .fetch_one(&*self.db)
        .await?;

        Ok(stored)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<LocationRecord>, StoreError> {
        let record = sqlx::query_as::<_, LocationRecord>(
            r#"
            SELECT
                user_id, device_id, latitude, longitude, speed, heading,
                avatar_id, color, is_anonymous, last_update, created_at
            FROM user_locations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(record)
    }

    async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
        exclude_user: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        // 先用经纬度范围粗筛，再用Haversine公式精确过滤
        let lat_range = radius / 111000.0; // 1度纬度约111km
        let lon_range = radius / (111000.0 * latitude.to_radians().cos().abs().max(1e-6));

        let records = sqlx::query_as::<_, LocationRecord>(
            r#"
            SELECT
                user_id, device_id, latitude, longitude, speed, heading,
                avatar_id, color, is_anonymous, last_update, created_at
            FROM (
                SELECT
                    ul.*,
                    2.0 * 6371000.0 * asin(sqrt(
                        power(sin(radians(ul.latitude - $1::float8) / 2.0), 2.0) +
                        cos(radians($1::float8)) * cos(radians(ul.latitude)) *
                        power(sin(radians(ul.longitude - $2::float8) / 2.0), 2.0)
                    )) AS distance
                FROM user_locations ul
                WHERE
                    ul.latitude BETWEEN ($1 - $3::float8) AND ($1 + $3::float8)
                    AND ul.longitude BETWEEN ($2 - $4::float8) AND ($2 + $4::float8)
                    AND ul.user_id <> $5
            ) nearby
            WHERE distance <= $6
            ORDER BY distance
            LIMIT $7
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .bind(lat_range)
        .bind(lon_range)
        .bind(exclude_user)
        .bind(radius)
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;

        Ok(records)
    }

    async fn delete_stale(&self, threshold_secs: i64) -> Result<Vec<String>, StoreError> {
        let deleted: Vec<(String,)> = sqlx::query_as(
            r#"
            DELETE FROM user_locations
            WHERE last_update < NOW() - make_interval(secs => $1::float8)
            RETURNING user_id
            "#,
        )
        .bind(threshold_secs as f64)
        .fetch_all(&*self.db)
        .await?;

        Ok(deleted.into_iter().map(|(user_id,)| user_id).collect())
    }
}
