use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    error::AppError,
    models::{CallerIdentity, LocationUpdate, validate_coordinates},
    routes::location::model::{
        MyLocationResponse, NearbyQuery, NearbyUsersResponse, UpdateLocationRequest,
        UpdateLocationResponse,
    },
    utils::{ApiResponse, success_to_api_response},
};

// 上报当前位置
pub async fn update_location(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(request): Json<UpdateLocationRequest>,
) -> Result<Json<ApiResponse<UpdateLocationResponse>>, AppError> {
    request.validate()?;

    let record = state
        .engine
        .update_user_location(LocationUpdate {
            user_id: identity.user_id,
            device_id: identity.device_id,
            latitude: request.latitude,
            longitude: request.longitude,
            speed: request.speed,
            heading: request.heading,
            is_anonymous: !identity.is_authenticated,
        })
        .await?;

    Ok(success_to_api_response(UpdateLocationResponse {
        last_update: record.last_update,
    }))
}

// 获取附近用户API
pub async fn find_nearby_users(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<ApiResponse<NearbyUsersResponse>>, AppError> {
    let (Some(latitude), Some(longitude)) = (query.latitude, query.longitude) else {
        return Err(AppError::Validation("缺少latitude或longitude参数".into()));
    };
    validate_coordinates(latitude, longitude)?;

    let radius = state
        .engine
        .clamp_radius(query.radius.unwrap_or(f64::NAN));
    let users = state
        .engine
        .get_nearby_users(&identity.user_id, latitude, longitude, radius)
        .await?;

    Ok(success_to_api_response(NearbyUsersResponse {
        total_count: users.len(),
        users,
        radius,
    }))
}

// 获取本人最后上报的位置
pub async fn my_location(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<ApiResponse<Option<MyLocationResponse>>>, AppError> {
    let record = state.engine.get_user_location(&identity.user_id).await?;

    Ok(success_to_api_response(record.map(|r| MyLocationResponse {
        latitude: r.latitude,
        longitude: r.longitude,
        speed: r.speed,
        heading: r.heading,
        avatar_id: r.avatar_id,
        color: r.color,
        is_anonymous: r.is_anonymous,
        last_update: r.last_update,
    })))
}
