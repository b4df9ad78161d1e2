use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{AppState, config::Config, error::AppError, models::CallerIdentity, utils::verify_token};

/// 匿名客户端携带的设备ID请求头
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// 解析调用方身份
///
/// 带令牌时必须校验通过，无效令牌不会降级为匿名身份；
/// 没有令牌时使用设备ID作为匿名身份。
pub fn resolve_identity(
    config: &Config,
    token: Option<&str>,
    device_id: Option<&str>,
) -> Result<CallerIdentity, AppError> {
    let device_id = device_id
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    if let Some(token) = token {
        let claims = verify_token(token, config).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            AppError::Unauthorized
        })?;
        return Ok(CallerIdentity::authenticated(claims.sub, device_id));
    }

    match device_id {
        Some(device_id) => Ok(CallerIdentity::anonymous(device_id)),
        None => Err(AppError::Unauthorized),
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let device_id = request
        .headers()
        .get(DEVICE_ID_HEADER)
        .and_then(|header| header.to_str().ok());

    let identity = resolve_identity(
        &state.config,
        bearer.as_ref().map(|TypedHeader(auth)| auth.token()),
        device_id,
    )?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
