/// 调用方身份，由认证中间件或 WebSocket 握手解析
///
/// 匿名调用方以设备ID作为身份，引擎不区分两者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub device_id: Option<String>,
    pub is_authenticated: bool,
}

impl CallerIdentity {
    pub fn authenticated(user_id: impl Into<String>, device_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id,
            is_authenticated: true,
        }
    }

    pub fn anonymous(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            user_id: format!("device:{}", device_id),
            device_id: Some(device_id),
            is_authenticated: false,
        }
    }
}
