// 数据库模块
// 包含位置存储接口和基于 PostgreSQL 的实现

pub mod operations; // 数据库操作实现
pub mod store; // 存储接口

// 重新导出常用类型，方便其他模块使用
pub use operations::history::LocationHistoryOperation;
pub use operations::location::LocationOperation;
pub use store::{LocationHistory, LocationStore};
