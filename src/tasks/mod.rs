// 后台定时任务

pub mod reaper;

pub use reaper::spawn_stale_location_reaper;
