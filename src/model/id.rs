//! 用户 ID 生成器
//!
//! 使用 snowflake-me 生成全局唯一、时间有序的 ID，十进制字符串形式对外。
//! 结构：41位时间戳 + 5位数据中心ID + 5位机器ID + 12位序列号。

use snowflake_me::Snowflake;
use std::sync::{Mutex, OnceLock};

static ID_GENERATOR: OnceLock<Mutex<Snowflake>> = OnceLock::new();

fn init_generator() -> &'static Mutex<Snowflake> {
    ID_GENERATOR.get_or_init(|| {
        // 从环境变量读取部署拓扑，默认单机
        let data_center_id = std::env::var("SNOWFLAKE_DATA_CENTER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1u8);

        let machine_id = std::env::var("SNOWFLAKE_MACHINE_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1u8);

        tracing::info!(
            "初始化 Snowflake ID 生成器: data_center_id={}, machine_id={}",
            data_center_id,
            machine_id
        );

        // 手动指定 machine_id / data_center_id，避免容器环境下 IP 检测失败
        let snowflake = Snowflake::builder()
            .machine_id(&|| Ok(machine_id as u16))
            .data_center_id(&|| Ok(data_center_id as u16))
            .finalize()
            .expect("Failed to initialize Snowflake ID generator");

        Mutex::new(snowflake)
    })
}

/// 生成下一个用户 ID（十进制字符串，时间有序）
pub fn next_user_id() -> String {
    let generator = init_generator();
    let guard = generator.lock().expect("Snowflake generator lock poisoned");
    guard
        .next_id()
        .expect("Failed to generate Snowflake ID")
        .to_string()
}
