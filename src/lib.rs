//! shotline - 单图多风格批量出片编排
//!
//! 模块划分：
//! - **backend**: 生成后端与主体分析器抽象、画幅映射、HTTP / Mock 实现
//! - **catalog**: 按主体模式划分的风格目录与 Prompt 模板
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 批次状态、重试策略、任务调度、聚合、编辑、持久化与编排主循环
//! - **observability**: 日志初始化
//! - **store**: 项目快照存储（内存 / SQLite）

pub mod backend;
pub mod catalog;
pub mod config;
pub mod core;
pub mod observability;
pub mod store;
