//! seeker - Rust 深度研究服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与优雅关闭
//! - **jobs**: 任务记录、事件日志、任务登记表与执行器
//! - **llm**: 文本生成客户端抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）、重试、后端工厂
//! - **observability**: tracing 日志初始化
//! - **research**: 迭代研究状态机（规划、检索、摘要、分析、决策、报告）
//! - **sources**: 信息源适配器（SearXNG 网页 / arXiv / Wikipedia）与正文抓取
//! - **web**: axum HTTP 接口与 SSE 进度流

pub mod config;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod observability;
pub mod research;
pub mod sources;
pub mod web;

pub use jobs::{JobRegistry, JobRunner};
pub use research::ResearchOrchestrator;
