//! 迭代式深度研究
//!
//! - **state**: 单任务瞬态状态、检索模式轮换
//! - **prompts**: 各阶段提示词
//! - **orchestrator**: 状态机与进度消息协议

pub mod orchestrator;
pub mod prompts;
pub mod state;

pub use orchestrator::{Decision, PipelineMessage, ResearchOrchestrator};
pub use state::{
    mode_for_iteration, PlannedQuery, ResearchState, SearchMode, SearchResult, SiteSummary, Source,
    MODE_SCHEDULE,
};
