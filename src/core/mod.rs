//! 核心编排层：错误与恢复、阶段、会话注册表、工具调度

pub mod error;
pub mod recovery;
pub mod session_registry;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use recovery::{FallbackTier, RecoveryEngine};
pub use session_registry::{Session, SessionRegistry};
pub use state::Phase;
pub use task_scheduler::TaskScheduler;
