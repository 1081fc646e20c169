//! 工具层：注册表、执行器、参数 schema 与内置工具

pub mod calculator;
pub mod database;
pub mod executor;
pub mod image;
pub mod registry;
pub mod schema;
pub mod search;

pub use calculator::CalculatorTool;
pub use database::UserDatabaseTool;
pub use executor::ToolExecutor;
pub use image::{AnalyzeImageDescriptionTool, AnalyzeImageUrlTool, AnalyzeLocalImageTool};
pub use registry::{Tool, ToolDescriptor, ToolRegistry, ToolSpec};
pub use search::SearchTool;
