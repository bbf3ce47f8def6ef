mod context;
mod scanner;

// 导出常用项
pub use context::ParseContext;
