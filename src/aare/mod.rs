mod compiler;
mod pattern;

// 导出常用项
pub use compiler::{convert_glob, escape_literal};
pub use pattern::Pattern;
