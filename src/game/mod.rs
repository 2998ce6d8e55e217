pub mod chart;
pub mod cursor;
pub mod flow;
pub mod gameplay;
pub mod hold;
pub mod judgment;
pub mod note;
pub mod parsing;
pub mod replay;
pub mod timing;
pub mod timing_windows;
