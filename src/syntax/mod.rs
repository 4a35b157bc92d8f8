pub mod parser;

pub use parser::{parse_listing, ParsedKernel, Stmt};
