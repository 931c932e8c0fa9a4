//! Parser module for Shark.

mod core;
mod expressions;
mod precedence;
mod statements;


pub use self::core::{ParseResult, Parser};
