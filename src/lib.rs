pub mod cli;
pub mod emit;
pub mod graph;
pub mod node;
pub mod plan;
pub mod runner;
