mod builder;

pub use builder::{CellServingGraph, build_cell_serving_graph};
