pub mod aligner;
pub mod checkpoint;
pub mod components;
pub mod config;
pub mod criterion;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod gaf;
pub mod graph;
pub mod model_selection;
pub mod observation;
pub mod optfields;
pub mod parser;
pub mod path;
pub mod report;
pub mod sampler;
pub mod writer;
