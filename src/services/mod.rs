pub mod client;
pub mod document;
pub mod extract;
pub mod normalize;
pub mod queue;
pub mod setup;
pub mod stream;
pub mod workflow;
pub mod workspace;
