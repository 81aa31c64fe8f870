pub mod block_store;
pub mod graph_store;
pub mod vector_store;

pub use block_store::BlockStore;
pub use graph_store::{GraphStore, InMemoryGraphStore, NeighbourDirection};
pub use vector_store::{InMemoryVectorStore, VectorQueryHit, VectorStore};
