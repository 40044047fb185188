mod traits;
pub use traits::*;
pub mod utils;

mod multi_head;
pub use multi_head::MultiHead;
mod gat;
pub use gat::{AttnGraphConvolution, Gat};
mod topo_gat;
pub use topo_gat::{Attntopo, TopoGat, NUM_BLOCKS};
