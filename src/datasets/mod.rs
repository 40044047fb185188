mod ddi;
pub use ddi::*;

mod full_batch_loader;
pub use full_batch_loader::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::*;
