use candle_core::Tensor;

use crate::error::Result;

pub trait GnnModule {
    /// `x` is the (N, F) feature matrix, `adj` the dense (N, N) adjacency.
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor>;

    fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        self.forward_t(x, adj, false)
    }
}
