use candle_core::Tensor;

use super::traits::GnnModule;
use crate::error::{Error, Result};

/// Independently parameterised heads run on the same input; outputs are
/// concatenated along the feature axis in construction order.
pub struct MultiHead<L> {
    heads: Vec<L>,
}
impl<L> MultiHead<L> {
    pub fn new(heads: Vec<L>) -> Result<Self> {
        if heads.is_empty() {
            return Err(Error::Config("a multi-head block needs at least one head".into()));
        }
        Ok(Self { heads })
    }

    /// Builds `num_heads` heads; `build` receives the head index.
    pub fn build<F>(num_heads: usize, build: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<L>,
    {
        Self::new((0..num_heads).map(build).collect::<Result<Vec<_>>>()?)
    }

    pub fn heads(&self) -> &[L] {
        &self.heads
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    /// Runs `f` on every head and concatenates the results column-wise.
    pub fn concat_with<F>(&self, mut f: F) -> Result<Tensor>
    where
        F: FnMut(&L) -> Result<Tensor>,
    {
        let outputs = self.heads.iter().map(&mut f).collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&outputs, 1)?)
    }
}
impl<L: GnnModule> GnnModule for MultiHead<L> {
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        self.concat_with(|head| head.forward_t(x, adj, train))
    }
}
