use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder, VarMap};
use tracing::{debug, info, trace};

use super::gat::{check_layer_dims, project};
use super::multi_head::MultiHead;
use super::traits::GnnModule;
use super::utils::{
    align_inputs, attention_logits, check_inputs, masked_softmax, structural_weights,
    warn_isolated_nodes, xavier_uniform, XAVIER_GAIN,
};
use crate::config::{AttentionParams, EncoderConfig};
use crate::error::{Error, Result};

/// Number of stacked multi-head blocks in [`TopoGat`].
pub const NUM_BLOCKS: usize = 3;

/// Graph attention whose logits also see multi-hop connectivity.
///
/// The raw logits `e` are mixed with the structural weights
/// `S = A + A² + A³` (zero diagonal) as `|w_ei|·e + |w_si|·S` before the
/// softmax. The mask still comes from `A`, so the receptive field stays one hop.
pub struct Attntopo {
    in_features: usize,
    out_features: usize,
    weight: Tensor,
    bias: Option<Tensor>,
    att: Tensor,
    w_si: Tensor,
    w_ei: Tensor,
    dropout: Dropout,
    negative_slope: f64,
    activation_fn: Activation,
}
impl Attntopo {
    pub fn new(in_features: usize, out_features: usize, vs: VarBuilder) -> Result<Self> {
        Self::with_params(in_features, out_features, AttentionParams::default(), vs)
    }
    pub fn with_params(
        in_features: usize,
        out_features: usize,
        params: AttentionParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        check_layer_dims(in_features, out_features)?;
        params.validate()?;
        let gate = xavier_uniform(1, 1, XAVIER_GAIN);
        Ok(Self {
            in_features,
            out_features,
            weight: vs.get_with_hints(
                (in_features, out_features),
                "weight",
                xavier_uniform(in_features, out_features, XAVIER_GAIN),
            )?,
            bias: if params.bias {
                Some(vs.get_with_hints(out_features, "bias", Init::Const(0.0))?)
            } else {
                None
            },
            att: vs.get_with_hints(
                (2 * out_features, 1),
                "att",
                xavier_uniform(2 * out_features, 1, XAVIER_GAIN),
            )?,
            w_si: vs.get_with_hints((1, 1), "w_si", gate)?,
            w_ei: vs.get_with_hints((1, 1), "w_ei", gate)?,
            dropout: Dropout::new(params.dropout),
            negative_slope: params.alpha,
            activation_fn: params.activation_fn,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Inference-mode attention matrix (N, N).
    pub fn attention(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let (x, adj) = self.prepare(x, adj)?;
        let adj_w = structural_weights(&adj)?;
        let h = project(&x, &self.weight, self.bias.as_ref())?;
        self.attend(&h, &adj, &adj_w)
    }

    /// Forward pass with precomputed structural weights (see [`structural_weights`]).
    pub fn forward_with_structure_t(
        &self,
        x: &Tensor,
        adj: &Tensor,
        adj_w: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (x, adj) = self.prepare(x, adj)?;
        if adj_w.dims() != adj.dims() {
            return Err(Error::dims(
                "Attntopo",
                format!("structural weights {:?}", adj.dims()),
                format!("structural weights {:?}", adj_w.dims()),
            ));
        }
        let adj_w = adj_w.to_device(adj.device())?.to_dtype(adj.dtype())?;
        let h = project(&x, &self.weight, self.bias.as_ref())?;
        let attention = self.dropout.forward(&self.attend(&h, &adj, &adj_w)?, train)?;
        Ok(self.activation_fn.forward(&attention.matmul(&h)?)?)
    }

    fn attend(&self, h: &Tensor, adj: &Tensor, adj_w: &Tensor) -> Result<Tensor> {
        let e = attention_logits(h, &self.att, self.negative_slope)?;
        let e = e
            .broadcast_mul(&self.w_ei.abs()?)?
            .add(&adj_w.broadcast_mul(&self.w_si.abs()?)?)?;
        masked_softmax(&e, adj)
    }

    fn prepare(&self, x: &Tensor, adj: &Tensor) -> Result<(Tensor, Tensor)> {
        check_inputs("Attntopo", x, adj, self.in_features)?;
        align_inputs(x, adj, &self.weight)
    }
}
impl GnnModule for Attntopo {
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        check_inputs("Attntopo", x, adj, self.in_features)?;
        let adj = adj.to_device(self.weight.device())?.to_dtype(self.weight.dtype())?;
        let adj_w = structural_weights(&adj)?;
        self.forward_with_structure_t(x, &adj, &adj_w, train)
    }
}
impl fmt::Display for Attntopo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attntopo ({} -> {})", self.in_features, self.out_features)
    }
}

/// Three multi-head [`Attntopo`] blocks over a static adjacency.
///
/// Every block outputs `nheads * gat_hidden` columns, which is also the
/// input width of blocks 2 and 3. Feature dropout runs on the input and after
/// every block.
pub struct TopoGat {
    blocks: Vec<MultiHead<Attntopo>>,
    dropout: Dropout,
    num_features: usize,
    output_dim: usize,
    device: Device,
    varmap: VarMap,
}
impl TopoGat {
    pub fn new(config: &EncoderConfig, num_features: usize, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let params = config.attention_params();
        let mut blocks = Vec::with_capacity(NUM_BLOCKS);
        for b in 0..NUM_BLOCKS {
            let in_features = if b == 0 {
                num_features
            } else {
                config.output_dim()
            };
            let vs = vs.pp(format!("block_{}", b));
            blocks.push(MultiHead::build(config.nheads, |i| {
                Attntopo::with_params(
                    in_features,
                    config.gat_hidden,
                    params,
                    vs.pp(format!("head_{}", i)),
                )
            })?);
        }
        info!(
            num_features,
            nheads = config.nheads,
            gat_hidden = config.gat_hidden,
            blocks = NUM_BLOCKS,
            ?device,
            "built TopoGAT encoder"
        );
        Ok(Self {
            blocks,
            dropout: Dropout::new(config.dropout),
            num_features,
            output_dim: config.output_dim(),
            device: device.clone(),
            varmap,
        })
    }

    pub fn blocks(&self) -> &[MultiHead<Attntopo>] {
        &self.blocks
    }
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Inference-mode attention matrices, indexed `[block][head]`.
    pub fn attention_maps(&self, x: &Tensor, adj: &Tensor) -> Result<Vec<Vec<Tensor>>> {
        check_inputs("TopoGat", x, adj, self.num_features)?;
        let adj = adj.to_device(&self.device)?.to_dtype(DType::F32)?;
        let adj_w = structural_weights(&adj)?;

        let mut h = x.to_device(&self.device)?;
        let mut maps = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut block_maps = Vec::with_capacity(block.num_heads());
            for head in block.heads() {
                let (head_x, head_adj) = head.prepare(&h, &adj)?;
                let z = project(&head_x, &head.weight, head.bias.as_ref())?;
                block_maps.push(head.attend(&z, &head_adj, &adj_w)?);
            }
            maps.push(block_maps);
            h = block.concat_with(|head| head.forward_with_structure_t(&h, &adj, &adj_w, false))?;
        }
        Ok(maps)
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        Ok(self.varmap.load(path)?)
    }
}
impl GnnModule for TopoGat {
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        let num_nodes = check_inputs("TopoGat", x, adj, self.num_features)?;
        debug!(num_nodes, width = self.output_dim, train, "TopoGAT forward");
        warn_isolated_nodes("TopoGat", adj)?;

        // topology is static across blocks: one O(N³) pass per forward call
        let adj = adj.to_device(&self.device)?.to_dtype(DType::F32)?;
        let adj_w = structural_weights(&adj)?;

        let mut h = self.dropout.forward(&x.to_device(&self.device)?, train)?;
        for (b, block) in self.blocks.iter().enumerate() {
            h = block.concat_with(|head| head.forward_with_structure_t(&h, &adj, &adj_w, train))?;
            h = self.dropout.forward(&h, train)?;
            trace!(block = b, dims = ?h.dims(), "TopoGAT block done");
        }
        Ok(h)
    }
}
