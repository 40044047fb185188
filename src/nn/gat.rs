use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder, VarMap};
use tracing::{debug, info};

use super::multi_head::MultiHead;
use super::traits::GnnModule;
use super::utils::{
    align_inputs, attention_logits, check_inputs, masked_softmax, warn_isolated_nodes,
    xavier_uniform, XAVIER_GAIN,
};
use crate::config::{AttentionParams, EncoderConfig};
use crate::error::{Error, Result};

/// Single-hop graph attention over a dense adjacency.
///
/// `H' = act(softmax_masked(LeakyReLU(a1·Z_i + a2·Z_j)) · Z)` with `Z = H·W (+ b)`.
pub struct AttnGraphConvolution {
    in_features: usize,
    out_features: usize,
    weight: Tensor,
    bias: Option<Tensor>,
    att: Tensor,
    dropout: Dropout,
    negative_slope: f64,
    activation_fn: Activation,
}
impl AttnGraphConvolution {
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
        let weight = vs.get_with_hints(
            (in_features, out_features),
            "weight",
            xavier_uniform(in_features, out_features, XAVIER_GAIN),
        )?;
        let att = vs.get_with_hints(
            (2 * out_features, 1),
            "att",
            xavier_uniform(2 * out_features, 1, XAVIER_GAIN),
        )?;
        let bias = if params.bias {
            Some(vs.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        Ok(Self {
            in_features,
            out_features,
            weight,
            bias,
            att,
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

    /// Inference-mode attention matrix (N, N); every row sums to one.
    pub fn attention(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let (x, adj) = self.prepare(x, adj)?;
        let h = project(&x, &self.weight, self.bias.as_ref())?;
        masked_softmax(&attention_logits(&h, &self.att, self.negative_slope)?, &adj)
    }

    fn prepare(&self, x: &Tensor, adj: &Tensor) -> Result<(Tensor, Tensor)> {
        check_inputs("AttnGraphConvolution", x, adj, self.in_features)?;
        align_inputs(x, adj, &self.weight)
    }
}
impl GnnModule for AttnGraphConvolution {
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        let (x, adj) = self.prepare(x, adj)?;
        let h = project(&x, &self.weight, self.bias.as_ref())?;
        let attention = masked_softmax(&attention_logits(&h, &self.att, self.negative_slope)?, &adj)?;
        let attention = self.dropout.forward(&attention, train)?;
        Ok(self.activation_fn.forward(&attention.matmul(&h)?)?)
    }
}
impl fmt::Display for AttnGraphConvolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AttnGraphConvolution ({} -> {})",
            self.in_features, self.out_features
        )
    }
}

pub(crate) fn project(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let h = x.matmul(weight)?;
    Ok(match bias {
        Some(bias) => h.broadcast_add(bias)?,
        None => h,
    })
}

pub(crate) fn check_layer_dims(in_features: usize, out_features: usize) -> Result<()> {
    if in_features == 0 || out_features == 0 {
        return Err(Error::Config(format!(
            "layer widths must be positive, got {in_features} -> {out_features}"
        )));
    }
    Ok(())
}

/// One multi-head block of [`AttnGraphConvolution`] with feature dropout
/// before and after; heads are concatenated, never averaged.
pub struct Gat {
    heads: MultiHead<AttnGraphConvolution>,
    dropout: Dropout,
    num_features: usize,
    gat_hidden: usize,
    device: Device,
    varmap: VarMap,
}
impl Gat {
    pub fn new(config: &EncoderConfig, num_features: usize, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let params = config.attention_params();
        let heads = MultiHead::build(config.nheads, |i| {
            AttnGraphConvolution::with_params(
                num_features,
                config.gat_hidden,
                params,
                vs.pp(format!("head_{}", i)),
            )
        })?;
        info!(
            num_features,
            nheads = config.nheads,
            gat_hidden = config.gat_hidden,
            ?device,
            "built GAT encoder"
        );
        Ok(Self {
            heads,
            dropout: Dropout::new(config.dropout),
            num_features,
            gat_hidden: config.gat_hidden,
            device: device.clone(),
            varmap,
        })
    }

    pub fn heads(&self) -> &[AttnGraphConvolution] {
        self.heads.heads()
    }
    pub fn output_dim(&self) -> usize {
        self.heads.num_heads() * self.gat_hidden
    }
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Inference-mode attention matrix of every head, in head order.
    pub fn attention_maps(&self, x: &Tensor, adj: &Tensor) -> Result<Vec<Tensor>> {
        self.heads()
            .iter()
            .map(|head| head.attention(x, adj))
            .collect()
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
impl GnnModule for Gat {
    fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        let num_nodes = check_inputs("Gat", x, adj, self.num_features)?;
        debug!(num_nodes, width = self.output_dim(), train, "GAT forward");
        warn_isolated_nodes("Gat", adj)?;

        let x = self.dropout.forward(&x.to_device(&self.device)?, train)?;
        let h = self.heads.forward_t(&x, adj, train)?;
        Ok(self.dropout.forward(&h, train)?)
    }
}
