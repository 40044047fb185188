use std::path::Path;

use candle_nn::Activation;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-layer hyper-parameters shared by `AttnGraphConvolution` and `Attntopo`.
#[derive(Debug, Clone, Copy)]
pub struct AttentionParams {
    pub bias: bool,
    /// Dropout applied to the attention matrix during training.
    pub dropout: f32,
    /// LeakyReLU negative slope.
    pub alpha: f64,
    pub activation_fn: Activation,
}
impl Default for AttentionParams {
    fn default() -> Self {
        Self {
            bias: false,
            dropout: 0.3,
            alpha: 0.2,
            activation_fn: Activation::Elu(1.0),
        }
    }
}
impl AttentionParams {
    pub fn validate(&self) -> Result<()> {
        check_dropout("layer dropout", self.dropout)?;
        if !self.alpha.is_finite() {
            return Err(Error::Config(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Encoder configuration, loadable from TOML.
///
/// ```toml
/// gat_hidden = 64
/// nheads = 8
/// dropout = 0.1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Output width of every attention head.
    pub gat_hidden: usize,
    pub nheads: usize,
    /// Feature dropout applied around each multi-head block.
    pub dropout: f32,
    pub bias: bool,
    /// Attention dropout inside each head.
    pub attention_dropout: f32,
    /// LeakyReLU negative slope inside each head.
    pub alpha: f64,
}
impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            gat_hidden: 64,
            nheads: 8,
            dropout: 0.1,
            bias: false,
            attention_dropout: 0.3,
            alpha: 0.2,
        }
    }
}
impl EncoderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EncoderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gat_hidden == 0 {
            return Err(Error::Config("gat_hidden must be positive".into()));
        }
        if self.nheads == 0 {
            return Err(Error::Config("nheads must be positive".into()));
        }
        check_dropout("dropout", self.dropout)?;
        self.attention_params().validate()
    }

    /// Width of the concatenated multi-head output.
    pub fn output_dim(&self) -> usize {
        self.nheads * self.gat_hidden
    }

    pub fn attention_params(&self) -> AttentionParams {
        AttentionParams {
            bias: self.bias,
            dropout: self.attention_dropout,
            alpha: self.alpha,
            ..Default::default()
        }
    }
}

pub(crate) fn check_dropout(name: &str, p: f32) -> Result<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be in [0, 1), got {p}")))
    }
}
