use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops, Init};

use crate::error::{Error, Result};

/// Pre-softmax score given to non-edges.
pub const MASK_VALUE: f64 = -9e15;

/// Gain used for every Xavier-initialised attention parameter.
pub const XAVIER_GAIN: f64 = 1.414;

// Xavier Uniform
pub fn xavier_uniform(fan_in: usize, fan_out: usize, gain: f64) -> Init {
    let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Checks `x` is (N, in_features) and `adj` is (N, N); returns N.
pub fn check_inputs(
    op: &'static str,
    x: &Tensor,
    adj: &Tensor,
    in_features: usize,
) -> Result<usize> {
    let (num_nodes, num_features) = match x.dims() {
        &[n, f] => (n, f),
        dims => return Err(Error::dims(op, format!("(N, {in_features})"), format!("{dims:?}"))),
    };
    if num_features != in_features {
        return Err(Error::dims(
            op,
            format!("({num_nodes}, {in_features})"),
            format!("({num_nodes}, {num_features})"),
        ));
    }
    match adj.dims() {
        &[r, c] if r == num_nodes && c == num_nodes => Ok(num_nodes),
        dims => Err(Error::dims(
            op,
            format!("adjacency ({num_nodes}, {num_nodes})"),
            format!("adjacency {dims:?}"),
        )),
    }
}

/// Moves `x` and `adj` onto the device and dtype of `param`.
pub fn align_inputs(x: &Tensor, adj: &Tensor, param: &Tensor) -> Result<(Tensor, Tensor)> {
    let x = x.to_device(param.device())?.to_dtype(param.dtype())?;
    let adj = adj.to_device(param.device())?.to_dtype(param.dtype())?;
    Ok((x, adj))
}

/// Logs a warning when some node has no incoming edge; its attention row will be uniform.
pub(crate) fn warn_isolated_nodes(op: &'static str, adj: &Tensor) -> Result<()> {
    if tracing::enabled!(tracing::Level::WARN) {
        let isolated = isolated_nodes(adj)?;
        if isolated > 0 {
            tracing::warn!(op, isolated, "nodes without neighbours attend uniformly");
        }
    }
    Ok(())
}

/// e_ij = LeakyReLU(a1·h_i + a2·h_j), computed as the outer sum of two (N, 1) projections.
pub fn attention_logits(h: &Tensor, att: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let out_dim = h.dim(D::Minus1)?;
    let wh1 = h.matmul(&att.narrow(0, 0, out_dim)?)?;
    let wh2 = h.matmul(&att.narrow(0, out_dim, out_dim)?)?;
    Ok(ops::leaky_relu(&wh1.broadcast_add(&wh2.t()?)?, negative_slope)?)
}

/// Replaces logits of non-edges (`adj <= 0`) with [`MASK_VALUE`] and normalises each row.
///
/// A row without any edge ends up uniform rather than zero.
pub fn masked_softmax(e: &Tensor, adj: &Tensor) -> Result<Tensor> {
    let mask = adj.gt(&adj.zeros_like()?)?;
    let masked = mask.where_cond(e, &e.ones_like()?.affine(MASK_VALUE, 0.0)?)?;
    Ok(ops::softmax(&masked, D::Minus1)?)
}

/// A + A² + A³ with the diagonal set to zero.
pub fn structural_weights(adj: &Tensor) -> Result<Tensor> {
    let num_nodes = adj.dim(0)?;
    let adj2 = adj.matmul(adj)?;
    let adj3 = adj2.matmul(adj)?;
    let off_diagonal = Tensor::eye(num_nodes, adj.dtype(), adj.device())?.affine(-1.0, 1.0)?;
    Ok(adj.add(&adj2)?.add(&adj3)?.mul(&off_diagonal)?)
}

/// Dense binary (N, N) adjacency from a (2, E) edge index.
pub fn dense_adjacency(edge_index: &Tensor, num_nodes: usize, device: &Device) -> Result<Tensor> {
    let edges = match edge_index.dims() {
        &[2, _] => edge_index.to_dtype(DType::U32)?.to_vec2::<u32>()?,
        dims => return Err(Error::dims("dense_adjacency", "(2, E)", format!("{dims:?}"))),
    };
    let mut data = vec![0f32; num_nodes * num_nodes];
    for (&u, &v) in edges[0].iter().zip(&edges[1]) {
        let (u, v) = (u as usize, v as usize);
        if u >= num_nodes || v >= num_nodes {
            return Err(Error::dims(
                "dense_adjacency",
                format!("node ids below {num_nodes}"),
                u.max(v),
            ));
        }
        data[u * num_nodes + v] = 1.0;
    }
    Ok(Tensor::from_vec(data, (num_nodes, num_nodes), device)?)
}

/// Number of rows of `adj` without any positive entry.
pub fn isolated_nodes(adj: &Tensor) -> Result<usize> {
    let degree = adj
        .gt(&adj.zeros_like()?)?
        .to_dtype(DType::F32)?
        .sum(D::Minus1)?
        .to_vec1::<f32>()?;
    Ok(degree.into_iter().filter(|&d| d == 0.0).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(rows: &[&[f32]]) -> Tensor {
        let n = rows.len();
        let m = rows[0].len();
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(data, (n, m), &Device::Cpu).unwrap()
    }

    #[test]
    fn masked_softmax_ignores_non_edges() -> Result<()> {
        let e = tensor(&[&[1.0, 2.0, 3.0], &[0.5, 0.5, 0.5], &[1.0, 1.0, 1.0]]);
        let adj = tensor(&[&[1.0, 1.0, 0.0], &[0.0, 0.0, 2.0], &[0.0, 0.0, 0.0]]);
        let alpha = masked_softmax(&e, &adj)?.to_vec2::<f32>()?;

        let expected = 1.0 / (1.0 + (-1.0f32).exp());
        assert!((alpha[0][0] - (1.0 - expected)).abs() < 1e-6);
        assert!((alpha[0][1] - expected).abs() < 1e-6);
        assert_eq!(alpha[0][2], 0.0);
        assert_eq!(alpha[1], vec![0.0, 0.0, 1.0]);
        // row without edges is uniform
        for a in &alpha[2] {
            assert!((a - 1.0 / 3.0).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn masked_softmax_drops_negative_weights() -> Result<()> {
        // the strongest logit sits on a negative entry
        let e = tensor(&[&[5.0, 0.0, 0.0], &[3.0, 3.0, 1.0]]);
        let adj = tensor(&[&[-1.0, 1.0, 0.0], &[-0.5, -2.0, 0.5]]);
        let alpha = masked_softmax(&e, &adj)?.to_vec2::<f32>()?;
        assert_eq!(alpha[0], vec![0.0, 1.0, 0.0]);
        assert_eq!(alpha[1], vec![0.0, 0.0, 1.0]);
        assert_eq!(isolated_nodes(&adj)?, 0);
        assert_eq!(isolated_nodes(&tensor(&[&[-1.0, 0.0], &[0.0, -3.0]]))?, 2);
        Ok(())
    }

    #[test]
    fn structural_weights_of_path() -> Result<()> {
        // 0 - 1 - 2
        let adj = tensor(&[&[0.0, 1.0, 0.0], &[1.0, 0.0, 1.0], &[0.0, 1.0, 0.0]]);
        let adj_w = structural_weights(&adj)?.to_vec2::<f32>()?;
        assert_eq!(
            adj_w,
            vec![
                vec![0.0, 3.0, 1.0],
                vec![3.0, 0.0, 3.0],
                vec![1.0, 3.0, 0.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn structural_weights_symmetric_with_zero_diagonal() -> Result<()> {
        let adj = tensor(&[
            &[1.0, 1.0, 0.0, 1.0],
            &[1.0, 0.0, 1.0, 1.0],
            &[0.0, 1.0, 1.0, 0.0],
            &[1.0, 1.0, 0.0, 0.0],
        ]);
        let adj_w = structural_weights(&adj)?.to_vec2::<f32>()?;
        for i in 0..4 {
            assert_eq!(adj_w[i][i], 0.0);
            for j in 0..4 {
                assert_eq!(adj_w[i][j], adj_w[j][i]);
            }
        }
        Ok(())
    }

    #[test]
    fn dense_adjacency_from_edge_index() -> Result<()> {
        let edge_index = Tensor::new(&[[0u32, 1, 1], [1, 0, 2]], &Device::Cpu)?;
        let adj = dense_adjacency(&edge_index, 3, &Device::Cpu)?;
        assert_eq!(isolated_nodes(&adj)?, 1);
        assert_eq!(
            adj.to_vec2::<f32>()?,
            vec![
                vec![0.0, 1.0, 0.0],
                vec![1.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0]
            ]
        );

        let out_of_range = Tensor::new(&[[0u32], [3]], &Device::Cpu)?;
        assert!(matches!(
            dense_adjacency(&out_of_range, 3, &Device::Cpu),
            Err(Error::DimensionMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn check_inputs_rejects_bad_shapes() -> Result<()> {
        let x = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let adj = Tensor::zeros((4, 4), DType::F32, &Device::Cpu)?;
        assert_eq!(check_inputs("test", &x, &adj, 3)?, 4);
        assert!(check_inputs("test", &x, &adj, 5).is_err());

        let rect = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        assert!(check_inputs("test", &x, &rect, 3).is_err());
        let wrong_n = Tensor::zeros((5, 5), DType::F32, &Device::Cpu)?;
        assert!(check_inputs("test", &x, &wrong_n, 3).is_err());
        let rank3 = Tensor::zeros((1, 4, 3), DType::F32, &Device::Cpu)?;
        assert!(check_inputs("test", &rank3, &adj, 3).is_err());
        Ok(())
    }

    #[test]
    fn xavier_bound() {
        match xavier_uniform(3, 5, XAVIER_GAIN) {
            Init::Uniform { lo, up } => {
                let bound = 1.414 * (6.0f64 / 8.0).sqrt();
                assert!((up - bound).abs() < 1e-12);
                assert!((lo + bound).abs() < 1e-12);
            }
            _ => panic!("expected uniform init"),
        }
    }
}
