use candle_core::{DType, Device, IndexOp, D};
use candle_nn::{loss, Optimizer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use candle_topogat::datasets::{DdiDataset, EdgeDirection, FullBatchLoader, RandomSplit, EDGES_FILE};
use candle_topogat::nn::{GnnModule, TopoGat};
use candle_topogat::EncoderConfig;

// cargo run --example link_prediction -- [dataset_root] [encoder.toml]
//
// Without a dataset root, a synthetic graph of two interaction clusters is used.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let device = Device::Cpu;

    let mut args = std::env::args().skip(1);
    let synthetic = tempfile::tempdir()?;
    let root: std::path::PathBuf = match args.next() {
        Some(root) => root.into(),
        None => {
            let raw = synthetic.path().join("raw");
            std::fs::create_dir_all(&raw)?;
            let mut edges = String::new();
            for cluster in 0..2 {
                for i in 0..12 {
                    for j in (i + 1)..12 {
                        if (i * 7 + j * 3) % 4 != 0 {
                            edges.push_str(&format!("c{cluster}_{i} c{cluster}_{j}\n"));
                        }
                    }
                }
            }
            edges.push_str("c0_0 c1_0\n");
            std::fs::write(raw.join(EDGES_FILE), edges)?;
            synthetic.path().to_path_buf()
        }
    };
    let config = match args.next() {
        Some(path) => EncoderConfig::from_file(path)?,
        None => EncoderConfig {
            gat_hidden: 8,
            nheads: 4,
            ..Default::default()
        },
    };

    // load dataset and hold out 20% of the interactions
    let dataset = DdiDataset::load(&root, EdgeDirection::Both)?;
    let [train, test] = dataset.random_split([0.8, 0.2])?;
    let train = FullBatchLoader::new(&train, &device).next().expect("one batch")?;
    let test = FullBatchLoader::new(&test, &device).next().expect("one batch")?;

    let model = TopoGat::new(&config, dataset.num_features, &device)?;
    let mut optimizer = candle_nn::AdamW::new(
        model.parameters(),
        candle_nn::ParamsAdamW {
            lr: 5e-3,
            ..Default::default()
        },
    )?;

    // inner-product decoder: reconstruct the visible adjacency
    for epoch in 0..100 {
        let z = model.forward_t(&train.xs, &train.adj, true)?;
        let logits = z.matmul(&z.t()?)?;
        let loss = loss::binary_cross_entropy_with_logit(&logits, &train.adj)?;
        optimizer.backward_step(&loss)?;

        if epoch % 10 == 0 {
            let z = model.forward(&train.xs, &train.adj)?;
            let held_out = test.edge_index.index_select(&test.mask, 1)?;
            let source = z.index_select(&held_out.i(0)?, 0)?;
            let target = z.index_select(&held_out.i(1)?, 0)?;
            // sigmoid(logit) > 0.5
            let logit = (source * target)?.sum(D::Minus1)?;
            let recall = logit
                .gt(&logit.zeros_like()?)?
                .to_dtype(DType::F32)?
                .mean_all()?
                .to_scalar::<f32>()?;
            info!(
                epoch,
                loss = loss.to_scalar::<f32>()?,
                held_out_recall = 100.0 * recall,
                "training"
            );
        }
    }
    Ok(())
}
