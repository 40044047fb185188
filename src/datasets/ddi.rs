use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use itertools::Itertools;
use polars::prelude::*;
use regex::Regex;
use tracing::info;

use super::traits::{Dataset, EdgeDirection, RandomSplit};
use super::utils::{download_and_extract, CompressionFormat};
use crate::nn::utils::dense_adjacency;
use crate::utils::mask_to_index;

/// Interaction list under `root/raw`: one `drug_a drug_b [extra ...]` record per line.
pub const EDGES_FILE: &str = "ddi.edges";
/// Optional node features under `root/raw`: `drug f1 f2 ...` per line.
pub const FEATURES_FILE: &str = "ddi.features";

#[derive(Debug, Clone)]
pub struct DdiBatch {
    pub xs: Tensor,
    /// Dense adjacency built from the masked edges only.
    pub adj: Tensor,
    pub edge_index: Tensor,
    /// Positions in `edge_index` of the masked edges.
    pub mask: Tensor,
}

/// Drug-drug interaction graph.
///
/// Both directions of one interaction record share a `pair` id, so random
/// splits never separate them.
#[derive(Debug, Clone)]
pub struct DdiDataset {
    pub num_features: usize,
    num_pairs: usize,
    node_df: DataFrame,
    feature_cols: Vec<String>,
    edge_df: DataFrame,
}

#[derive(Default)]
struct NodeIds {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}
impl NodeIds {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }
}

fn read_records(path: &Path) -> Result<Vec<Vec<String>>> {
    let separator = Regex::new(r"[\s,]+")?;
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
    );
    let mut records = Vec::new();
    for buf in reader.lines() {
        let line = buf?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        records.push(separator.split(line).map(str::to_owned).collect_vec());
    }
    Ok(records)
}

impl DdiDataset {
    /// Loads `root`, downloading and extracting `url` into `root/raw` first if needed.
    pub fn new<P: AsRef<Path>>(root: P, url: &str, format: CompressionFormat) -> Result<Self> {
        let root = root.as_ref();
        if !root.join("raw").join(EDGES_FILE).exists() {
            Self::download(root, url, format)?;
        }
        Self::load(root, EdgeDirection::default())
    }

    pub fn download<P: AsRef<Path>>(root: P, url: &str, format: CompressionFormat) -> Result<()> {
        let path = root.as_ref().join("raw");
        std::fs::create_dir_all(&path)?;
        info!(url, path = %path.display(), "fetching DDI dataset");
        download_and_extract(url, &path, format)
    }

    pub fn load<P: AsRef<Path>>(root: P, edge_direction: EdgeDirection) -> Result<Self> {
        let raw = root.as_ref().join("raw");
        let mut nodes = NodeIds::default();

        // read interactions
        let records = read_records(&raw.join(EDGES_FILE))?;
        let mut source = Vec::new();
        let mut target = Vec::new();
        let mut pair = Vec::new();
        for (p, record) in records.iter().enumerate() {
            if record.len() < 2 {
                bail!("{EDGES_FILE}: record {} has fewer than two drugs", p + 1);
            }
            let u = nodes.intern(&record[0]);
            let v = nodes.intern(&record[1]);
            if edge_direction.has_forward_edges() {
                source.push(u);
                target.push(v);
                pair.push(p as u32);
            }
            if edge_direction.has_reverse_edges() && (u != v || !edge_direction.has_forward_edges()) {
                source.push(v);
                target.push(u);
                pair.push(p as u32);
            }
        }
        let num_edges = source.len();
        let edge_df = df! {
            "source" => source,
            "target" => target,
            "pair" => pair,
            "mask" => vec![true; num_edges],
        }?;

        // read features, identity when absent
        let features_path = raw.join(FEATURES_FILE);
        let columns = if features_path.exists() {
            let mut rows = HashMap::new();
            for record in read_records(&features_path)? {
                let (name, values) = record
                    .split_first()
                    .context("empty feature record")?;
                let values = values
                    .iter()
                    .map(|x| x.parse::<f32>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .with_context(|| format!("{FEATURES_FILE}: bad value for drug {name}"))?;
                rows.insert(nodes.intern(name), values);
            }
            let num_nodes = nodes.names.len();
            let num_features = rows.values().map(Vec::len).max().unwrap_or(0);
            let mut columns = vec![Vec::with_capacity(num_nodes); num_features];
            for (id, name) in nodes.names.iter().enumerate() {
                let row = rows
                    .get(&(id as u32))
                    .with_context(|| format!("{FEATURES_FILE}: no features for drug {name}"))?;
                if row.len() != num_features {
                    bail!(
                        "{FEATURES_FILE}: drug {name} has {} features, expected {num_features}",
                        row.len()
                    );
                }
                for (column, &x) in columns.iter_mut().zip(row) {
                    column.push(x);
                }
            }
            columns
        } else {
            let num_nodes = nodes.names.len();
            (0..num_nodes)
                .map(|i| (0..num_nodes).map(|j| if i == j { 1.0 } else { 0.0 }).collect_vec())
                .collect_vec()
        };

        let num_nodes = nodes.names.len();
        let mut node_df = df! {
            "id" => (0..num_nodes as u32).collect_vec(),
            "name" => nodes.names,
        }?;
        let mut feature_cols = Vec::new();
        for (i, x) in columns.into_iter().enumerate() {
            let name = format!("xs[{}]", i);
            node_df.with_column(Series::from_vec(&name, x))?;
            feature_cols.push(name);
        }
        info!(
            num_nodes,
            num_edges,
            num_features = feature_cols.len(),
            "loaded DDI dataset"
        );
        Ok(Self {
            num_features: feature_cols.len(),
            num_pairs: records.len(),
            node_df,
            feature_cols,
            edge_df,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_df.height()
    }
    pub fn num_edges(&self) -> usize {
        self.edge_df.height()
    }
    /// Drug identifiers in node-id order.
    pub fn node_names(&self) -> Result<Vec<String>> {
        Ok(self.node_df["name"]
            .str()?
            .into_no_null_iter()
            .map(str::to_owned)
            .collect())
    }
    pub fn node_df(&self) -> &DataFrame {
        &self.node_df
    }
    pub fn edge_df(&self) -> &DataFrame {
        &self.edge_df
    }
}

impl<const N: usize> RandomSplit<[f32; N]> for DdiDataset {
    type Output = [DdiDataset; N];
    fn random_split(&self, ratio: [f32; N]) -> Result<Self::Output> {
        let score = Float32Chunked::rand_uniform("rand", self.num_pairs, 0.0, 1.0)
            .into_no_null_iter()
            .collect_vec();
        let pair = self.edge_df["pair"].u32()?.into_no_null_iter().collect_vec();
        let mask = self.edge_df["mask"].bool()?.into_no_null_iter().collect_vec();

        let mut cumsum = 0.0;
        let mut result = Vec::with_capacity(N);
        for f in ratio.into_iter() {
            let (lo, hi) = (cumsum, cumsum + f);
            cumsum = hi;
            let split_mask = pair
                .iter()
                .zip(&mask)
                .map(|(&p, &m)| {
                    let s = score[p as usize];
                    m && s >= lo && s < hi
                })
                .collect_vec();

            let mut edge_df = self.edge_df.clone();
            edge_df.replace_or_add("mask", Series::new("mask", split_mask))?;
            result.push(Self {
                edge_df,
                ..self.clone()
            });
        }
        result
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected {N} splits"))
    }
}

impl Dataset for DdiDataset {
    type Batch = DdiBatch;
    type NodeSelector = DataFrame;

    fn all_nodes(&self) -> Result<DataFrame> {
        Ok(self.node_df.select(["id"])?)
    }
    fn induced_subgraph(&self, nodes: DataFrame, device: &Device) -> Result<DdiBatch> {
        let index = nodes.with_row_index("__index", None)?;

        // left join keeps the selector's row order
        let node_df = index.left_join(&self.node_df, ["id"], ["id"])?;
        let num_nodes = node_df.height();
        let mut xs = Vec::with_capacity(num_nodes * self.feature_cols.len());
        for col in node_df.select_series(&self.feature_cols)? {
            xs.extend(col.f32()?.into_no_null_iter());
        }
        let xs = Tensor::from_vec(xs, (self.feature_cols.len(), num_nodes), device)?
            .t()?
            .contiguous()?;

        let edge_df = self
            .edge_df
            .inner_join(&index, ["source"], ["id"])?
            .inner_join(&index, ["target"], ["id"])?;
        let mut edge_index = Vec::with_capacity(2 * edge_df.height());
        edge_index.extend(edge_df["__index"].u32()?.into_no_null_iter());
        edge_index.extend(edge_df["__index_right"].u32()?.into_no_null_iter());
        let edge_index = Tensor::from_vec(edge_index, (2, edge_df.height()), device)?;

        let mask = mask_to_index(&Tensor::from_iter(
            edge_df["mask"].bool()?.into_no_null_iter().map(u8::from),
            device,
        )?)?;
        let visible = if mask.dims1()? == 0 {
            Tensor::zeros((2, 0), DType::U32, device)?
        } else {
            edge_index.index_select(&mask, 1)?
        };
        let adj = dense_adjacency(&visible, num_nodes, device)?;

        Ok(DdiBatch {
            xs,
            adj,
            edge_index,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::FullBatchLoader;

    fn write_raw(files: &[(&str, &str)]) -> Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw)?;
        for (name, content) in files {
            std::fs::write(raw.join(name), content)?;
        }
        Ok(dir)
    }

    fn full_batch(dataset: &DdiDataset) -> Result<DdiBatch> {
        FullBatchLoader::new(dataset, &Device::Cpu)
            .next()
            .context("loader yields one batch")?
    }

    #[test]
    fn loads_edge_list_with_identity_features() -> Result<()> {
        let dir = write_raw(&[(EDGES_FILE, "# drug pairs\nDB01 DB02\nDB02,DB03,major\n\n")])?;
        let dataset = DdiDataset::load(dir.path(), EdgeDirection::Both)?;
        assert_eq!(dataset.num_nodes(), 3);
        assert_eq!(dataset.num_edges(), 4);
        assert_eq!(dataset.num_features, 3);
        assert_eq!(dataset.node_names()?, vec!["DB01", "DB02", "DB03"]);

        let batch = full_batch(&dataset)?;
        assert_eq!(batch.xs.dims(), &[3, 3]);
        assert_eq!(
            batch.xs.to_vec2::<f32>()?,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0]
            ]
        );
        assert_eq!(batch.edge_index.dims(), &[2, 4]);
        assert_eq!(batch.mask.dims(), &[4]);
        assert_eq!(
            batch.adj.to_vec2::<f32>()?,
            vec![
                vec![0.0, 1.0, 0.0],
                vec![1.0, 0.0, 1.0],
                vec![0.0, 1.0, 0.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn new_skips_download_when_raw_files_exist() -> Result<()> {
        let dir = write_raw(&[(EDGES_FILE, "DB01 DB02\nDB02 DB03\n")])?;
        // nothing listens here; reaching the network would fail
        let dataset = DdiDataset::new(dir.path(), "http://127.0.0.1:9/ddi.tgz", CompressionFormat::Tgz)?;
        assert_eq!(dataset.num_nodes(), 3);
        assert_eq!(dataset.num_edges(), 4);
        Ok(())
    }

    #[test]
    fn new_downloads_into_empty_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = DdiDataset::new(dir.path(), "http://127.0.0.1:9/ddi.tgz", CompressionFormat::Tgz);
        assert!(result.is_err());
        // the raw directory is prepared before fetching
        assert!(dir.path().join("raw").is_dir());
        assert!(!dir.path().join("raw").join(EDGES_FILE).exists());
        Ok(())
    }

    #[test]
    fn forward_direction_only() -> Result<()> {
        let dir = write_raw(&[(EDGES_FILE, "a b\nb c\n")])?;
        let dataset = DdiDataset::load(dir.path(), EdgeDirection::Forward)?;
        assert_eq!(dataset.num_edges(), 2);
        let adj = full_batch(&dataset)?.adj.to_vec2::<f32>()?;
        assert_eq!(adj[0][1], 1.0);
        assert_eq!(adj[1][0], 0.0);
        Ok(())
    }

    #[test]
    fn loads_feature_file_in_node_order() -> Result<()> {
        let dir = write_raw(&[
            (EDGES_FILE, "DB02 DB01\n"),
            (FEATURES_FILE, "DB01 0.5 1.0\nDB02 -1 2\nDB09 0 0\n"),
        ])?;
        let dataset = DdiDataset::load(dir.path(), EdgeDirection::Both)?;
        assert_eq!(dataset.num_features, 2);
        // DB09 has no interactions but still is a node
        assert_eq!(dataset.node_names()?, vec!["DB02", "DB01", "DB09"]);

        let batch = full_batch(&dataset)?;
        assert_eq!(
            batch.xs.to_vec2::<f32>()?,
            vec![vec![-1.0, 2.0], vec![0.5, 1.0], vec![0.0, 0.0]]
        );
        Ok(())
    }

    #[test]
    fn missing_features_are_an_error() -> Result<()> {
        let dir = write_raw(&[
            (EDGES_FILE, "DB01 DB02\n"),
            (FEATURES_FILE, "DB01 0.5\n"),
        ])?;
        assert!(DdiDataset::load(dir.path(), EdgeDirection::Both).is_err());
        Ok(())
    }

    #[test]
    fn random_split_keeps_pairs_together() -> Result<()> {
        let edges = (0..20).map(|i| format!("d{} d{}\n", i, i + 1)).join("");
        let dir = write_raw(&[(EDGES_FILE, edges.as_str())])?;
        let dataset = DdiDataset::load(dir.path(), EdgeDirection::Both)?;
        let [train, test] = dataset.random_split([0.7, 0.3])?;

        let train = full_batch(&train)?;
        let test = full_batch(&test)?;
        assert_eq!(train.mask.dims1()? + test.mask.dims1()?, 40);

        for batch in [train, test] {
            let adj = batch.adj.to_vec2::<f32>()?;
            for i in 0..adj.len() {
                for j in 0..adj.len() {
                    assert_eq!(adj[i][j], adj[j][i]);
                }
            }
        }
        Ok(())
    }
}
