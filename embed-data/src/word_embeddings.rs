//! Pre-trained word embeddings keyed by character sequences.
//!
//! Expected layout under `<root>/word2vec/`:
//!
//! * `char_vocab.txt` - one character token per line (line number = index)
//! * `characters_<set>.txt[.gz]` - one word per line, character indices
//! * `embeddings_<set>.tsv[.gz]` - one embedding vector per word

use crate::sequence_iterator::{IterationMode, SequenceSubsetIterator};
use crate::text::TextVocabulary;
use candle_core::{DType, Device, Tensor};
use candle_vae::common_io::{plain_or_gz, read_lines_of_types};
use candle_vae::tensor_io::read_matrix;
use candle_vae::vae_space::Space;
use log::info;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the data root
pub const DATA_PATH_ENV: &str = "EMBED_DATA_PATH";

const UNKNOWN_INDEX: usize = 0;
const DEFAULT_SEED: u64 = 42;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WhichSet {
    Train,
    Valid,
}

impl WhichSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhichSet::Train => "train",
            WhichSet::Valid => "valid",
        }
    }
}

impl FromStr for WhichSet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "train" => Ok(WhichSet::Train),
            "valid" => Ok(WhichSet::Valid),
            _ => Err(anyhow::anyhow!(
                "which_set must be `train` or `valid`, got `{}`",
                s
            )),
        }
    }
}

/// One minibatch of the dataset
pub struct EmbeddingBatch {
    /// character indices (batch, time, 1), u32
    pub features: Tensor,
    /// embedding vectors (batch, dim), f32
    pub targets: Tensor,
}

pub struct WordEmbeddings {
    which_set: WhichSet,
    vocabulary: TextVocabulary,
    sequences: Vec<Vec<u32>>,
    embeddings: Tensor,
    seed: u64,
}

fn locate(dir: &Path, name: &str) -> anyhow::Result<String> {
    let path = plain_or_gz(&dir.join(name))
        .ok_or_else(|| anyhow::anyhow!("missing {} (or .gz) in {}", name, dir.display()))?;
    path.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("invalid path {}", path.display()))
}

impl WordEmbeddings {
    /// Load `which_set` from the root named by `EMBED_DATA_PATH`
    pub fn new(which_set: &str) -> anyhow::Result<Self> {
        let root = std::env::var(DATA_PATH_ENV)
            .map_err(|_| anyhow::anyhow!("set {} to the data root", DATA_PATH_ENV))?;
        Self::from_root(Path::new(&root), which_set)
    }

    /// Load `which_set` ("train" or "valid") from `<root>/word2vec/`
    pub fn from_root(root: &Path, which_set: &str) -> anyhow::Result<Self> {
        let which_set = WhichSet::from_str(which_set)?;
        let dir: PathBuf = root.join("word2vec");
        let set = which_set.as_str();

        let vocab_file = locate(&dir, "char_vocab.txt")?;
        let vocabulary = TextVocabulary::from_file(&vocab_file, UNKNOWN_INDEX, true)?;

        let char_file = locate(&dir, &format!("characters_{}.txt", set))?;
        let sequences = read_lines_of_types::<u32>(&char_file, &[], 0)?;

        if let Some((i, c)) = sequences.iter().enumerate().find_map(|(i, s)| {
            s.iter()
                .find(|&&c| c as usize >= vocabulary.len())
                .map(|&c| (i, c))
        }) {
            return Err(anyhow::anyhow!(
                "{}: word {} has character index {} beyond the vocabulary ({})",
                char_file,
                i + 1,
                c,
                vocabulary.len()
            ));
        }

        let emb_file = locate(&dir, &format!("embeddings_{}.tsv", set))?;
        let embeddings = read_matrix(&emb_file, 0)?.to_dtype(DType::F32)?;

        if embeddings.dim(0)? != sequences.len() {
            return Err(anyhow::anyhow!(
                "{} words but {} embeddings",
                sequences.len(),
                embeddings.dim(0)?
            ));
        }

        info!(
            "word embeddings [{}]: {} words, {} characters, dim = {}",
            set,
            sequences.len(),
            vocabulary.len(),
            embeddings.dim(1)?
        );

        Ok(Self {
            which_set,
            vocabulary,
            sequences,
            embeddings,
            seed: DEFAULT_SEED,
        })
    }

    /// default seed of shuffled iteration
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn which_set(&self) -> WhichSet {
        self.which_set
    }

    pub fn vocabulary(&self) -> &TextVocabulary {
        &self.vocabulary
    }

    pub fn num_examples(&self) -> usize {
        self.sequences.len()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embeddings.dims().get(1).copied().unwrap_or(0)
    }

    pub fn sequence_lengths(&self) -> Vec<usize> {
        self.sequences.iter().map(|s| s.len()).collect()
    }

    /// spaces and source names of (features, targets)
    pub fn data_specs(&self) -> ((Space, Space), (&'static str, &'static str)) {
        (
            (
                Space::sequence(Space::Index {
                    dim: 1,
                    max_labels: self.vocabulary.len(),
                }),
                Space::Vector {
                    dim: self.embedding_dim(),
                },
            ),
            ("features", "targets"),
        )
    }

    /// Gather a batch of equal-length sequences
    pub fn batch(&self, indices: &[usize], device: &Device) -> anyhow::Result<EmbeddingBatch> {
        let first = indices
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty batch"))?;
        let ntime = self
            .sequences
            .get(*first)
            .ok_or_else(|| anyhow::anyhow!("index {} out of range", first))?
            .len();

        let mut chars = Vec::with_capacity(indices.len() * ntime);
        for &i in indices {
            let seq = self
                .sequences
                .get(i)
                .ok_or_else(|| anyhow::anyhow!("index {} out of range", i))?;
            if seq.len() != ntime {
                return Err(anyhow::anyhow!(
                    "sequences of different lengths ({} vs. {}) in one batch",
                    ntime,
                    seq.len()
                ));
            }
            chars.extend_from_slice(seq);
        }

        let features = Tensor::from_vec(chars, (indices.len(), ntime, 1), device)?;
        let rows: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
        let rows = Tensor::from_vec(rows, indices.len(), self.embeddings.device())?;
        let targets = self.embeddings.index_select(&rows, 0)?.to_device(device)?;

        Ok(EmbeddingBatch { features, targets })
    }

    ///
    /// Iterate over minibatches of equal-length words
    ///
    /// * `mode` - `sequential` or `shuffled_sequential` (default)
    /// * `batch_size` - maximum words per batch
    /// * `num_batches` - stop after this many batches
    /// * `seed` - shuffling seed; the dataset's seed if `None`
    ///
    pub fn iterator<'a>(
        &'a self,
        mode: Option<&str>,
        batch_size: usize,
        num_batches: Option<usize>,
        seed: Option<u64>,
        device: &Device,
    ) -> anyhow::Result<WordEmbeddingsIter<'a>> {
        let mode = match mode {
            Some(m) => IterationMode::from_str(m)?,
            None => IterationMode::default(),
        };
        let subsets = SequenceSubsetIterator::new(
            &self.sequence_lengths(),
            batch_size,
            num_batches,
            mode,
            seed.unwrap_or(self.seed),
        )?;
        Ok(WordEmbeddingsIter {
            data: self,
            subsets,
            device: device.clone(),
        })
    }
}

pub struct WordEmbeddingsIter<'a> {
    data: &'a WordEmbeddings,
    subsets: SequenceSubsetIterator,
    device: Device,
}

impl WordEmbeddingsIter<'_> {
    pub fn num_batches(&self) -> usize {
        self.subsets.num_batches()
    }
}

impl Iterator for WordEmbeddingsIter<'_> {
    type Item = anyhow::Result<EmbeddingBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.subsets.next()?;
        Some(self.data.batch(&indices, &self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_set_parsing() {
        assert_eq!("train".parse::<WhichSet>().ok(), Some(WhichSet::Train));
        assert_eq!("valid".parse::<WhichSet>().ok(), Some(WhichSet::Valid));
        assert!("test".parse::<WhichSet>().is_err());
    }
}
