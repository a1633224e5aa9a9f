use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Order in which minibatches of sequences are visited
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IterationMode {
    /// shortest sequences first, original order within a length
    Sequential,
    /// shuffled within each length, then batch order shuffled
    #[default]
    ShuffledSequential,
}

impl FromStr for IterationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "shuffled_sequential" => Ok(Self::ShuffledSequential),
            _ => Err(anyhow::anyhow!(
                "for sequential datasets only `sequential` and `shuffled_sequential` \
                 are supported, so the mode `{}` is not",
                s
            )),
        }
    }
}

///
/// Minibatch indexes over variable-length sequences. Every batch
/// holds sequences of one length only, so a batch stacks into a
/// dense `(batch, time, ...)` tensor.
///
pub struct SequenceSubsetIterator {
    batches: std::vec::IntoIter<Vec<usize>>,
    num_batches: usize,
}

impl SequenceSubsetIterator {
    /// * `sequence_lengths` - length of each example
    /// * `batch_size` - maximum examples per batch
    /// * `num_batches` - stop after this many batches
    /// * `mode` - visiting order
    /// * `seed` - shuffling seed (unused in sequential mode)
    pub fn new(
        sequence_lengths: &[usize],
        batch_size: usize,
        num_batches: Option<usize>,
        mode: IterationMode,
        seed: u64,
    ) -> anyhow::Result<Self> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }

        let mut by_length: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &len) in sequence_lengths.iter().enumerate() {
            by_length.entry(len).or_default().push(i);
        }

        let mut rng = StdRng::seed_from_u64(seed);

        let mut batches: Vec<Vec<usize>> = vec![];
        for (_, mut samples) in by_length {
            if mode == IterationMode::ShuffledSequential {
                samples.shuffle(&mut rng);
            }
            batches.extend(samples.chunks(batch_size).map(|c| c.to_vec()));
        }

        if mode == IterationMode::ShuffledSequential {
            batches.shuffle(&mut rng);
        }

        if let Some(n) = num_batches {
            batches.truncate(n);
        }

        let num_batches = batches.len();
        Ok(Self {
            batches: batches.into_iter(),
            num_batches,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

impl Iterator for SequenceSubsetIterator {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches.next()
    }
}
