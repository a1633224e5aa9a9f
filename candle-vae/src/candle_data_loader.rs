use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(&self, batch_idx: usize, target_device: &Device) -> anyhow::Result<Tensor>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory 2d matrix.  Each row will be
/// considered as a feature vector. The number of samples is the
/// number of rows.
///
pub struct InMemoryData {
    input_data: Vec<Tensor>,
    shuffled_input_data: Option<Vec<Tensor>>,
    minibatches: Minibatches,
}

impl InMemoryData {
    ///
    /// Create a data loader with the main data tensor `data`;
    /// `seed` fixes the order of the shuffled minibatches
    ///
    pub fn new<D>(data: &D, seed: u64) -> anyhow::Result<Self>
    where
        D: RowsToTensorVec,
    {
        let data = data.rows_to_tensor_vec()?;
        let rows = (0..data.len()).collect();

        Ok(InMemoryData {
            input_data: data,
            shuffled_input_data: None,
            minibatches: Minibatches::new(rows, seed),
        })
    }

    pub fn num_rows(&self) -> usize {
        self.input_data.len()
    }
}

impl DataLoader for InMemoryData {
    fn minibatch_data(&self, batch_idx: usize, target_device: &Device) -> anyhow::Result<Tensor> {
        let data_vec = self
            .shuffled_input_data
            .as_ref()
            .ok_or(anyhow::anyhow!("need to shuffle data"))?;

        if data_vec.len() <= batch_idx {
            return Err(anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                data_vec.len()
            ));
        }
        Ok(data_vec[batch_idx].to_device(target_device)?)
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        /////////////////////
        // shuffle indexes //
        /////////////////////

        self.minibatches.shuffle_minibatch(batch_size)?;

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let input_data = &self.input_data;
        let shuffled = self
            .minibatches
            .chunks
            .par_iter()
            .map(|samples| {
                let chunk: Vec<Tensor> = samples.iter().map(|&i| input_data[i].clone()).collect();
                Tensor::cat(&chunk, 0)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        self.shuffled_input_data = Some(shuffled);
        Ok(())
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    rng: StdRng,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(samples: Vec<usize>, seed: u64) -> Self {
        Self {
            samples,
            rng: StdRng::seed_from_u64(seed),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        self.samples.shuffle(&mut self.rng);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
        Ok(())
    }
}

///
/// Convert rows of a matrix to a vector of `Tensor`
///
pub trait RowsToTensorVec {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>>;
}

impl RowsToTensorVec for Tensor {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        (0..self.dim(0)?).map(|i| self.narrow(0, i, 1)).collect()
    }
}
