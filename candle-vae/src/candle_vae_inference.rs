use crate::candle_data_loader::DataLoader;
use crate::candle_inference::TrainConfig;
use crate::vae_criterion::CriterionT;
use crate::vae_model::Vae;

use candle_core::Tensor;
use candle_nn::AdamW;
use candle_nn::Optimizer;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use std::collections::BTreeMap;

pub trait VaeTrainT {
    /// Train the VAE model by minimizing `criterion`
    /// * `data` - data loader should have `minibatch_data`
    /// * `criterion` - training objective
    /// * `train_config` - training configuration
    ///
    /// Returns the average loss of each epoch
    fn train_criterion<DataL, Crit>(
        &self,
        data: &mut DataL,
        criterion: &Crit,
        train_config: &TrainConfig,
    ) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader,
        Crit: CriterionT;
}

impl VaeTrainT for Vae {
    fn train_criterion<DataL, Crit>(
        &self,
        data: &mut DataL,
        criterion: &Crit,
        train_config: &TrainConfig,
    ) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader,
        Crit: CriterionT,
    {
        let device = &train_config.device;
        let mut adam = AdamW::new_lr(self.all_vars(), train_config.learning_rate.into())?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut loss_trace = vec![];

        data.shuffle_minibatch(train_config.batch_size)?;

        let num_minibatches = data.num_minibatch();
        if num_minibatches == 0 {
            return Err(anyhow::anyhow!("no minibatch to train on"));
        }

        let data_vec = (0..num_minibatches)
            .map(|b| data.minibatch_data(b, device))
            .collect::<anyhow::Result<Vec<_>>>()?;

        for epoch in 0..train_config.num_epochs {
            let mut loss_tot = 0f32;
            let mut channel_tot: BTreeMap<String, f32> = BTreeMap::new();

            for x_nd in data_vec.iter() {
                let (loss, channels) = criterion.evaluate(self, x_nd)?;
                adam.backward_step(&loss)?;
                loss_tot += scalar(&loss)?;

                if train_config.verbose {
                    for (k, v) in channels {
                        *channel_tot.entry(k).or_default() += scalar(&v)?;
                    }
                }
            }
            loss_trace.push(loss_tot / num_minibatches as f32);
            pb.inc(1);

            if train_config.verbose {
                let summary = channel_tot
                    .iter()
                    .map(|(k, v)| format!("{} = {:.4}", k, v / num_minibatches as f32))
                    .collect::<Vec<_>>()
                    .join(", ");
                info!(
                    "[{}] loss: {} {}",
                    epoch + 1,
                    loss_trace.last().ok_or(anyhow::anyhow!("loss"))?,
                    summary
                );
            }
        } // each epoch

        pb.finish_and_clear();
        Ok(loss_trace)
    }
}

fn scalar(x: &Tensor) -> candle_core::Result<f32> {
    x.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()
}
