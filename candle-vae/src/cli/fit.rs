use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::Activation;
use clap::{Args, ValueEnum};
use log::info;
use std::path::PathBuf;

use crate::candle_data_loader::InMemoryData;
use crate::candle_inference::TrainConfig;
use crate::candle_vae_inference::VaeTrainT;
use crate::common_io::{mkdir, write_lines};
use crate::tensor_io::{read_matrix, IoOps};
use crate::vae_criterion::{CriterionT, ImportanceSamplingCriterion, VaeCriterion};
use crate::vae_latent::Latent;
use crate::vae_model::{Vae, VaeConfig};
use crate::vae_posterior::PosteriorConfig;
use crate::vae_visible::{BernoulliVisible, GaussianVisible, VisibleConfig, VisibleT};

#[derive(Clone, Debug, ValueEnum)]
pub enum VisibleType {
    /// binary data: x ~ Bernoulli(sigmoid(f(z)))
    Bernoulli,
    /// real-valued data: x ~ N(mu(z), sigma(z)^2)
    Gaussian,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum CriterionType {
    /// variational lower bound
    Vae,
    /// importance-sampling log-likelihood estimate
    Importance,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(help = "Data matrix (rows = samples), .tsv/.csv, optionally .gz")]
    pub data: PathBuf,

    #[arg(long, default_value = "0", help = "Number of header lines to skip")]
    pub skip: usize,

    #[arg(long, default_value = "10", help = "Latent dimension")]
    pub nhid: usize,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "128",
        help = "Encoder hidden layers"
    )]
    pub encoder_layers: Vec<usize>,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "128",
        help = "Decoder hidden layers"
    )]
    pub decoder_layers: Vec<usize>,

    #[arg(short, long, default_value = "bernoulli")]
    pub visible: VisibleType,

    #[arg(short, long, default_value = "vae")]
    pub criterion: CriterionType,

    #[arg(long, default_value = "1", help = "Posterior samples per example")]
    pub num_samples: usize,

    #[arg(long, default_value = "100")]
    pub epochs: usize,

    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.001")]
    pub learning_rate: f32,

    #[arg(long, default_value = "2043")]
    pub seed: u64,

    #[arg(long, help = "Keep the prior fixed at N(0, I)")]
    pub fixed_prior: bool,

    #[arg(long, default_value = "100", help = "Number of samples to generate")]
    pub num_generate: usize,

    #[arg(
        long,
        default_value = "100",
        help = "Importance samples for the final log-likelihood"
    )]
    pub importance_samples: usize,

    #[arg(
        short,
        long,
        help = "Output prefix ({out}.loss.tsv, {out}.latent.tsv, ...)"
    )]
    pub out: PathBuf,

    #[arg(long)]
    pub gpu: bool,

    #[arg(long)]
    pub verbose: bool,
}

fn output_file(prefix: &std::path::Path, suffix: &str) -> Result<String> {
    let p = prefix
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid output path"))?;
    Ok(format!("{}.{}", p, suffix))
}

fn build_visible(args: &FitArgs) -> Box<dyn VisibleT> {
    let config = VisibleConfig {
        name: "dec".into(),
        layers: args.decoder_layers.clone(),
        activation: Activation::Relu,
        ..Default::default()
    };
    match args.visible {
        VisibleType::Bernoulli => Box::new(BernoulliVisible::new(config)),
        VisibleType::Gaussian => Box::new(GaussianVisible::new(config)),
    }
}

fn train_with<C: CriterionT>(
    vae: &Vae,
    data: &mut InMemoryData,
    criterion: &C,
    train_config: &TrainConfig,
) -> Result<Vec<f32>> {
    vae.train_criterion(data, criterion, train_config)
}

pub fn run(args: &FitArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(target_os = "macos"))]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    let data_file = args
        .data
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid data path"))?;
    info!("Loading data from {}", data_file);
    let x_nd = read_matrix(data_file, args.skip)?;
    let (nrows, nvis) = x_nd.dims2()?;
    info!("  data shape: {} x {}", nrows, nvis);

    let mut vae_config = VaeConfig::new(nvis, args.nhid);
    vae_config.batch_size = Some(args.batch_size);
    vae_config.seed = args.seed;
    vae_config.dtype = DType::F32;
    vae_config.device = device.clone();

    let latent = Latent::diagonal_gaussian(
        !args.fixed_prior,
        PosteriorConfig {
            name: "enc".into(),
            layers: args.encoder_layers.clone(),
            ..Default::default()
        },
    )?;
    let vae = Vae::new(vae_config, build_visible(args), latent)?;

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut data = InMemoryData::new(&x_nd, args.seed)?;

    info!("Training for {} epochs", args.epochs);
    let loss_trace = match args.criterion {
        CriterionType::Vae => train_with(
            &vae,
            &mut data,
            &VaeCriterion::new(args.num_samples)?,
            &train_config,
        )?,
        CriterionType::Importance => train_with(
            &vae,
            &mut data,
            &ImportanceSamplingCriterion::new(args.num_samples)?,
            &train_config,
        )?,
    };

    let loss_file = output_file(&args.out, "loss.tsv")?;
    mkdir(&loss_file)?;
    write_lines(&loss_trace, &loss_file)?;
    info!("Saved loss trace to {}", loss_file);

    let x_dev = x_nd.to_device(&device)?;

    let latent_file = output_file(&args.out, "latent.tsv")?;
    vae.encode_mean(&x_dev)?.to_tsv(&latent_file)?;
    info!("Saved posterior means to {}", latent_file);

    let (_, recon_means) = vae.reconstruct(&x_dev, false)?;
    let recon_file = output_file(&args.out, "recon.tsv")?;
    recon_means.to_tsv(&recon_file)?;
    info!("Saved reconstructions to {}", recon_file);

    if args.num_generate > 0 {
        let (samples, _) = vae.sample(args.num_generate)?;
        let sample_file = output_file(&args.out, "samples.tsv")?;
        samples.to_tsv(&sample_file)?;
        info!("Saved {} samples to {}", args.num_generate, sample_file);
    }

    let llik = vae
        .log_likelihood_approximation(&x_dev, args.importance_samples.max(1))?
        .to_dtype(DType::F32)?;
    let llik_mean = llik.mean_all()?.to_scalar::<f32>()?;
    let llik_file = output_file(&args.out, "llik.tsv")?;
    llik.unsqueeze(1)?.to_tsv(&llik_file)?;
    info!(
        "Importance-sampling log-likelihood: {:.4} (mean)",
        llik_mean
    );

    Ok(())
}
