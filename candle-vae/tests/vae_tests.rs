use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};
use candle_vae::candle_data_loader::InMemoryData;
use candle_vae::candle_inference::TrainConfig;
use candle_vae::candle_vae_inference::VaeTrainT;
use candle_vae::vae_criterion::{CriterionT, ImportanceSamplingCriterion, VaeCriterion};
use candle_vae::vae_error::{Result, VaeError};
use candle_vae::vae_latent::Latent;
use candle_vae::vae_model::{Vae, VaeConfig};
use candle_vae::vae_posterior::PosteriorConfig;
use candle_vae::vae_visible::{BernoulliVisible, GaussianVisible, VisibleConfig, VisibleT};

const NVIS: usize = 8;
const NHID: usize = 3;

fn posterior_config() -> PosteriorConfig {
    PosteriorConfig {
        layers: vec![16],
        ..Default::default()
    }
}

fn visible_config() -> VisibleConfig {
    VisibleConfig {
        layers: vec![16],
        ..Default::default()
    }
}

fn bernoulli_vae(seed: u64) -> Result<Vae> {
    let mut config = VaeConfig::new(NVIS, NHID);
    config.seed = seed;
    Vae::new(
        config,
        Box::new(BernoulliVisible::new(visible_config())),
        Latent::diagonal_gaussian(true, posterior_config())?,
    )
}

/// rows alternate between two binary patterns
fn binary_data(nrows: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..nrows)
        .flat_map(|i| (0..NVIS).map(move |j| ((i + j) % 2) as f32))
        .collect();
    Ok(Tensor::from_vec(data, (nrows, NVIS), &Device::Cpu)?)
}

fn scalar(x: &Tensor) -> Result<f32> {
    Ok(x.to_scalar::<f32>()?)
}

#[test]
fn lower_bound_matches_criterion_channels() -> Result<()> {
    let x = binary_data(5)?;

    let vae_a = bernoulli_vae(17)?;
    let terms = vae_a.log_likelihood_lower_bound_terms(&x, 3)?;
    let lb = terms.lower_bound()?;

    let vae_b = bernoulli_vae(17)?;
    let criterion = VaeCriterion::new(3)?;
    let (loss, channels) = criterion.evaluate(&vae_b, &x)?;

    let kl = scalar(&terms.kl.mean_all()?)?;
    let ex = scalar(&terms.expectation.mean_all()?)?;
    assert_abs_diff_eq!(scalar(&channels["kl_divergence"])?, kl, epsilon = 1e-5);
    assert_abs_diff_eq!(scalar(&channels["expectation_term"])?, ex, epsilon = 1e-5);
    assert_abs_diff_eq!(scalar(&loss)?, kl - ex, epsilon = 1e-5);
    assert_abs_diff_eq!(scalar(&lb.mean_all()?)?, ex - kl, epsilon = 1e-5);
    Ok(())
}

#[test]
fn single_sample_importance_estimate() -> Result<()> {
    let vae = bernoulli_vae(5)?;
    let x = binary_data(4)?;
    let eps = vae.sample_epsilon(1, 4)?;
    let approx = vae
        .log_likelihood_approximation_with_epsilon(&x, &eps)?
        .to_vec1::<f32>()?;

    let latent = vae.latent();
    let phi = latent.encode_phi(&x)?;
    let z = latent.sample_from_q_z_given_x(&eps, &phi)?;
    let theta = vae.visible().decode_theta(&z.squeeze(0)?)?;
    let log_p_x_z = vae.visible().log_p_x_given_z(&x, &theta)?;
    let log_p_z = latent.log_p_z(&z)?.squeeze(0)?;
    let log_q_z_x = latent.log_q_z_given_x(&z, &phi)?.squeeze(0)?;
    let manual = ((log_p_z + log_p_x_z)? - log_q_z_x)?.to_vec1::<f32>()?;

    assert_eq!(approx.len(), 4);
    for (a, m) in approx.iter().zip(manual.iter()) {
        assert_abs_diff_eq!(*a, *m, epsilon = 1e-4);
    }
    Ok(())
}

#[test]
fn reconstruction_noise() -> Result<()> {
    let x = binary_data(3)?;
    let vae = bernoulli_vae(21)?;

    let (_, m1) = vae.reconstruct(&x, false)?;
    let (_, m2) = vae.reconstruct(&x, false)?;
    assert_eq!(m1.to_vec2::<f32>()?, m2.to_vec2::<f32>()?);

    let (_, n1) = vae.reconstruct(&x, true)?;
    let (_, n2) = vae.reconstruct(&x, true)?;
    assert_ne!(n1.to_vec2::<f32>()?, n2.to_vec2::<f32>()?);

    // same seed, same noisy reconstruction
    let (_, a) = bernoulli_vae(33)?.reconstruct(&x, true)?;
    let (_, b) = bernoulli_vae(33)?.reconstruct(&x, true)?;
    let (_, c) = bernoulli_vae(34)?.reconstruct(&x, true)?;
    assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
    assert_ne!(a.to_vec2::<f32>()?, c.to_vec2::<f32>()?);
    Ok(())
}

#[test]
fn duplicate_parameter_names_rejected() -> Result<()> {
    let ret = Vae::new(
        VaeConfig::new(NVIS, NHID),
        Box::new(BernoulliVisible::new(VisibleConfig {
            name: "net".into(),
            ..visible_config()
        })),
        Latent::diagonal_gaussian(
            true,
            PosteriorConfig {
                name: "net".into(),
                ..posterior_config()
            },
        )?,
    );
    match ret {
        Err(VaeError::DuplicateParameter(name)) => assert!(name.starts_with("net.fc.0")),
        _ => panic!("expected a duplicate parameter error"),
    }
    Ok(())
}

#[test]
fn bound_components_cannot_be_reused() -> Result<()> {
    let (visible, latent) = bernoulli_vae(1)?.into_parts();
    assert!(visible.is_bound() && latent.is_bound());
    let ret = Vae::new(VaeConfig::new(NVIS, NHID), visible, latent);
    assert!(matches!(ret, Err(VaeError::AlreadyBound(_))));
    Ok(())
}

#[test]
fn criteria_need_samples() {
    assert!(matches!(
        VaeCriterion::new(0),
        Err(VaeError::InvalidNumSamples(0))
    ));
    assert!(matches!(
        ImportanceSamplingCriterion::new(0),
        Err(VaeError::InvalidNumSamples(0))
    ));
}

#[test]
fn criterion_validates_data_space() -> Result<()> {
    let vae = bernoulli_vae(2)?;
    let x = Tensor::zeros((4, NVIS + 1), DType::F32, &Device::Cpu)?;
    let criterion = ImportanceSamplingCriterion::new(2)?;
    assert!(matches!(
        criterion.expr(&vae, &x),
        Err(VaeError::InvalidShape { .. })
    ));
    Ok(())
}

#[test]
fn gaussian_vae_estimates_are_finite() -> Result<()> {
    let vae = Vae::new(
        VaeConfig::new(NVIS, NHID),
        Box::new(GaussianVisible::new(visible_config())),
        Latent::diagonal_gaussian(false, posterior_config())?,
    )?;
    let x = (binary_data(4)? * 2.5)?;
    let is = vae.log_likelihood_approximation(&x, 10)?.to_vec1::<f32>()?;
    let lb = vae.log_likelihood_lower_bound(&x, 10)?.to_vec1::<f32>()?;
    assert!(is.iter().chain(lb.iter()).all(|v| v.is_finite()));
    assert_eq!(vae.encoding_params().len(), 2);
    assert_eq!(vae.decoding_params().len(), 1);
    Ok(())
}

#[test]
fn training_reduces_loss() -> anyhow::Result<()> {
    let vae = bernoulli_vae(3)?;
    let x = binary_data(40)?;
    let mut data = InMemoryData::new(&x, 3)?;
    let train_config = TrainConfig {
        learning_rate: 1e-2,
        batch_size: 10,
        num_epochs: 30,
        device: Device::Cpu,
        verbose: false,
        show_progress: false,
    };
    let trace = vae.train_criterion(&mut data, &VaeCriterion::new(1)?, &train_config)?;
    assert_eq!(trace.len(), 30);
    let first = trace[0];
    let last = trace[trace.len() - 1];
    assert!(last < first, "loss went from {} to {}", first, last);
    Ok(())
}
