pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_vae_inference;
pub mod cli;
pub mod common_io;
pub mod sequence_adapter;
pub mod tensor_io;
pub mod vae_binding;
pub mod vae_criterion;
pub mod vae_error;
pub mod vae_kl;
pub mod vae_latent;
pub mod vae_model;
pub mod vae_params;
pub mod vae_posterior;
pub mod vae_prior;
pub mod vae_space;
pub mod vae_visible;

pub use candle_core;
pub use candle_nn;
