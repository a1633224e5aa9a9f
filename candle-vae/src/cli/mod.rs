pub mod fit;

use clap::{Parser, Subcommand};

pub use fit::{CriterionType, FitArgs, VisibleType};

#[derive(Parser)]
#[command(name = "candle-vae")]
#[command(about = "Variational autoencoders on candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a VAE to a delimited data matrix
    Fit(FitArgs),
}
