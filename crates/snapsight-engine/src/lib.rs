pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod intake;

pub use config::GatewayConfig;
pub use controller::{Controller, Outcome};
pub use error::GatewayError;
pub use gateway::{
    default_gateway_registry, Analysis, AnalysisGateway, DryrunGateway, GatewayRegistry,
    OpenAiGateway,
};
