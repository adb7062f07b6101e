pub mod client_factory;
pub mod token_provider;

pub use client_factory::RemoteClientFactory;
pub use token_provider::TokenProvider;
