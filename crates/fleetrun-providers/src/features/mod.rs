pub mod aws;
pub mod gcp;
