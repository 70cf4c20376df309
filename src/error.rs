use thiserror::Error;

use crate::dtype::DType;

#[derive(Debug, Error)]
pub enum ConvError {
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("unsupported dtype {dtype} for {role}")]
    InvalidDType { role: &'static str, dtype: DType },
    #[error("no algorithm available for {operator} with {problem}")]
    NoAlgorithm {
        operator: &'static str,
        problem: String,
    },
    #[error("algorithm {0} is not registered")]
    AlgorithmNotFound(String),
    #[error("workspace too small: need {required} bytes, got {provided}")]
    WorkspaceTooSmall { required: usize, provided: usize },
    #[error("tensor {role} too small: need {required} elements, got {provided}")]
    TensorTooSmall {
        role: &'static str,
        required: usize,
        provided: usize,
    },
    #[error("invalid algorithm override: {0}")]
    InvalidOverride(String),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("device error: {0}")]
    Device(String),
}

pub type ConvResult<T> = Result<T, ConvError>;

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for ConvError {
    fn from(err: cudarc::driver::DriverError) -> Self {
        ConvError::Device(format!("{err:?}"))
    }
}
