//! Compute device selection for inference sessions.
//!
//! A device is fixed once per predictor. Parsing accepts the `cpu`, `cuda`
//! and `cuda:N` spellings; automatic selection prefers the first available
//! accelerator and falls back to the CPU.

use ort::execution_providers::ExecutionProviderDispatch;

use crate::core::errors::{SegError, SegResult};

/// A compute device an inference session can be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// CPU execution.
    Cpu,
    /// CUDA execution on the given device ordinal.
    Cuda(i32),
}

impl Device {
    /// Parses a device string.
    ///
    /// Accepted forms are `cpu`, `cuda` (ordinal 0) and `cuda:N`.
    pub fn parse(value: &str) -> SegResult<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }
        if value.eq_ignore_ascii_case("cuda") {
            return Ok(Device::Cuda(0));
        }
        if let Some(ordinal) = value
            .strip_prefix("cuda:")
            .or_else(|| value.strip_prefix("CUDA:"))
        {
            let id: i32 = ordinal.parse().map_err(|_| {
                SegError::invalid_input(format!("invalid CUDA device ordinal '{ordinal}'"))
            })?;
            return Ok(Device::Cuda(id));
        }
        Err(SegError::invalid_input(format!(
            "unrecognized device '{value}' (expected 'cpu', 'cuda' or 'cuda:N')"
        )))
    }

    /// Picks a device automatically: CUDA when the provider is compiled in
    /// and reports availability, otherwise the CPU.
    pub fn auto() -> Self {
        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::ExecutionProvider;
            let cuda = ort::execution_providers::CUDAExecutionProvider::default();
            if cuda.is_available().unwrap_or(false) {
                return Device::Cuda(0);
            }
        }
        Device::Cpu
    }

    /// Builds the execution provider dispatch list for this device.
    ///
    /// A CUDA device keeps the CPU provider as a fallback at the end of the
    /// list, matching ONNX Runtime conventions. Requesting CUDA from a build
    /// without the `cuda` feature is an error rather than a silent fallback.
    pub fn execution_providers(&self) -> SegResult<Vec<ExecutionProviderDispatch>> {
        let mut providers = Vec::new();
        match self {
            Device::Cpu => {
                providers.push(ort::execution_providers::CPUExecutionProvider::default().build());
            }
            #[cfg(feature = "cuda")]
            Device::Cuda(id) => {
                let cuda = ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(*id);
                providers.push(cuda.build());
                providers.push(ort::execution_providers::CPUExecutionProvider::default().build());
            }
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(_) => {
                return Err(SegError::invalid_input(
                    "CUDA device requested but the 'cuda' feature is not compiled in",
                ));
            }
        }
        Ok(providers)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}
