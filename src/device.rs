//! Compute device selection.
//!
//! A device is a symbolic string (`"cpu"`, `"cuda"`, `"mps"`, ...) handed to
//! model constructors. Only `"auto"` is resolved here; any other request is
//! passed through and validated by the model that receives it.

/// Hardware capability queries used to resolve `"auto"`.
pub trait DeviceProbe: Send + Sync {
    /// Platform-native GPU acceleration (Apple Metal / CoreML).
    fn mps_available(&self) -> bool;
    /// Generic GPU acceleration (NVIDIA CUDA).
    fn cuda_available(&self) -> bool;
}

/// Probe that never reports an accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOnlyProbe;

impl DeviceProbe for CpuOnlyProbe {
    fn mps_available(&self) -> bool {
        false
    }

    fn cuda_available(&self) -> bool {
        false
    }
}

/// Probe backed by ONNX Runtime's execution provider availability.
#[cfg(feature = "kokoro")]
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtProbe;

#[cfg(feature = "kokoro")]
impl DeviceProbe for OrtProbe {
    fn mps_available(&self) -> bool {
        use ort::execution_providers::{CoreMLExecutionProvider, ExecutionProvider};
        CoreMLExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    }

    fn cuda_available(&self) -> bool {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
        CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    }
}

/// The probe matching the compiled-in model runtimes.
pub fn default_probe() -> Box<dyn DeviceProbe> {
    #[cfg(feature = "kokoro")]
    {
        Box::new(OrtProbe)
    }
    #[cfg(not(feature = "kokoro"))]
    {
        Box::new(CpuOnlyProbe)
    }
}

/// Resolve a requested device name.
///
/// Anything other than `"auto"` is returned normalized but otherwise
/// unchecked. `"auto"` picks the first available of mps, cuda, cpu.
pub fn select_device(requested: &str, probe: &dyn DeviceProbe) -> String {
    let requested = requested.trim().to_lowercase();
    if requested != "auto" {
        return requested;
    }

    let device = if probe.mps_available() {
        "mps"
    } else if probe.cuda_available() {
        "cuda"
    } else {
        "cpu"
    };
    log::info!("Auto-selected device '{device}'");
    device.to_string()
}
