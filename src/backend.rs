//! Backend selection by feature flag. `cpu` is the default; `gpu` and
//! `cuda` take over when enabled without it.

use burn::backend::Autodiff;

// ============ CUDA ============
#[cfg(all(feature = "cuda", not(feature = "cpu"), not(feature = "gpu")))]
mod backend_impl {
    pub use burn::backend::cuda_jit::{Cuda, CudaDevice};
    pub type InferBackend = Cuda;

    pub fn default_device() -> CudaDevice {
        CudaDevice::new(0)
    }

    pub const NAME: &str = "cuda";
}

// ============ WGPU ============
#[cfg(all(feature = "gpu", not(feature = "cuda"), not(feature = "cpu")))]
mod backend_impl {
    pub use burn::backend::wgpu::{Wgpu, WgpuDevice};
    pub type InferBackend = Wgpu<f32, i32>;

    pub fn default_device() -> WgpuDevice {
        WgpuDevice::BestAvailable
    }

    pub const NAME: &str = "wgpu";
}

// ============ NDARRAY (default and fallback) ============
#[cfg(not(any(
    all(feature = "cuda", not(feature = "cpu"), not(feature = "gpu")),
    all(feature = "gpu", not(feature = "cuda"), not(feature = "cpu"))
)))]
mod backend_impl {
    pub use burn::backend::ndarray::{NdArray, NdArrayDevice};
    pub type InferBackend = NdArray;

    pub fn default_device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }

    pub const NAME: &str = "ndarray";
}

pub use backend_impl::{default_device, InferBackend};

/// Backend with autodiff, for training.
pub type TrainBackend = Autodiff<InferBackend>;

pub fn backend_name() -> &'static str {
    backend_impl::NAME
}
