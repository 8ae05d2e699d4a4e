//! GPU discovery for `--num-gpus -1`.
//!
//! Asks NVML how many devices the host exposes. NVML initialisation is
//! **gracefully optional**: on a host without NVIDIA drivers the count
//! falls back to the entries listed in `CUDA_VISIBLE_DEVICES`, and
//! finally to zero, which the dispatcher rejects as a pre-flight error.
//!
//! Called once at startup; the result is passed into the dispatcher as
//! a plain number.

use nvml_wrapper::Nvml;

use crate::renderer::GPU_ENV_VAR;

/// Number of GPUs visible to this host.
pub fn visible_gpu_count() -> u32 {
    match Nvml::init() {
        Ok(nvml) => match nvml.device_count() {
            Ok(n) => {
                tracing::info!(gpu_count = n, "NVML GPU detection complete");
                return n;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query GPU device count via NVML");
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "NVML unavailable -- falling back to {GPU_ENV_VAR}");
        }
    }

    let count = std::env::var(GPU_ENV_VAR)
        .map(|v| count_listed_devices(&v))
        .unwrap_or(0);
    tracing::info!(gpu_count = count, "GPU count from {GPU_ENV_VAR}");
    count
}

/// Count device entries in a `CUDA_VISIBLE_DEVICES`-style list.
///
/// CUDA stops at the first invalid entry, and `-1` hides every device.
fn count_listed_devices(value: &str) -> u32 {
    let mut count = 0;
    for entry in value.split(',').map(str::trim) {
        if entry.is_empty() || entry.starts_with('-') {
            break;
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_comma_separated_devices() {
        assert_eq!(count_listed_devices("0,1,2"), 3);
        assert_eq!(count_listed_devices(" 0 , 3 "), 2);
        assert_eq!(count_listed_devices("GPU-8f2c1e7a"), 1);
    }

    #[test]
    fn empty_or_hidden_means_zero() {
        assert_eq!(count_listed_devices(""), 0);
        assert_eq!(count_listed_devices("-1"), 0);
        assert_eq!(count_listed_devices("0,-1,2"), 1);
    }

    #[test]
    fn detection_never_panics() {
        // No NVIDIA drivers on CI; this must still return.
        let _ = visible_gpu_count();
    }
}
