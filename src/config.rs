// config.rs — Node configuration.
//
// Two layers, mirroring how the node is deployed:
//
//   EqualizeConfig — the hot-reloadable surface. Replaced wholesale via
//                    EqualizeNode::reconfigure; the processing path reads
//                    an immutable snapshot, so a frame never sees a
//                    half-applied update.
//   NodeParams     — fixed at initialization (queue depth, debug view,
//                    GPU backend toggle).

use serde::{Deserialize, Serialize};

use crate::error::{EqualizeError, Result};

/// Which equalization algorithm the node applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EqualizeMethod {
    /// Global histogram equalization over the whole image.
    Global,
    /// Contrast-limited adaptive histogram equalization.
    Clahe,
}

/// The dynamic, hot-reloadable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizeConfig {
    /// Selected algorithm.
    pub histogram_equalization_type: EqualizeMethod,
    /// CLAHE tile grid dimensions: number of tiles along x.
    pub clahe_tile_size_x: usize,
    /// CLAHE tile grid dimensions: number of tiles along y.
    pub clahe_tile_size_y: usize,
    /// CLAHE clip limit as a multiplier on the uniform bin count.
    pub clahe_clip_limit: f32,
    /// Subscribe to the synchronized image + camera-info stream and take
    /// the outbound frame id from the calibration message.
    pub use_camera_info: bool,
}

impl Default for EqualizeConfig {
    fn default() -> Self {
        EqualizeConfig {
            histogram_equalization_type: EqualizeMethod::Global,
            clahe_tile_size_x: 8,
            clahe_tile_size_y: 8,
            clahe_clip_limit: 2.0,
            use_camera_info: false,
        }
    }
}

impl EqualizeConfig {
    /// Validate the configuration. Rejected configurations leave the
    /// node's previous snapshot in effect.
    pub fn validate(&self) -> Result<()> {
        if self.clahe_tile_size_x == 0 {
            return Err(EqualizeError::InvalidParameter {
                parameter: "clahe_tile_size_x",
                value: "0".into(),
            });
        }
        if self.clahe_tile_size_y == 0 {
            return Err(EqualizeError::InvalidParameter {
                parameter: "clahe_tile_size_y",
                value: "0".into(),
            });
        }
        if !(self.clahe_clip_limit > 0.0) || !self.clahe_clip_limit.is_finite() {
            return Err(EqualizeError::InvalidParameter {
                parameter: "clahe_clip_limit",
                value: format!("{}", self.clahe_clip_limit),
            });
        }
        Ok(())
    }
}

/// Startup parameters, fixed for the node's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeParams {
    /// Inbound subscription queue depth. A full queue drops frames rather
    /// than blocking the publisher.
    pub queue_size: usize,
    /// Render the processed stream in a local window. Observational only;
    /// the published output is unaffected.
    pub debug_view: bool,
    /// Enable the wgpu compute backend. Falls back to the CPU path (with
    /// a warning) when no suitable adapter exists.
    pub use_gpu: bool,
}

impl Default for NodeParams {
    fn default() -> Self {
        NodeParams {
            queue_size: 3,
            debug_view: false,
            use_gpu: true,
        }
    }
}
